//! invsync core types: kinds, change keys, canonical inventory objects and errors.

#![forbid(unsafe_code)]

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub mod objects;

pub use objects::{
    Application, ApplicationInstance, Cluster, ClusterNode, IngressPolicy, InventoryObject, NetworkError,
    NetworkPolicy, NetworkStatus, Project, Status,
};

/// Inventory resource kinds mirrored by the engine.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Kind {
    Project,
    Application,
    ApplicationInstance,
    ClusterNode,
    NetworkPolicy,
    IngressPolicy,
    Cluster,
}

impl Kind {
    /// All kinds, parents before children. Population and GC walk this order.
    pub const ALL: [Kind; 7] = [
        Kind::Cluster,
        Kind::Project,
        Kind::ClusterNode,
        Kind::Application,
        Kind::ApplicationInstance,
        Kind::NetworkPolicy,
        Kind::IngressPolicy,
    ];

    /// Remote `resource_type` string.
    pub fn resource_type(self) -> &'static str {
        match self {
            Kind::Project => "ContainerProject",
            Kind::Application => "ContainerApplication",
            Kind::ApplicationInstance => "ContainerApplicationInstance",
            Kind::ClusterNode => "ContainerClusterNode",
            Kind::NetworkPolicy => "ContainerNetworkPolicy",
            Kind::IngressPolicy => "ContainerIngressPolicy",
            Kind::Cluster => "ContainerCluster",
        }
    }

    /// Kinds that hang off a Project through `container_project_id`.
    pub fn is_child(self) -> bool {
        matches!(
            self,
            Kind::Application | Kind::ApplicationInstance | Kind::NetworkPolicy | Kind::IngressPolicy
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Kind::Project => "project",
            Kind::Application => "application",
            Kind::ApplicationInstance => "application_instance",
            Kind::ClusterNode => "cluster_node",
            Kind::NetworkPolicy => "network_policy",
            Kind::IngressPolicy => "ingress_policy",
            Kind::Cluster => "cluster",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Kind {
    type Err = SyncError;

    /// Parses a remote `resource_type`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Kind::ALL
            .into_iter()
            .find(|k| k.resource_type() == s)
            .ok_or_else(|| SyncError::UnknownKind(s.to_string()))
    }
}

/// Name of a cluster object; `namespace` is `None` for cluster-scoped objects.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NamespacedName {
    pub namespace: Option<String>,
    pub name: String,
}

impl NamespacedName {
    pub fn cluster(name: impl Into<String>) -> Self {
        Self { namespace: None, name: name.into() }
    }

    pub fn namespaced(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self { namespace: Some(namespace.into()), name: name.into() }
    }
}

impl fmt::Display for NamespacedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}", ns, self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// One pending re-evaluation of one cluster object. Deduplicated by value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChangeKey {
    pub kind: Kind,
    pub external_id: String,
    pub name: NamespacedName,
}

impl ChangeKey {
    pub fn new(kind: Kind, external_id: impl Into<String>, name: NamespacedName) -> Self {
        Self { kind, external_id: external_id.into(), name }
    }
}

impl fmt::Display for ChangeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}({})", self.kind, self.name, self.external_id)
    }
}

/// Operation attached to a request buffer entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operation {
    Create,
    Update,
    Delete,
}

/// Change-set map sent to the remote inventory.
pub type ChangeSet = serde_json::Map<String, serde_json::Value>;

/// One request buffer entry: a payload diff plus its operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InventoryUpdate {
    pub operation: Operation,
    pub object: ChangeSet,
}

impl InventoryUpdate {
    /// DELETE carries only the primary key and the kind.
    pub fn delete(kind: Kind, external_id: &str) -> Self {
        let mut object = ChangeSet::new();
        object.insert(FIELD_EXTERNAL_ID.to_string(), external_id.into());
        object.insert(FIELD_RESOURCE_TYPE.to_string(), kind.resource_type().into());
        Self { operation: Operation::Delete, object }
    }

    pub fn external_id(&self) -> Option<&str> {
        self.object.get(FIELD_EXTERNAL_ID).and_then(|v| v.as_str())
    }
}

pub const FIELD_EXTERNAL_ID: &str = "external_id";
pub const FIELD_RESOURCE_TYPE: &str = "resource_type";

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("unknown inventory kind: {0}")]
    UnknownKind(String),
    #[error("invalid {kind} object: {reason}")]
    InvalidObject { kind: Kind, reason: String },
    #[error("store for {store} cannot hold {object} objects")]
    KindMismatch { store: Kind, object: Kind },
    #[error("serialization: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type SyncResult<T> = Result<T, SyncError>;

pub mod prelude {
    pub use super::{
        ChangeKey, ChangeSet, InventoryObject, InventoryUpdate, Kind, NamespacedName, Operation, SyncError,
        SyncResult,
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_type_round_trips_for_every_kind() {
        for k in Kind::ALL {
            assert_eq!(k.resource_type().parse::<Kind>().unwrap(), k);
        }
    }

    #[test]
    fn unknown_resource_type_is_rejected() {
        let err = "ContainerVolume".parse::<Kind>().unwrap_err();
        assert!(matches!(err, SyncError::UnknownKind(ref s) if s == "ContainerVolume"));
    }

    #[test]
    fn change_keys_dedupe_by_value() {
        let a = ChangeKey::new(Kind::ApplicationInstance, "u1", NamespacedName::namespaced("ns", "p"));
        let b = ChangeKey::new(Kind::ApplicationInstance, "u1", NamespacedName::namespaced("ns", "p"));
        let mut set = std::collections::HashSet::new();
        set.insert(a);
        set.insert(b);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn delete_update_carries_only_seed_fields() {
        let u = InventoryUpdate::delete(Kind::Application, "svc-1");
        assert_eq!(u.operation, Operation::Delete);
        assert_eq!(u.object.len(), 2);
        assert_eq!(u.external_id(), Some("svc-1"));
        assert_eq!(u.object[FIELD_RESOURCE_TYPE], "ContainerApplication");
        let wire = serde_json::to_value(&u).unwrap();
        assert_eq!(wire["operation"], "DELETE");
    }
}
