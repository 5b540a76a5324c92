//! Canonical inventory objects, one payload per [`Kind`].
//!
//! Every payload carries `external_id` (the cluster object's UID). Child kinds also carry
//! `container_project_id`, the `external_id` of their Project. Fields default when absent so
//! partially populated remote objects still deserialize and can be validated.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::{Kind, SyncError, SyncResult};

/// Address-like field. Source order carries no meaning; compare as a multiset.
pub type Addresses = SmallVec<[String; 2]>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum Status {
    Up,
    Down,
    #[default]
    Unknown,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum NetworkStatus {
    #[default]
    Healthy,
    Unhealthy,
}

impl NetworkStatus {
    pub fn from_errors(errors: &[NetworkError]) -> Self {
        if errors.is_empty() { NetworkStatus::Healthy } else { NetworkStatus::Unhealthy }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct NetworkError {
    pub error_message: String,
}

impl NetworkError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self { error_message: msg.into() }
    }

    /// Deduplicate by message text, keeping first occurrence order.
    pub fn dedup(errors: impl IntoIterator<Item = NetworkError>) -> Vec<NetworkError> {
        let mut out: Vec<NetworkError> = Vec::new();
        for e in errors {
            if !out.iter().any(|x| x.error_message == e.error_message) {
                out.push(e);
            }
        }
        out
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Project {
    pub external_id: String,
    pub display_name: String,
    pub labels: BTreeMap<String, String>,
    pub status: Status,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Application {
    pub external_id: String,
    pub display_name: String,
    pub container_project_id: String,
    pub labels: BTreeMap<String, String>,
    pub service_type: String,
    /// Cluster IPs (up to one per IP family).
    pub ip_addresses: Addresses,
    pub ports: Vec<String>,
    pub status: Status,
    pub network_status: NetworkStatus,
    pub network_errors: Vec<NetworkError>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct ApplicationInstance {
    pub external_id: String,
    pub display_name: String,
    pub container_project_id: String,
    /// Sorted ids of the Applications this instance currently backs.
    pub container_application_ids: Vec<String>,
    /// Empty while the pod is unscheduled.
    pub cluster_node_id: String,
    pub ip_addresses: Addresses,
    pub labels: BTreeMap<String, String>,
    pub status: Status,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct ClusterNode {
    pub external_id: String,
    pub display_name: String,
    pub ip_addresses: Addresses,
    pub kubelet_version: String,
    pub status: Status,
    pub network_status: NetworkStatus,
    pub network_errors: Vec<NetworkError>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct NetworkPolicy {
    pub external_id: String,
    pub display_name: String,
    pub container_project_id: String,
    pub policy_types: Vec<String>,
    pub spec: serde_json::Value,
    pub status: Status,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct IngressPolicy {
    pub external_id: String,
    pub display_name: String,
    pub container_project_id: String,
    pub container_application_ids: Vec<String>,
    pub hosts: Vec<String>,
    pub spec: serde_json::Value,
    pub status: Status,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Cluster {
    pub external_id: String,
    pub display_name: String,
    pub cluster_type: String,
    pub node_count: u32,
    pub status: Status,
    pub network_status: NetworkStatus,
    pub network_errors: Vec<NetworkError>,
}

/// Tagged union over every canonical payload; the tag is the remote `resource_type`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "resource_type")]
pub enum InventoryObject {
    #[serde(rename = "ContainerProject")]
    Project(Project),
    #[serde(rename = "ContainerApplication")]
    Application(Application),
    #[serde(rename = "ContainerApplicationInstance")]
    ApplicationInstance(ApplicationInstance),
    #[serde(rename = "ContainerClusterNode")]
    ClusterNode(ClusterNode),
    #[serde(rename = "ContainerNetworkPolicy")]
    NetworkPolicy(NetworkPolicy),
    #[serde(rename = "ContainerIngressPolicy")]
    IngressPolicy(IngressPolicy),
    #[serde(rename = "ContainerCluster")]
    Cluster(Cluster),
}

impl InventoryObject {
    pub fn kind(&self) -> Kind {
        match self {
            InventoryObject::Project(_) => Kind::Project,
            InventoryObject::Application(_) => Kind::Application,
            InventoryObject::ApplicationInstance(_) => Kind::ApplicationInstance,
            InventoryObject::ClusterNode(_) => Kind::ClusterNode,
            InventoryObject::NetworkPolicy(_) => Kind::NetworkPolicy,
            InventoryObject::IngressPolicy(_) => Kind::IngressPolicy,
            InventoryObject::Cluster(_) => Kind::Cluster,
        }
    }

    pub fn external_id(&self) -> &str {
        match self {
            InventoryObject::Project(o) => &o.external_id,
            InventoryObject::Application(o) => &o.external_id,
            InventoryObject::ApplicationInstance(o) => &o.external_id,
            InventoryObject::ClusterNode(o) => &o.external_id,
            InventoryObject::NetworkPolicy(o) => &o.external_id,
            InventoryObject::IngressPolicy(o) => &o.external_id,
            InventoryObject::Cluster(o) => &o.external_id,
        }
    }

    pub fn display_name(&self) -> &str {
        match self {
            InventoryObject::Project(o) => &o.display_name,
            InventoryObject::Application(o) => &o.display_name,
            InventoryObject::ApplicationInstance(o) => &o.display_name,
            InventoryObject::ClusterNode(o) => &o.display_name,
            InventoryObject::NetworkPolicy(o) => &o.display_name,
            InventoryObject::IngressPolicy(o) => &o.display_name,
            InventoryObject::Cluster(o) => &o.display_name,
        }
    }

    /// Parent Project id for child kinds, `None` otherwise.
    pub fn container_project_id(&self) -> Option<&str> {
        match self {
            InventoryObject::Application(o) => Some(&o.container_project_id),
            InventoryObject::ApplicationInstance(o) => Some(&o.container_project_id),
            InventoryObject::NetworkPolicy(o) => Some(&o.container_project_id),
            InventoryObject::IngressPolicy(o) => Some(&o.container_project_id),
            InventoryObject::Project(_) | InventoryObject::ClusterNode(_) | InventoryObject::Cluster(_) => None,
        }
    }

    /// Ids of the Applications this object points at (instances and ingresses only).
    pub fn application_ids(&self) -> Option<&[String]> {
        match self {
            InventoryObject::ApplicationInstance(o) => Some(&o.container_application_ids),
            InventoryObject::IngressPolicy(o) => Some(&o.container_application_ids),
            _ => None,
        }
    }

    pub fn application_ids_mut(&mut self) -> Option<&mut Vec<String>> {
        match self {
            InventoryObject::ApplicationInstance(o) => Some(&mut o.container_application_ids),
            InventoryObject::IngressPolicy(o) => Some(&mut o.container_application_ids),
            _ => None,
        }
    }

    /// Structural checks an object must pass before it may be indexed.
    pub fn validate(&self) -> SyncResult<()> {
        let kind = self.kind();
        if self.external_id().is_empty() {
            return Err(SyncError::InvalidObject { kind, reason: "empty external_id".into() });
        }
        if matches!(self.container_project_id(), Some(p) if p.is_empty()) {
            return Err(SyncError::InvalidObject { kind, reason: "empty container_project_id".into() });
        }
        Ok(())
    }

    /// Parse a remote object; the `resource_type` tag must name a known kind. Application id
    /// lists come back sorted and free of duplicates whatever order the remote stored.
    pub fn from_value(v: serde_json::Value) -> SyncResult<Self> {
        let rt = v.get(crate::FIELD_RESOURCE_TYPE).and_then(|t| t.as_str()).unwrap_or("");
        rt.parse::<Kind>()?;
        let mut obj: InventoryObject = serde_json::from_value(v)?;
        if let Some(ids) = obj.application_ids_mut() {
            ids.sort_unstable();
            ids.dedup();
        }
        Ok(obj)
    }
}
