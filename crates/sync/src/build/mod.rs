//! Canonical builders: one per kind, dispatched through a static table.
//!
//! A builder reads a cluster object (plus whatever it structurally depends on) and produces the
//! canonical inventory object. Output is deterministic: the same inputs give the same object.
//! A missing required dependency aborts with [`NotReady`] and the key is retried later.

use std::collections::BTreeMap;
use std::sync::Arc;

use invsync_core::{ChangeKey, InventoryObject, Kind, NamespacedName};
use invsync_kubehub::{uid_of, ClusterIdentity, ClusterView, Resource};
use invsync_store::{MirrorStores, INDEX_APPLICATION};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

mod application;
mod cluster;
mod instance;
mod node;
mod policy;
mod project;

pub(crate) use application::detach_application;
pub use application::{ENDPOINTS_NOT_READY, NO_ENDPOINTS, SERVICE_ERROR_ANNOTATIONS};

/// Result of a successful build: the object plus dependents whose cross-references changed.
#[derive(Debug, Clone)]
pub struct Built {
    pub object: InventoryObject,
    pub dependents: Vec<InventoryObject>,
}

impl Built {
    pub fn alone(object: InventoryObject) -> Self {
        Self { object, dependents: Vec::new() }
    }
}

/// A required dependency is not visible yet; the key must be re-attempted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotReady(pub String);

impl std::fmt::Display for NotReady {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

pub type BuildResult = Result<Built, NotReady>;

/// Read access to the current inventory state of this batch: staged objects first, then
/// the mirror stores. Objects staged for deletion are invisible.
pub trait Lookup {
    fn current(&self, kind: Kind, external_id: &str) -> Option<&InventoryObject>;
    /// Objects of `kind` whose `container_application_ids` contain `application_id`.
    fn referencing(&self, kind: Kind, application_id: &str) -> Vec<&InventoryObject>;
}

impl Lookup for MirrorStores {
    fn current(&self, kind: Kind, external_id: &str) -> Option<&InventoryObject> {
        self.lookup(kind, external_id)
    }

    fn referencing(&self, kind: Kind, application_id: &str) -> Vec<&InventoryObject> {
        self.get(kind).by_index(INDEX_APPLICATION, application_id)
    }
}

pub struct BuildContext<'a> {
    pub view: &'a dyn ClusterView,
    pub cluster: &'a ClusterIdentity,
    pub lookup: &'a dyn Lookup,
}

impl BuildContext<'_> {
    /// Project id for a namespace; the namespace is a required dependency.
    pub(crate) fn project_id(&self, namespace: &str) -> Result<String, NotReady> {
        self.view
            .namespace(namespace)
            .as_deref()
            .and_then(uid_of)
            .map(str::to_string)
            .ok_or_else(|| NotReady(format!("namespace {} not in cache", namespace)))
    }
}

/// Live-object check outcome for a key or mirror entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Existence {
    Present,
    Gone,
    /// Same name, different identity: the object was recreated.
    Replaced { live: String },
}

/// Per-kind function table.
pub struct KindOps {
    /// UID of the live cluster object behind `name`, if any.
    pub live_uid: fn(&dyn ClusterView, &ClusterIdentity, &NamespacedName) -> Option<String>,
    pub build: fn(&BuildContext<'_>, &ChangeKey) -> BuildResult,
}

static PROJECT: KindOps = KindOps { live_uid: project::live_uid, build: project::build };
static APPLICATION: KindOps = KindOps { live_uid: application::live_uid, build: application::build };
static INSTANCE: KindOps = KindOps { live_uid: instance::live_uid, build: instance::build };
static NODE: KindOps = KindOps { live_uid: node::live_uid, build: node::build };
static NETWORK_POLICY: KindOps = KindOps { live_uid: policy::network_policy_live_uid, build: policy::build_network_policy };
static INGRESS_POLICY: KindOps = KindOps { live_uid: policy::ingress_live_uid, build: policy::build_ingress };
static CLUSTER: KindOps = KindOps { live_uid: cluster::live_uid, build: cluster::build };

pub fn ops(kind: Kind) -> &'static KindOps {
    match kind {
        Kind::Project => &PROJECT,
        Kind::Application => &APPLICATION,
        Kind::ApplicationInstance => &INSTANCE,
        Kind::ClusterNode => &NODE,
        Kind::NetworkPolicy => &NETWORK_POLICY,
        Kind::IngressPolicy => &INGRESS_POLICY,
        Kind::Cluster => &CLUSTER,
    }
}

/// Compare the live object behind `name` against the identity we hold.
pub fn existence(view: &dyn ClusterView, cluster: &ClusterIdentity, kind: Kind, name: &NamespacedName, external_id: &str) -> Existence {
    match (ops(kind).live_uid)(view, cluster, name) {
        None => Existence::Gone,
        Some(live) if live != external_id => Existence::Replaced { live },
        Some(_) => Existence::Present,
    }
}

pub(crate) fn namespace_of(name: &NamespacedName) -> &str {
    name.namespace.as_deref().unwrap_or_default()
}

pub(crate) fn labels_of(meta: &ObjectMeta) -> BTreeMap<String, String> {
    meta.labels.clone().unwrap_or_default()
}

pub(crate) fn owned_uid<K: Resource>(obj: Option<Arc<K>>) -> Option<String> {
    obj.as_deref().and_then(uid_of).map(str::to_string)
}

