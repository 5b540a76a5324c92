//! Differencer: minimal change-set between a mirrored object and a freshly built one.
//!
//! The change-set always carries `external_id` and `resource_type`. Identity fields
//! (display name, parent project) are written on create only.

use invsync_core::objects::{
    Addresses, Application, ApplicationInstance, Cluster, ClusterNode, IngressPolicy, NetworkPolicy, Project,
};
use invsync_core::{
    ChangeSet, InventoryObject, InventoryUpdate, Operation, SyncResult, FIELD_EXTERNAL_ID, FIELD_RESOURCE_TYPE,
};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Create,
    Update,
    None,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Diff {
    pub changes: ChangeSet,
    pub verdict: Verdict,
}

impl Diff {
    /// Request buffer entry for this diff; `None` when nothing needs sending.
    pub fn into_update(self) -> Option<InventoryUpdate> {
        let operation = match self.verdict {
            Verdict::Create => Operation::Create,
            Verdict::Update => Operation::Update,
            Verdict::None => return None,
        };
        Some(InventoryUpdate { operation, object: self.changes })
    }
}

/// Multiset equality: order is ignored, duplicates count.
pub fn same_addresses(a: &Addresses, b: &Addresses) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut a: Vec<&String> = a.iter().collect();
    let mut b: Vec<&String> = b.iter().collect();
    a.sort_unstable();
    b.sort_unstable();
    a == b
}

struct Fields {
    changes: ChangeSet,
    create: bool,
}

impl Fields {
    fn new(new: &InventoryObject, create: bool) -> Self {
        let mut changes = ChangeSet::new();
        changes.insert(FIELD_EXTERNAL_ID.into(), new.external_id().into());
        changes.insert(FIELD_RESOURCE_TYPE.into(), new.kind().resource_type().into());
        Self { changes, create }
    }

    fn put<T: Serialize>(&mut self, name: &str, v: &T) -> SyncResult<()> {
        self.changes.insert(name.to_string(), serde_json::to_value(v)?);
        Ok(())
    }

    /// Written on create, never compared afterwards.
    fn identity<T: Serialize>(&mut self, name: &str, v: &T) -> SyncResult<()> {
        if self.create { self.put(name, v) } else { Ok(()) }
    }

    fn field<T: Serialize + PartialEq>(&mut self, name: &str, pre: Option<&T>, new: &T) -> SyncResult<()> {
        match pre {
            Some(p) if p == new => Ok(()),
            _ => self.put(name, new),
        }
    }

    fn addresses(&mut self, name: &str, pre: Option<&Addresses>, new: &Addresses) -> SyncResult<()> {
        match pre {
            Some(p) if same_addresses(p, new) => Ok(()),
            _ => self.put(name, new),
        }
    }
}

fn project(f: &mut Fields, pre: Option<&Project>, n: &Project) -> SyncResult<()> {
    f.identity("display_name", &n.display_name)?;
    f.field("labels", pre.map(|p| &p.labels), &n.labels)?;
    f.field("status", pre.map(|p| &p.status), &n.status)
}

fn application(f: &mut Fields, pre: Option<&Application>, n: &Application) -> SyncResult<()> {
    f.identity("display_name", &n.display_name)?;
    f.identity("container_project_id", &n.container_project_id)?;
    f.field("labels", pre.map(|p| &p.labels), &n.labels)?;
    f.field("service_type", pre.map(|p| &p.service_type), &n.service_type)?;
    f.addresses("ip_addresses", pre.map(|p| &p.ip_addresses), &n.ip_addresses)?;
    f.field("ports", pre.map(|p| &p.ports), &n.ports)?;
    f.field("status", pre.map(|p| &p.status), &n.status)?;
    f.field("network_status", pre.map(|p| &p.network_status), &n.network_status)?;
    f.field("network_errors", pre.map(|p| &p.network_errors), &n.network_errors)
}

fn instance(f: &mut Fields, pre: Option<&ApplicationInstance>, n: &ApplicationInstance) -> SyncResult<()> {
    f.identity("display_name", &n.display_name)?;
    f.identity("container_project_id", &n.container_project_id)?;
    f.field("container_application_ids", pre.map(|p| &p.container_application_ids), &n.container_application_ids)?;
    f.field("cluster_node_id", pre.map(|p| &p.cluster_node_id), &n.cluster_node_id)?;
    f.addresses("ip_addresses", pre.map(|p| &p.ip_addresses), &n.ip_addresses)?;
    f.field("labels", pre.map(|p| &p.labels), &n.labels)?;
    f.field("status", pre.map(|p| &p.status), &n.status)
}

fn node(f: &mut Fields, pre: Option<&ClusterNode>, n: &ClusterNode) -> SyncResult<()> {
    f.identity("display_name", &n.display_name)?;
    f.addresses("ip_addresses", pre.map(|p| &p.ip_addresses), &n.ip_addresses)?;
    f.field("kubelet_version", pre.map(|p| &p.kubelet_version), &n.kubelet_version)?;
    f.field("status", pre.map(|p| &p.status), &n.status)?;
    f.field("network_status", pre.map(|p| &p.network_status), &n.network_status)?;
    f.field("network_errors", pre.map(|p| &p.network_errors), &n.network_errors)
}

fn network_policy(f: &mut Fields, pre: Option<&NetworkPolicy>, n: &NetworkPolicy) -> SyncResult<()> {
    f.identity("display_name", &n.display_name)?;
    f.identity("container_project_id", &n.container_project_id)?;
    f.field("policy_types", pre.map(|p| &p.policy_types), &n.policy_types)?;
    f.field("spec", pre.map(|p| &p.spec), &n.spec)?;
    f.field("status", pre.map(|p| &p.status), &n.status)
}

fn ingress_policy(f: &mut Fields, pre: Option<&IngressPolicy>, n: &IngressPolicy) -> SyncResult<()> {
    f.identity("display_name", &n.display_name)?;
    f.identity("container_project_id", &n.container_project_id)?;
    f.field("container_application_ids", pre.map(|p| &p.container_application_ids), &n.container_application_ids)?;
    f.field("hosts", pre.map(|p| &p.hosts), &n.hosts)?;
    f.field("spec", pre.map(|p| &p.spec), &n.spec)?;
    f.field("status", pre.map(|p| &p.status), &n.status)
}

fn cluster(f: &mut Fields, pre: Option<&Cluster>, n: &Cluster) -> SyncResult<()> {
    f.identity("display_name", &n.display_name)?;
    f.field("cluster_type", pre.map(|p| &p.cluster_type), &n.cluster_type)?;
    f.field("node_count", pre.map(|p| &p.node_count), &n.node_count)?;
    f.field("status", pre.map(|p| &p.status), &n.status)?;
    f.field("network_status", pre.map(|p| &p.network_status), &n.network_status)?;
    f.field("network_errors", pre.map(|p| &p.network_errors), &n.network_errors)
}

/// Compare `pre` (the mirrored entry, if any) with `new`.
///
/// A `pre` of another kind is treated as absent.
pub fn diff(pre: Option<&InventoryObject>, new: &InventoryObject) -> SyncResult<Diff> {
    use InventoryObject as O;
    let pre = pre.filter(|p| p.kind() == new.kind());
    let mut f = Fields::new(new, pre.is_none());
    match new {
        O::Project(n) => project(&mut f, pre.and_then(|p| if let O::Project(p) = p { Some(p) } else { None }), n)?,
        O::Application(n) => {
            application(&mut f, pre.and_then(|p| if let O::Application(p) = p { Some(p) } else { None }), n)?
        }
        O::ApplicationInstance(n) => {
            instance(&mut f, pre.and_then(|p| if let O::ApplicationInstance(p) = p { Some(p) } else { None }), n)?
        }
        O::ClusterNode(n) => node(&mut f, pre.and_then(|p| if let O::ClusterNode(p) = p { Some(p) } else { None }), n)?,
        O::NetworkPolicy(n) => {
            network_policy(&mut f, pre.and_then(|p| if let O::NetworkPolicy(p) = p { Some(p) } else { None }), n)?
        }
        O::IngressPolicy(n) => {
            ingress_policy(&mut f, pre.and_then(|p| if let O::IngressPolicy(p) = p { Some(p) } else { None }), n)?
        }
        O::Cluster(n) => cluster(&mut f, pre.and_then(|p| if let O::Cluster(p) = p { Some(p) } else { None }), n)?,
    }
    let verdict = if f.create {
        Verdict::Create
    } else if f.changes.len() > 2 {
        Verdict::Update
    } else {
        Verdict::None
    };
    Ok(Diff { changes: f.changes, verdict })
}
