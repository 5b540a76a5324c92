use invsync_core::objects::{Project, Status};
use invsync_core::{ChangeKey, InventoryObject, NamespacedName};
use invsync_kubehub::{ClusterIdentity, ClusterView};
use k8s_openapi::api::core::v1::Namespace;

use super::{labels_of, owned_uid, BuildContext, BuildResult, Built, NotReady};

pub(super) fn live_uid(view: &dyn ClusterView, _: &ClusterIdentity, name: &NamespacedName) -> Option<String> {
    owned_uid(view.namespace(&name.name))
}

pub(super) fn build(ctx: &BuildContext<'_>, key: &ChangeKey) -> BuildResult {
    let ns = ctx
        .view
        .namespace(&key.name.name)
        .ok_or_else(|| NotReady(format!("namespace {} not in cache", key.name.name)))?;
    Ok(Built::alone(InventoryObject::Project(project_of(&ns, &key.external_id))))
}

fn project_of(ns: &Namespace, external_id: &str) -> Project {
    let phase = ns.status.as_ref().and_then(|s| s.phase.as_deref());
    Project {
        external_id: external_id.to_string(),
        display_name: ns.metadata.name.clone().unwrap_or_default(),
        labels: labels_of(&ns.metadata),
        status: match phase {
            Some("Active") => Status::Up,
            Some("Terminating") => Status::Down,
            _ => Status::Unknown,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use invsync_kubehub::fixtures;
    use k8s_openapi::api::core::v1::NamespaceStatus;

    #[test]
    fn namespace_phase_maps_to_status() {
        let mut ns = fixtures::namespace("shop", "ns-1");
        assert_eq!(project_of(&ns, "ns-1").status, Status::Up);
        ns.status = Some(NamespaceStatus { phase: Some("Terminating".into()), ..Default::default() });
        assert_eq!(project_of(&ns, "ns-1").status, Status::Down);
        ns.status = None;
        assert_eq!(project_of(&ns, "ns-1").status, Status::Unknown);
    }
}
