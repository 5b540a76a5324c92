use invsync_core::objects::{Addresses, ClusterNode, NetworkError, NetworkStatus, Status};
use invsync_core::{ChangeKey, InventoryObject, NamespacedName};
use invsync_kubehub::{ClusterIdentity, ClusterView};
use k8s_openapi::api::core::v1::{Node, NodeCondition};

use super::{owned_uid, BuildContext, BuildResult, Built, NotReady};

pub(crate) const NETWORK_UNAVAILABLE: &str = "Node network is unavailable";

pub(super) fn live_uid(view: &dyn ClusterView, _: &ClusterIdentity, name: &NamespacedName) -> Option<String> {
    owned_uid(view.node(&name.name))
}

fn condition<'a>(node: &'a Node, type_: &str) -> Option<&'a NodeCondition> {
    node.status.as_ref()?.conditions.as_ref()?.iter().find(|c| c.type_ == type_)
}

pub(crate) fn ready_status(node: &Node) -> Status {
    match condition(node, "Ready").map(|c| c.status.as_str()) {
        Some("True") => Status::Up,
        Some("False") => Status::Down,
        _ => Status::Unknown,
    }
}

fn internal_ips(node: &Node) -> Addresses {
    let addrs = node.status.as_ref().and_then(|s| s.addresses.as_deref()).unwrap_or_default();
    addrs.iter().filter(|a| a.type_ == "InternalIP").map(|a| a.address.clone()).collect()
}

fn node_of(node: &Node, external_id: &str) -> ClusterNode {
    let network_errors: Vec<NetworkError> = condition(node, "NetworkUnavailable")
        .filter(|c| c.status == "True")
        .map(|c| NetworkError::new(c.message.as_deref().filter(|m| !m.is_empty()).unwrap_or(NETWORK_UNAVAILABLE)))
        .into_iter()
        .collect();
    ClusterNode {
        external_id: external_id.to_string(),
        display_name: node.metadata.name.clone().unwrap_or_default(),
        ip_addresses: internal_ips(node),
        kubelet_version: node
            .status
            .as_ref()
            .and_then(|s| s.node_info.as_ref())
            .map(|i| i.kubelet_version.clone())
            .unwrap_or_default(),
        status: ready_status(node),
        network_status: NetworkStatus::from_errors(&network_errors),
        network_errors,
    }
}

pub(super) fn build(ctx: &BuildContext<'_>, key: &ChangeKey) -> BuildResult {
    let node = ctx
        .view
        .node(&key.name.name)
        .ok_or_else(|| NotReady(format!("node {} not in cache", key.name)))?;
    Ok(Built::alone(InventoryObject::ClusterNode(node_of(&node, &key.external_id))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use invsync_kubehub::fixtures;

    #[test]
    fn ready_condition_and_internal_ip() {
        let n = node_of(&fixtures::node("n1", "node-1", "192.168.0.1", true), "node-1");
        assert_eq!(n.status, Status::Up);
        assert_eq!(n.ip_addresses.as_slice(), ["192.168.0.1".to_string()]);
        assert_eq!(n.kubelet_version, "v1.29.2");
        assert_eq!(n.network_status, NetworkStatus::Healthy);
        assert!(n.network_errors.is_empty());
    }

    #[test]
    fn network_unavailable_falls_back_to_fixed_text() {
        let mut k = fixtures::node("n1", "node-1", "192.168.0.1", false);
        if let Some(conds) = k.status.as_mut().and_then(|s| s.conditions.as_mut()) {
            conds.push(NodeCondition { type_: "NetworkUnavailable".into(), status: "True".into(), ..Default::default() });
        }
        let n = node_of(&k, "node-1");
        assert_eq!(n.status, Status::Down);
        assert_eq!(n.network_status, NetworkStatus::Unhealthy);
        assert_eq!(n.network_errors, vec![NetworkError::new(NETWORK_UNAVAILABLE)]);
    }
}
