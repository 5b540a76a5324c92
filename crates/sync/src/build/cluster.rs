//! The cluster's own inventory entry, derived from the node set.

use invsync_core::objects::{Cluster, NetworkError, NetworkStatus, Status};
use invsync_core::{ChangeKey, InventoryObject, NamespacedName};
use invsync_kubehub::{ClusterIdentity, ClusterView};

use super::{node::ready_status, BuildContext, BuildResult, Built};

pub(crate) const CLUSTER_TYPE: &str = "Kubernetes";

/// The cluster always exists under its configured identity.
pub(super) fn live_uid(_: &dyn ClusterView, cluster: &ClusterIdentity, _: &NamespacedName) -> Option<String> {
    Some(cluster.id.clone())
}

pub(super) fn build(ctx: &BuildContext<'_>, key: &ChangeKey) -> BuildResult {
    let nodes = ctx.view.nodes();
    let errors = NetworkError::dedup(nodes.iter().filter(|n| ready_status(n) != Status::Up).map(|n| {
        NetworkError::new(format!("Node {} is not ready", n.metadata.name.as_deref().unwrap_or_default()))
    }));
    let cluster = Cluster {
        external_id: key.external_id.clone(),
        display_name: ctx.cluster.name.clone(),
        cluster_type: CLUSTER_TYPE.into(),
        node_count: u32::try_from(nodes.len()).unwrap_or(u32::MAX),
        status: if nodes.is_empty() { Status::Unknown } else { Status::Up },
        network_status: NetworkStatus::from_errors(&errors),
        network_errors: errors,
    };
    Ok(Built::alone(InventoryObject::Cluster(cluster)))
}
