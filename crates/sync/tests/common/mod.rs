#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use invsync_core::{ChangeKey, InventoryObject, Kind, NamespacedName, Operation};
use invsync_inventory::MockInventory;
use invsync_kubehub::{fixtures, ClusterIdentity, ClusterView, MockCluster};
use invsync_store::MirrorStores;
use invsync_sync::{Engine, RetryQueue, SyncConfig};
use tokio::sync::mpsc::UnboundedReceiver;

pub struct Harness {
    pub cluster: Arc<MockCluster>,
    pub inventory: Arc<MockInventory>,
    pub engine: Arc<Engine>,
    pub rx: UnboundedReceiver<ChangeKey>,
}

pub fn identity() -> ClusterIdentity {
    ClusterIdentity { id: "7d7a3a8e-0000-4000-8000-000000000001".into(), name: "prod".into() }
}

pub fn harness(batch_size: usize, batch_period: Duration) -> Harness {
    let cfg = SyncConfig { cluster: identity(), batch_size, batch_period, ..SyncConfig::default() };
    let cluster = Arc::new(MockCluster::new());
    let inventory = Arc::new(MockInventory::new());
    let (queue, rx) = RetryQueue::new(cfg.retry_min_backoff, cfg.retry_max_backoff);
    let view: Arc<dyn ClusterView> = cluster.clone();
    let engine = Engine::new(cfg, view, inventory.clone(), queue);
    Harness { cluster, inventory, engine, rx }
}

/// Namespace `shop` (ns-1) with unscheduled pods web-0 (pod-0) and web-1 (pod-1).
pub fn shop(c: &MockCluster) {
    c.put_namespace(fixtures::namespace("shop", "ns-1"));
    c.put_pod(fixtures::pod("shop", "web-0", "pod-0", None, Some("10.1.0.10")));
    c.put_pod(fixtures::pod("shop", "web-1", "pod-1", None, Some("10.1.0.11")));
}

pub fn pod_key(name: &str, uid: &str) -> ChangeKey {
    ChangeKey::new(Kind::ApplicationInstance, uid, NamespacedName::namespaced("shop", name))
}

pub fn service_key(name: &str, uid: &str) -> ChangeKey {
    ChangeKey::new(Kind::Application, uid, NamespacedName::namespaced("shop", name))
}

/// Stable serialization of every mirrored object, ordered by kind then id.
pub fn dump(stores: &MirrorStores) -> Vec<serde_json::Value> {
    let mut all: Vec<&InventoryObject> = Kind::ALL.iter().flat_map(|k| stores.get(*k).iter()).collect();
    all.sort_by(|a, b| a.kind().cmp(&b.kind()).then_with(|| a.external_id().cmp(b.external_id())));
    all.into_iter().map(|o| serde_json::to_value(o).unwrap()).collect()
}

/// `(operation, resource_type, external_id)` of every request in one submitted batch.
pub fn ops(batch: &[invsync_core::InventoryUpdate]) -> Vec<(Operation, String, String)> {
    batch
        .iter()
        .map(|u| {
            let rt = u.object.get("resource_type").and_then(|v| v.as_str()).unwrap_or_default().to_string();
            (u.operation, rt, u.external_id().unwrap_or_default().to_string())
        })
        .collect()
}

pub fn app_ids(stores: &MirrorStores, instance: &str) -> Vec<String> {
    match stores.lookup(Kind::ApplicationInstance, instance) {
        Some(InventoryObject::ApplicationInstance(i)) => i.container_application_ids.clone(),
        other => panic!("instance {} not mirrored: {:?}", instance, other),
    }
}

pub fn ingress_app_ids(stores: &MirrorStores, ingress: &str) -> Vec<String> {
    match stores.lookup(Kind::IngressPolicy, ingress) {
        Some(InventoryObject::IngressPolicy(i)) => i.container_application_ids.clone(),
        other => panic!("ingress {} not mirrored: {:?}", ingress, other),
    }
}
