//! Garbage collector: reconcile the mirror stores against cluster truth.
//!
//! Projects are judged first. Children are then judged against the projects that survive this
//! pass, so a namespace and everything under it go in the same remote write. Dead letters left
//! by startup population are deleted in that write too.

use std::sync::Arc;
use std::time::{Duration, Instant};

use invsync_core::{InventoryObject, InventoryUpdate, Kind, NamespacedName};
use invsync_inventory::InventoryClient;
use invsync_kubehub::{ClusterIdentity, ClusterView};
use invsync_store::{DeadLetters, MirrorStore, MirrorStores};
use metrics::{counter, histogram};
use rand::Rng;
use rustc_hash::FxHashMap;
use tracing::{error, info, warn};

use crate::build::{existence, Existence};
use crate::orchestrator::BatchCycle;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct GcReport {
    pub deleted: usize,
    /// Instances whose application references were stripped.
    pub updated: usize,
    pub dead_letters_swept: usize,
    pub submit_failed: bool,
}

/// Wait for the next pass: `interval` plus up to `jitter * interval` extra (jitter capped at 1).
pub fn jittered(interval: Duration, jitter: f64) -> Duration {
    if jitter <= 0.0 || !jitter.is_finite() {
        return interval;
    }
    let extra = rand::thread_rng().gen_range(0.0..=jitter.min(1.0));
    interval.saturating_add(interval.mul_f64(extra))
}

fn sorted(store: &MirrorStore) -> Vec<&InventoryObject> {
    let mut v: Vec<_> = store.iter().collect();
    v.sort_by(|a, b| a.external_id().cmp(b.external_id()));
    v
}

pub struct GarbageCollector {
    view: Arc<dyn ClusterView>,
    inventory: Arc<dyn InventoryClient>,
    cluster: ClusterIdentity,
}

impl GarbageCollector {
    pub fn new(view: Arc<dyn ClusterView>, inventory: Arc<dyn InventoryClient>, cluster: ClusterIdentity) -> Self {
        Self { view, inventory, cluster }
    }

    fn gone(&self, kind: Kind, name: &NamespacedName, external_id: &str) -> Option<&'static str> {
        match existence(self.view.as_ref(), &self.cluster, kind, name, external_id) {
            Existence::Present => None,
            Existence::Gone => Some("not found"),
            Existence::Replaced { .. } => Some("recreated"),
        }
    }

    /// Entries to delete, in submission order: children, nodes, cluster, projects.
    fn collect(&self, stores: &MirrorStores) -> Vec<(Kind, String)> {
        let mut live_projects: FxHashMap<&str, &str> = FxHashMap::default();
        let mut stale_projects = Vec::new();
        for p in sorted(stores.get(Kind::Project)) {
            match self.gone(Kind::Project, &NamespacedName::cluster(p.display_name()), p.external_id()) {
                Some(reason) => {
                    info!(kind = %Kind::Project, id = p.external_id(), name = p.display_name(), reason, "collecting");
                    stale_projects.push((Kind::Project, p.external_id().to_string()));
                }
                None => {
                    live_projects.insert(p.external_id(), p.display_name());
                }
            }
        }

        let mut doomed = Vec::new();
        // Instances before applications: an application delete strips only surviving instances.
        for kind in [Kind::ApplicationInstance, Kind::NetworkPolicy, Kind::IngressPolicy, Kind::Application] {
            for obj in sorted(stores.get(kind)) {
                let parent = obj.container_project_id().unwrap_or_default();
                let reason = match live_projects.get(parent) {
                    None => Some("orphan"),
                    Some(ns) => self.gone(kind, &NamespacedName::namespaced(*ns, obj.display_name()), obj.external_id()),
                };
                if let Some(reason) = reason {
                    info!(kind = %kind, id = obj.external_id(), name = obj.display_name(), parent, reason, "collecting");
                    doomed.push((kind, obj.external_id().to_string()));
                }
            }
        }
        for n in sorted(stores.get(Kind::ClusterNode)) {
            if let Some(reason) = self.gone(Kind::ClusterNode, &NamespacedName::cluster(n.display_name()), n.external_id()) {
                info!(kind = %Kind::ClusterNode, id = n.external_id(), name = n.display_name(), reason, "collecting");
                doomed.push((Kind::ClusterNode, n.external_id().to_string()));
            }
        }
        for c in sorted(stores.get(Kind::Cluster)) {
            if c.external_id() != self.cluster.id {
                info!(kind = %Kind::Cluster, id = c.external_id(), "collecting foreign cluster entry");
                doomed.push((Kind::Cluster, c.external_id().to_string()));
            }
        }
        doomed.extend(stale_projects);
        doomed
    }

    /// One pass. Stores and dead letters change only if the remote write succeeds.
    pub async fn run(&self, stores: &mut MirrorStores, dead: &mut DeadLetters) -> GcReport {
        let started = Instant::now();
        let mut report = GcReport::default();
        let swept: Vec<(Kind, String)> =
            dead.entries().iter().map(|o| (o.kind(), o.external_id().to_string())).collect();

        let staged = {
            let doomed = self.collect(stores);
            let mut cycle = BatchCycle::new(stores);
            for (kind, id) in &doomed {
                match cycle.stage_delete(*kind, id) {
                    Ok(()) => report.deleted += 1,
                    Err(e) => error!(kind = %kind, id = %id, error = %e, "cannot stage delete"),
                }
            }
            for (kind, id) in &swept {
                cycle.push_request(InventoryUpdate::delete(*kind, id));
            }
            report.updated = cycle.requests().len().saturating_sub(report.deleted + swept.len());
            cycle.finish()
        };

        if staged.is_empty() {
            return report;
        }
        match self.inventory.submit_batch(&self.cluster.id, &staged.requests).await {
            Ok(()) => {
                staged.commit(stores);
                for (kind, id) in &swept {
                    dead.remove(*kind, id);
                }
                report.dead_letters_swept = swept.len();
                counter!("invsync_gc_deleted_total", (report.deleted + swept.len()) as u64);
            }
            Err(e) => {
                warn!(error = %e, requests = staged.requests.len(), "gc submit failed; stores left untouched");
                counter!("invsync_submit_errors_total", 1u64);
                report = GcReport { submit_failed: true, ..GcReport::default() };
            }
        }
        stores.publish_metrics();
        histogram!("invsync_gc_ms", started.elapsed().as_secs_f64() * 1000.0);
        info!(deleted = report.deleted, updated = report.updated, swept = report.dead_letters_swept, failed = report.submit_failed, "gc pass done");
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jitter_stays_within_bounds() {
        let base = Duration::from_secs(100);
        assert_eq!(jittered(base, 0.0), base);
        for _ in 0..50 {
            let d = jittered(base, 0.1);
            assert!(d >= base && d <= Duration::from_secs(110));
        }
    }
}
