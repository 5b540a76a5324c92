//! Sync orchestrator: one flush-build-diff-submit-commit cycle.
//!
//! Everything a cycle stages is held by value in a [`BatchCycle`] and written into the mirror
//! stores only after the remote inventory accepted the whole request buffer.

use std::sync::Arc;
use std::time::Instant;

use invsync_core::{ChangeKey, InventoryObject, InventoryUpdate, Kind, SyncResult};
use invsync_inventory::InventoryClient;
use invsync_kubehub::{ClusterIdentity, ClusterView};
use invsync_store::MirrorStores;
use metrics::{counter, histogram};
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, error, info, warn};

use crate::build::{self, existence, BuildContext, Existence, Lookup, NotReady};
use crate::diff::diff;

type ObjectKey = (Kind, String);

/// Kinds that carry `container_application_ids`.
const REFERRERS: [Kind; 2] = [Kind::ApplicationInstance, Kind::IngressPolicy];

fn references(obj: &InventoryObject, application_id: &str) -> bool {
    obj.application_ids().is_some_and(|ids| ids.iter().any(|id| id == application_id))
}

/// Batch-scoped staging area over read-only mirror stores.
pub struct BatchCycle<'a> {
    stores: &'a MirrorStores,
    adds: FxHashMap<ObjectKey, InventoryObject>,
    deletes: FxHashSet<ObjectKey>,
    requests: Vec<InventoryUpdate>,
}

impl Lookup for BatchCycle<'_> {
    fn current(&self, kind: Kind, external_id: &str) -> Option<&InventoryObject> {
        let k = (kind, external_id.to_string());
        if self.deletes.contains(&k) {
            return None;
        }
        self.adds.get(&k).or_else(|| self.stores.lookup(kind, external_id))
    }

    fn referencing(&self, kind: Kind, application_id: &str) -> Vec<&InventoryObject> {
        let staged = |o: &InventoryObject| {
            let k = (kind, o.external_id().to_string());
            self.deletes.contains(&k) || self.adds.contains_key(&k)
        };
        let mut out: Vec<&InventoryObject> =
            self.stores.referencing(kind, application_id).into_iter().filter(|o| !staged(*o)).collect();
        out.extend(
            self.adds
                .iter()
                .filter(|((k, _), o)| *k == kind && references(o, application_id))
                .map(|(_, o)| o),
        );
        out.sort_by(|a, b| a.external_id().cmp(b.external_id()));
        out
    }
}

impl<'a> BatchCycle<'a> {
    pub fn new(stores: &'a MirrorStores) -> Self {
        Self { stores, adds: FxHashMap::default(), deletes: FxHashSet::default(), requests: Vec::new() }
    }

    /// Diff `obj` against the current state and queue a request unless nothing changed.
    pub fn stage(&mut self, obj: InventoryObject) -> SyncResult<()> {
        obj.validate()?;
        let d = diff(self.current(obj.kind(), obj.external_id()), &obj)?;
        let Some(update) = d.into_update() else {
            debug!(kind = %obj.kind(), id = obj.external_id(), "no change");
            return Ok(());
        };
        let k = (obj.kind(), obj.external_id().to_string());
        self.requests.push(update);
        self.deletes.remove(&k);
        self.adds.insert(k, obj);
        Ok(())
    }

    /// Queue a DELETE for a known object. Deleting an Application also strips its id from
    /// every instance and ingress that references it.
    pub fn stage_delete(&mut self, kind: Kind, external_id: &str) -> SyncResult<()> {
        if self.current(kind, external_id).is_none() {
            debug!(kind = %kind, id = external_id, "delete of unmirrored object skipped");
            return Ok(());
        }
        if kind == Kind::Application {
            let detached: Vec<InventoryObject> = REFERRERS
                .into_iter()
                .flat_map(|k| self.referencing(k, external_id))
                .filter_map(|o| build::detach_application(o, external_id))
                .collect();
            for inst in detached {
                self.stage(inst)?;
            }
        }
        self.requests.push(InventoryUpdate::delete(kind, external_id));
        let k = (kind, external_id.to_string());
        self.adds.remove(&k);
        self.deletes.insert(k);
        Ok(())
    }

    /// Queue a request that has no mirror state behind it.
    pub fn push_request(&mut self, update: InventoryUpdate) {
        self.requests.push(update);
    }

    pub fn requests(&self) -> &[InventoryUpdate] {
        &self.requests
    }

    pub fn finish(self) -> Staged {
        Staged { adds: self.adds, deletes: self.deletes, requests: self.requests }
    }
}

/// Owned result of a cycle, detached from the stores it was staged against.
pub struct Staged {
    adds: FxHashMap<ObjectKey, InventoryObject>,
    deletes: FxHashSet<ObjectKey>,
    pub requests: Vec<InventoryUpdate>,
}

impl Staged {
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// Apply staged deletes, then staged adds.
    pub fn commit(self, stores: &mut MirrorStores) {
        for (kind, id) in self.deletes {
            stores.remove(kind, &id);
        }
        for (_, obj) in self.adds {
            if let Err(e) = stores.upsert(obj) {
                error!(error = %e, "accepted object failed to index");
            }
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct BatchReport {
    /// Keys processed to completion; their retry history can be forgotten.
    pub completed: Vec<ChangeKey>,
    /// Keys to re-enqueue with backoff.
    pub retry: Vec<ChangeKey>,
    /// Request buffer length actually submitted.
    pub submitted: usize,
    pub submit_failed: bool,
}

/// Runs batch cycles against the cluster view and the remote inventory.
pub struct Syncer {
    view: Arc<dyn ClusterView>,
    inventory: Arc<dyn InventoryClient>,
    cluster: ClusterIdentity,
}

impl Syncer {
    pub fn new(view: Arc<dyn ClusterView>, inventory: Arc<dyn InventoryClient>, cluster: ClusterIdentity) -> Self {
        Self { view, inventory, cluster }
    }

    fn process(&self, cycle: &mut BatchCycle<'_>, key: &ChangeKey) -> Result<(), NotReady> {
        let staged = match existence(self.view.as_ref(), &self.cluster, key.kind, &key.name, &key.external_id) {
            Existence::Gone => {
                info!(kind = %key.kind, name = %key.name, id = %key.external_id, "backing object gone");
                cycle.stage_delete(key.kind, &key.external_id)
            }
            Existence::Replaced { live } => {
                info!(kind = %key.kind, name = %key.name, id = %key.external_id, live = %live, "backing object recreated");
                cycle.stage_delete(key.kind, &key.external_id)
            }
            Existence::Present => {
                let built = {
                    let ctx = BuildContext { view: self.view.as_ref(), cluster: &self.cluster, lookup: &*cycle };
                    (build::ops(key.kind).build)(&ctx, key)?
                };
                std::iter::once(built.object).chain(built.dependents).try_for_each(|o| cycle.stage(o))
            }
        };
        if let Err(e) = staged {
            error!(key = %key, error = %e, "dropping key");
        }
        Ok(())
    }

    /// Process `keys` as one batch. The mirror stores change only if the remote write succeeds;
    /// on failure every key of the batch is returned for retry.
    pub async fn sync_batch(&self, stores: &mut MirrorStores, keys: Vec<ChangeKey>) -> BatchReport {
        let started = Instant::now();
        let mut report = BatchReport::default();
        let staged = {
            let mut cycle = BatchCycle::new(stores);
            for key in &keys {
                match self.process(&mut cycle, key) {
                    Ok(()) => report.completed.push(key.clone()),
                    Err(NotReady(reason)) => {
                        debug!(key = %key, reason = %reason, "dependency not ready");
                        report.retry.push(key.clone());
                    }
                }
            }
            cycle.finish()
        };

        if !staged.is_empty() {
            match self.inventory.submit_batch(&self.cluster.id, &staged.requests).await {
                Ok(()) => {
                    report.submitted = staged.requests.len();
                    staged.commit(stores);
                }
                Err(e) => {
                    warn!(error = %e, keys = keys.len(), requests = staged.requests.len(), "inventory submit failed; retrying batch");
                    counter!("invsync_submit_errors_total", 1u64);
                    report.submit_failed = true;
                    report.completed.clear();
                    report.retry = keys.clone();
                }
            }
        }

        counter!("invsync_batches_total", 1u64);
        counter!("invsync_retry_keys_total", report.retry.len() as u64);
        histogram!("invsync_batch_keys", keys.len() as f64);
        histogram!("invsync_batch_ms", started.elapsed().as_secs_f64() * 1000.0);
        info!(keys = keys.len(), submitted = report.submitted, retry = report.retry.len(), "batch cycle done");
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use invsync_core::objects::{ApplicationInstance, IngressPolicy};
    use invsync_core::Operation;

    fn instance(id: &str, apps: &[&str]) -> InventoryObject {
        InventoryObject::ApplicationInstance(ApplicationInstance {
            external_id: id.into(),
            display_name: id.into(),
            container_project_id: "ns-1".into(),
            container_application_ids: apps.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        })
    }

    #[test]
    fn staged_adds_shadow_store_and_deletes_hide_it() {
        let mut stores = MirrorStores::new();
        stores.upsert(instance("i1", &["a1"])).unwrap();
        stores.upsert(instance("i2", &["a1"])).unwrap();
        let mut cycle = BatchCycle::new(&stores);
        cycle.stage(instance("i1", &[])).unwrap();
        cycle.stage(instance("i3", &["a1"])).unwrap();
        let ids: Vec<_> = cycle.referencing(Kind::ApplicationInstance, "a1").iter().map(|o| o.external_id().to_string()).collect();
        assert_eq!(ids, vec!["i2", "i3"]);
        cycle.stage_delete(Kind::ApplicationInstance, "i2").unwrap();
        assert!(cycle.current(Kind::ApplicationInstance, "i2").is_none());
        assert_eq!(cycle.requests().len(), 3);
    }

    #[test]
    fn application_delete_strips_references() {
        let mut stores = MirrorStores::new();
        stores
            .upsert(InventoryObject::Application(invsync_core::objects::Application {
                external_id: "a1".into(),
                container_project_id: "ns-1".into(),
                ..Default::default()
            }))
            .unwrap();
        stores.upsert(instance("i1", &["a1", "a2"])).unwrap();
        stores
            .upsert(InventoryObject::IngressPolicy(IngressPolicy {
                external_id: "ing-1".into(),
                container_project_id: "ns-1".into(),
                container_application_ids: vec!["a1".into()],
                ..Default::default()
            }))
            .unwrap();
        let mut cycle = BatchCycle::new(&stores);
        cycle.stage_delete(Kind::Application, "a1").unwrap();
        let ops: Vec<_> = cycle.requests().iter().map(|r| r.operation).collect();
        assert_eq!(ops, vec![Operation::Update, Operation::Update, Operation::Delete]);
        let staged = cycle.finish();
        staged.commit(&mut stores);
        assert!(stores.lookup(Kind::Application, "a1").is_none());
        match stores.lookup(Kind::ApplicationInstance, "i1") {
            Some(InventoryObject::ApplicationInstance(i)) => assert_eq!(i.container_application_ids, vec!["a2"]),
            other => panic!("unexpected {:?}", other),
        }
        match stores.lookup(Kind::IngressPolicy, "ing-1") {
            Some(InventoryObject::IngressPolicy(i)) => assert!(i.container_application_ids.is_empty()),
            other => panic!("unexpected {:?}", other),
        }
        assert!(stores.referencing(Kind::IngressPolicy, "a1").is_empty());
    }

    #[test]
    fn unmirrored_delete_sends_nothing() {
        let stores = MirrorStores::new();
        let mut cycle = BatchCycle::new(&stores);
        cycle.stage_delete(Kind::ApplicationInstance, "ghost").unwrap();
        assert!(cycle.finish().is_empty());
    }
}
