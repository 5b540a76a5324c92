//! Engine state and the three long-lived tasks that share it.
//!
//! The consumer, the batch timer and the garbage collector all go through one async mutex
//! over [`SyncState`]; a batch cycle and a GC pass never interleave.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use invsync_core::ChangeKey;
use invsync_inventory::InventoryClient;
use invsync_kubehub::ClusterView;
use invsync_store::{DeadLetters, MirrorStores, PendingKeys};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::{Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::bootstrap::populate;
use crate::gc::{jittered, GarbageCollector, GcReport};
use crate::orchestrator::{BatchReport, Syncer};
use crate::queue::RetryQueue;
use crate::SyncConfig;

/// Everything the engine lock guards.
#[derive(Default)]
pub struct SyncState {
    pub stores: MirrorStores,
    pub dead_letters: DeadLetters,
    pub pending: PendingKeys,
}

pub struct Engine {
    cfg: SyncConfig,
    state: Mutex<SyncState>,
    syncer: Syncer,
    gc: GarbageCollector,
    inventory: Arc<dyn InventoryClient>,
    queue: RetryQueue,
}

impl Engine {
    pub fn new(
        cfg: SyncConfig,
        view: Arc<dyn ClusterView>,
        inventory: Arc<dyn InventoryClient>,
        queue: RetryQueue,
    ) -> Arc<Self> {
        let syncer = Syncer::new(Arc::clone(&view), Arc::clone(&inventory), cfg.cluster.clone());
        let gc = GarbageCollector::new(view, Arc::clone(&inventory), cfg.cluster.clone());
        Arc::new(Self { cfg, state: Mutex::new(SyncState::default()), syncer, gc, inventory, queue })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.cfg
    }

    pub fn queue(&self) -> &RetryQueue {
        &self.queue
    }

    pub async fn state(&self) -> MutexGuard<'_, SyncState> {
        self.state.lock().await
    }

    /// Populate the mirror, run one GC pass and enqueue the cluster key.
    pub async fn bootstrap(&self) -> Result<()> {
        let mut st = self.state.lock().await;
        let SyncState { stores, dead_letters, .. } = &mut *st;
        let loaded = populate(self.inventory.as_ref(), &self.cfg.cluster.id, stores, dead_letters).await?;
        info!(loaded, dead_letters = dead_letters.len(), "mirror loaded");
        self.gc.run(stores, dead_letters).await;
        self.queue.add(self.cfg.cluster.change_key());
        Ok(())
    }

    /// Add one key to the pending set; flush if the size trigger fires.
    pub async fn accept(&self, key: ChangeKey) -> Option<BatchReport> {
        let mut st = self.state.lock().await;
        st.pending.insert(key);
        if st.pending.len() < self.cfg.batch_size {
            return None;
        }
        debug!(pending = st.pending.len(), "size trigger");
        Some(self.flush_locked(&mut st).await)
    }

    /// Time trigger: flush whatever is pending.
    pub async fn tick(&self) -> Option<BatchReport> {
        let mut st = self.state.lock().await;
        if st.pending.is_empty() {
            return None;
        }
        debug!(pending = st.pending.len(), "time trigger");
        Some(self.flush_locked(&mut st).await)
    }

    pub async fn collect_garbage(&self) -> GcReport {
        let mut st = self.state.lock().await;
        let SyncState { stores, dead_letters, .. } = &mut *st;
        self.gc.run(stores, dead_letters).await
    }

    async fn flush_locked(&self, st: &mut SyncState) -> BatchReport {
        let keys = st.pending.drain();
        let report = self.syncer.sync_batch(&mut st.stores, keys).await;
        for key in &report.completed {
            self.queue.forget(key);
        }
        for key in &report.retry {
            self.queue.add_rate_limited(key.clone());
        }
        st.stores.publish_metrics();
        report
    }

    /// Start the consumer, batch timer and GC tasks. All stop when `shutdown` is cancelled;
    /// a cycle already running completes first.
    pub fn spawn(self: &Arc<Self>, mut rx: UnboundedReceiver<ChangeKey>, shutdown: CancellationToken) -> Vec<JoinHandle<()>> {
        let consumer = {
            let engine = Arc::clone(self);
            let token = shutdown.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        key = rx.recv() => match key {
                            Some(key) => { engine.accept(key).await; }
                            None => break,
                        },
                    }
                }
                info!("change key consumer stopped");
            })
        };

        let timer = {
            let engine = Arc::clone(self);
            let token = shutdown.clone();
            let period = self.cfg.batch_period.max(Duration::from_millis(1));
            tokio::spawn(async move {
                let mut iv = tokio::time::interval(period);
                iv.set_missed_tick_behavior(MissedTickBehavior::Delay);
                iv.tick().await;
                loop {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = iv.tick() => { engine.tick().await; }
                    }
                }
                info!("batch timer stopped");
            })
        };

        let gc = {
            let engine = Arc::clone(self);
            let token = shutdown;
            tokio::spawn(async move {
                loop {
                    let wait = jittered(engine.cfg.gc_interval, engine.cfg.gc_jitter);
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = tokio::time::sleep(wait) => { engine.collect_garbage().await; }
                    }
                }
                info!("garbage collector stopped");
            })
        };

        vec![consumer, timer, gc]
    }
}
