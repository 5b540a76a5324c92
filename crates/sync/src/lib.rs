//! invsync engine: mirrors cluster topology into a remote inventory.
//!
//! Change keys arrive from watch adapters through a rate-limited [`queue::RetryQueue`], collect
//! in a deduplicating pending set and flush on size or time. Each flush builds canonical objects,
//! diffs them against the mirror stores, submits one remote write and commits only on success.
//! A jittered garbage collector reconciles the mirror against cluster truth.

#![forbid(unsafe_code)]

use std::time::Duration;

use invsync_kubehub::ClusterIdentity;

pub mod bootstrap;
pub mod build;
pub mod diff;
pub mod gc;
pub mod orchestrator;
pub mod queue;
pub mod runtime;

pub use diff::{diff, Diff, Verdict};
pub use gc::{GarbageCollector, GcReport};
pub use orchestrator::{BatchReport, Syncer};
pub use queue::RetryQueue;
pub use runtime::{Engine, SyncState};

/// Engine tunables. Plain values; nothing here is cross-validated.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub cluster: ClusterIdentity,
    /// Flush once this many distinct keys are pending.
    pub batch_size: usize,
    /// Flush a non-empty pending set at least this often.
    pub batch_period: Duration,
    pub gc_interval: Duration,
    /// Extra random delay added to each GC wait, as a fraction of `gc_interval`.
    pub gc_jitter: f64,
    pub retry_min_backoff: Duration,
    pub retry_max_backoff: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            cluster: ClusterIdentity { id: String::new(), name: "kubernetes".into() },
            batch_size: 100,
            batch_period: Duration::from_secs(60),
            gc_interval: Duration::from_secs(600),
            gc_jitter: 0.1,
            retry_min_backoff: Duration::from_secs(1),
            retry_max_backoff: Duration::from_secs(300),
        }
    }
}
