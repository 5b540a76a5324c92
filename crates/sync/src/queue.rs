//! Rate-limited retry queue.
//!
//! Watch adapters and retries share one channel into the consumer task. A failed key is
//! re-sent after `min(min_backoff * 2^failures, max_backoff)`; success forgets the count.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use invsync_core::ChangeKey;
use rustc_hash::FxHashMap;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, trace};

#[derive(Clone)]
pub struct RetryQueue {
    tx: UnboundedSender<ChangeKey>,
    failures: Arc<Mutex<FxHashMap<ChangeKey, u32>>>,
    min_backoff: Duration,
    max_backoff: Duration,
}

impl RetryQueue {
    pub fn new(min_backoff: Duration, max_backoff: Duration) -> (Self, UnboundedReceiver<ChangeKey>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let q = Self { tx, failures: Arc::new(Mutex::new(FxHashMap::default())), min_backoff, max_backoff };
        (q, rx)
    }

    /// Sender handed to watch adapters.
    pub fn sender(&self) -> UnboundedSender<ChangeKey> {
        self.tx.clone()
    }

    /// Enqueue immediately.
    pub fn add(&self, key: ChangeKey) {
        if self.tx.send(key).is_err() {
            debug!("retry queue closed; dropping key");
        }
    }

    /// Delay before the next attempt after `failures` previous failures.
    pub fn backoff(&self, failures: u32) -> Duration {
        let factor = 1u32.checked_shl(failures.min(31)).unwrap_or(u32::MAX);
        self.min_backoff.saturating_mul(factor).min(self.max_backoff)
    }

    /// Re-enqueue after this key's backoff; returns the delay used.
    pub fn add_rate_limited(&self, key: ChangeKey) -> Duration {
        let delay = {
            let mut failures = self.failures.lock().unwrap_or_else(PoisonError::into_inner);
            let n = failures.entry(key.clone()).or_insert(0);
            let delay = self.backoff(*n);
            *n = n.saturating_add(1);
            delay
        };
        trace!(key = %key, delay_ms = delay.as_millis() as u64, "scheduling retry");
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(key);
        });
        delay
    }

    /// Clear the failure count of a key that was processed successfully.
    pub fn forget(&self, key: &ChangeKey) {
        self.failures.lock().unwrap_or_else(PoisonError::into_inner).remove(key);
    }

    pub fn failures(&self, key: &ChangeKey) -> u32 {
        self.failures.lock().unwrap_or_else(PoisonError::into_inner).get(key).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use invsync_core::{Kind, NamespacedName};

    fn key(id: &str) -> ChangeKey {
        ChangeKey::new(Kind::ApplicationInstance, id, NamespacedName::namespaced("shop", id))
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let (q, _rx) = RetryQueue::new(Duration::from_secs(1), Duration::from_secs(10));
        assert_eq!(q.backoff(0), Duration::from_secs(1));
        assert_eq!(q.backoff(1), Duration::from_secs(2));
        assert_eq!(q.backoff(3), Duration::from_secs(8));
        assert_eq!(q.backoff(4), Duration::from_secs(10));
        assert_eq!(q.backoff(200), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limited_key_arrives_after_backoff() {
        let (q, mut rx) = RetryQueue::new(Duration::from_secs(1), Duration::from_secs(60));
        let k = key("a");
        assert_eq!(q.add_rate_limited(k.clone()), Duration::from_secs(1));
        assert_eq!(q.add_rate_limited(k.clone()), Duration::from_secs(2));
        assert_eq!(q.failures(&k), 2);
        let started = tokio::time::Instant::now();
        assert_eq!(rx.recv().await, Some(k.clone()));
        assert!(started.elapsed() >= Duration::from_secs(1));
        q.forget(&k);
        assert_eq!(q.failures(&k), 0);
    }

    #[tokio::test]
    async fn add_is_immediate() {
        let (q, mut rx) = RetryQueue::new(Duration::from_secs(1), Duration::from_secs(60));
        q.add(key("b"));
        assert_eq!(rx.try_recv().ok(), Some(key("b")));
    }
}
