//! invsync inventory: cursor-paginated reads and single-shot batched writes against the
//! remote inventory API.

#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use invsync_core::{InventoryUpdate, Kind};
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// One page of remote objects. `cursor` is `None` on the last page.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Page {
    #[serde(default)]
    pub results: Vec<serde_json::Value>,
    #[serde(default)]
    pub cursor: Option<String>,
}

/// Remote inventory access. Both calls must be safe to retry.
#[async_trait]
pub trait InventoryClient: Send + Sync {
    /// Read one page of `kind` objects owned by `cluster_id`.
    async fn list_paged(&self, kind: Kind, cluster_id: &str, cursor: Option<&str>) -> Result<Page>;

    /// Submit one batch of updates in a single write.
    async fn submit_batch(&self, cluster_id: &str, updates: &[InventoryUpdate]) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct HttpInventoryConfig {
    pub base_url: String,
    pub token: Option<String>,
    pub timeout: Duration,
    pub page_size: usize,
}

impl Default for HttpInventoryConfig {
    fn default() -> Self {
        Self { base_url: "http://127.0.0.1:8080".into(), token: None, timeout: Duration::from_secs(30), page_size: 500 }
    }
}

#[derive(Serialize)]
struct UpdateRequest<'a> {
    updates: &'a [InventoryUpdate],
}

/// [`InventoryClient`] over the inventory REST API.
pub struct HttpInventoryClient {
    client: reqwest::Client,
    cfg: HttpInventoryConfig,
}

impl HttpInventoryClient {
    pub fn new(cfg: HttpInventoryConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(cfg.timeout)
            .build()
            .context("creating inventory http client")?;
        Ok(Self { client, cfg })
    }

    fn cluster_url(&self, cluster_id: &str, tail: &str) -> String {
        format!("{}/api/v1/inventory/clusters/{}/{}", self.cfg.base_url.trim_end_matches('/'), cluster_id, tail)
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.cfg.token {
            Some(t) => req.bearer_auth(t),
            None => req,
        }
    }
}

#[async_trait]
impl InventoryClient for HttpInventoryClient {
    async fn list_paged(&self, kind: Kind, cluster_id: &str, cursor: Option<&str>) -> Result<Page> {
        let started = Instant::now();
        let page_size = self.cfg.page_size.to_string();
        let mut query: Vec<(&str, &str)> = vec![("resource_type", kind.resource_type()), ("page_size", page_size.as_str())];
        if let Some(c) = cursor {
            query.push(("cursor", c));
        }
        let req = self.client.get(self.cluster_url(cluster_id, "objects")).query(&query);
        let resp = self
            .authorize(req)
            .send()
            .await
            .with_context(|| format!("listing {} objects", kind))?
            .error_for_status()
            .with_context(|| format!("listing {} objects", kind))?;
        let page: Page = resp.json().await.context("decoding inventory page")?;
        histogram!("invsync_inventory_list_ms", started.elapsed().as_secs_f64() * 1000.0);
        debug!(kind = %kind, count = page.results.len(), more = page.cursor.is_some(), "inventory page");
        Ok(page)
    }

    async fn submit_batch(&self, cluster_id: &str, updates: &[InventoryUpdate]) -> Result<()> {
        let started = Instant::now();
        let req = self.client.post(self.cluster_url(cluster_id, "updates")).json(&UpdateRequest { updates });
        let resp = self.authorize(req).send().await.context("submitting inventory batch")?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            counter!("invsync_inventory_submit_rejected_total", 1u64);
            return Err(anyhow!("inventory rejected batch of {}: {} {}", updates.len(), status, body));
        }
        histogram!("invsync_inventory_submit_ms", started.elapsed().as_secs_f64() * 1000.0);
        Ok(())
    }
}

// ----------------- Mock implementation -----------------

/// In-memory inventory for tests. Pages are served from seeded objects; cursors are offsets.
pub struct MockInventory {
    objects: Mutex<HashMap<Kind, Vec<serde_json::Value>>>,
    submitted: Mutex<Vec<Vec<InventoryUpdate>>>,
    page_size: usize,
    fail_submits: AtomicBool,
    fail_next: AtomicUsize,
    fail_list: AtomicBool,
}

impl Default for MockInventory {
    fn default() -> Self { Self::with_page_size(2) }
}

impl MockInventory {
    pub fn new() -> Self { Self::default() }

    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            objects: Mutex::new(HashMap::new()),
            submitted: Mutex::new(Vec::new()),
            page_size: page_size.max(1),
            fail_submits: AtomicBool::new(false),
            fail_next: AtomicUsize::new(0),
            fail_list: AtomicBool::new(false),
        }
    }

    pub fn seed(&self, kind: Kind, objects: Vec<serde_json::Value>) {
        self.objects.lock().unwrap_or_else(PoisonError::into_inner).insert(kind, objects);
    }

    /// Fail every submit until switched off.
    pub fn set_fail_submits(&self, on: bool) { self.fail_submits.store(on, Ordering::SeqCst) }

    /// Fail the next `n` submits.
    pub fn fail_next_submits(&self, n: usize) { self.fail_next.store(n, Ordering::SeqCst) }

    pub fn set_fail_list(&self, on: bool) { self.fail_list.store(on, Ordering::SeqCst) }

    /// Batches accepted so far, in submission order.
    pub fn submitted(&self) -> Vec<Vec<InventoryUpdate>> {
        self.submitted.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn submit_count(&self) -> usize {
        self.submitted.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[async_trait]
impl InventoryClient for MockInventory {
    async fn list_paged(&self, kind: Kind, _cluster_id: &str, cursor: Option<&str>) -> Result<Page> {
        if self.fail_list.load(Ordering::SeqCst) {
            return Err(anyhow!("mock inventory: list unavailable"));
        }
        let start: usize = match cursor {
            Some(c) => c.parse().context("mock inventory: bad cursor")?,
            None => 0,
        };
        let objects = self.objects.lock().unwrap_or_else(PoisonError::into_inner);
        let all = objects.get(&kind).map(Vec::as_slice).unwrap_or_default();
        let end = (start + self.page_size).min(all.len());
        let results = all.get(start..end).map(<[_]>::to_vec).unwrap_or_default();
        let cursor = (end < all.len()).then(|| end.to_string());
        Ok(Page { results, cursor })
    }

    async fn submit_batch(&self, _cluster_id: &str, updates: &[InventoryUpdate]) -> Result<()> {
        if self.fail_submits.load(Ordering::SeqCst) {
            return Err(anyhow!("mock inventory: submit unavailable"));
        }
        let pending_failures = self.fail_next.load(Ordering::SeqCst);
        if pending_failures > 0 {
            self.fail_next.store(pending_failures - 1, Ordering::SeqCst);
            return Err(anyhow!("mock inventory: injected submit failure"));
        }
        self.submitted.lock().unwrap_or_else(PoisonError::into_inner).push(updates.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obj(id: &str) -> serde_json::Value {
        serde_json::json!({ "resource_type": "ContainerProject", "external_id": id })
    }

    #[tokio::test]
    async fn mock_pages_follow_cursor_to_the_end() {
        let inv = MockInventory::with_page_size(2);
        inv.seed(Kind::Project, vec![obj("a"), obj("b"), obj("c")]);
        let p1 = inv.list_paged(Kind::Project, "c1", None).await.unwrap();
        assert_eq!(p1.results.len(), 2);
        let p2 = inv.list_paged(Kind::Project, "c1", p1.cursor.as_deref()).await.unwrap();
        assert_eq!(p2.results.len(), 1);
        assert!(p2.cursor.is_none());
        let empty = inv.list_paged(Kind::Application, "c1", None).await.unwrap();
        assert!(empty.results.is_empty() && empty.cursor.is_none());
    }

    #[tokio::test]
    async fn mock_injected_failures_are_consumed() {
        let inv = MockInventory::new();
        inv.fail_next_submits(1);
        let batch = vec![InventoryUpdate::delete(Kind::Project, "p1")];
        assert!(inv.submit_batch("c1", &batch).await.is_err());
        assert!(inv.submit_batch("c1", &batch).await.is_ok());
        assert_eq!(inv.submit_count(), 1);
    }

    #[test]
    fn cluster_url_trims_trailing_slash() {
        let cfg = HttpInventoryConfig { base_url: "https://inv.example.com/".into(), ..Default::default() };
        let c = HttpInventoryClient::new(cfg).unwrap();
        assert_eq!(c.cluster_url("c1", "updates"), "https://inv.example.com/api/v1/inventory/clusters/c1/updates");
    }

    #[test]
    fn page_decodes_without_cursor() {
        let p: Page = serde_json::from_value(serde_json::json!({ "results": [obj("a")] })).unwrap();
        assert_eq!(p.results.len(), 1);
        assert!(p.cursor.is_none());
    }
}
