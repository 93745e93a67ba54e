//! Selects storage destinations from a dynamic, health-filtered pool.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::errors::BlobError;

/// Pluggable probe that returns the subset of configured storage nodes
/// currently acceptable for placement. Implementations may reorder the
/// result (e.g. ascending by load) — the router preserves that order.
#[async_trait]
pub trait HealthAdapter: Send + Sync {
    async fn available(&self, candidates: &[String]) -> Vec<String>;
}

struct RouterState {
    configured: Vec<String>,
    next: usize,
}

/// Maintains the configured storage pool, filters it by health, and
/// assigns parts to destinations round-robin.
pub struct Router {
    state: Mutex<RouterState>,
    health: Box<dyn HealthAdapter>,
}

impl Router {
    pub fn new(health: Box<dyn HealthAdapter>) -> Self {
        Self {
            state: Mutex::new(RouterState {
                configured: Vec::new(),
                next: 0,
            }),
            health,
        }
    }

    /// Replace the configured list and reset the round-robin cursor.
    pub fn set(&self, storages: Vec<String>) {
        let mut state = self.state.lock().unwrap();
        state.configured = storages;
        state.next = 0;
    }

    /// Append unique, non-empty entries, preserving existing order and
    /// cursor.
    pub fn add(&self, storages: &[String]) {
        if storages.is_empty() {
            return;
        }
        let mut state = self.state.lock().unwrap();
        for raw in storages {
            let storage = raw.trim();
            if storage.is_empty() {
                continue;
            }
            if !state.configured.iter().any(|s| s == storage) {
                state.configured.push(storage.to_string());
            }
        }
    }

    /// Pick `count` destinations, round-robin with wrap-around over the
    /// health-filtered pool (falling back to the raw configured snapshot
    /// if the health adapter returns nothing).
    pub async fn allocate(&self, count: usize) -> Result<Vec<String>, BlobError> {
        let snapshot = {
            let state = self.state.lock().unwrap();
            state.configured.clone()
        };
        if snapshot.is_empty() {
            return Err(BlobError::NoStorage);
        }

        let mut available = self.health.available(&snapshot).await;
        if available.is_empty() {
            debug!("health adapter returned no candidates, falling back to configured snapshot");
            available = snapshot;
        }

        let start = {
            let mut state = self.state.lock().unwrap();
            let start = state.next % available.len();
            state.next = (start + count) % available.len();
            start
        };

        let result = (0..count)
            .map(|i| available[(start + i) % available.len()].clone())
            .collect();
        Ok(result)
    }
}

#[derive(Debug, Deserialize)]
struct StorageHealth {
    ok: bool,
    #[serde(default)]
    total_bytes: i64,
}

/// Default health adapter: probes `GET {base}/health` with a short
/// per-probe timeout, keeps bases reporting `ok == true` with
/// `total_bytes <= max_storage_load_bytes` (unlimited when <= 0), sorted
/// ascending by `total_bytes`.
pub struct DefaultHealthAdapter {
    client: reqwest::Client,
    max_storage_load_bytes: i64,
}

impl DefaultHealthAdapter {
    pub fn new(max_storage_load_bytes: i64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(2))
            .build()
            .expect("failed to build health-probe HTTP client");
        Self {
            client,
            max_storage_load_bytes,
        }
    }

    fn load_acceptable(&self, load: i64) -> bool {
        self.max_storage_load_bytes <= 0 || load <= self.max_storage_load_bytes
    }

    async fn probe(&self, base: &str) -> Option<StorageHealth> {
        let url = format!("{}/health", base.trim_end_matches('/'));
        let resp = self.client.get(&url).send().await.ok()?;
        if !resp.status().is_success() {
            return None;
        }
        resp.json::<StorageHealth>().await.ok()
    }
}

#[async_trait]
impl HealthAdapter for DefaultHealthAdapter {
    async fn available(&self, candidates: &[String]) -> Vec<String> {
        let mut ready = Vec::with_capacity(candidates.len());
        for base in candidates {
            let Some(info) = self.probe(base).await else {
                continue;
            };
            if !info.ok || !self.load_acceptable(info.total_bytes) {
                continue;
            }
            ready.push((base.clone(), info.total_bytes));
        }
        ready.sort_by_key(|(_, load)| *load);
        ready.into_iter().map(|(base, _)| base).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AllHealthy;
    #[async_trait]
    impl HealthAdapter for AllHealthy {
        async fn available(&self, candidates: &[String]) -> Vec<String> {
            candidates.to_vec()
        }
    }

    struct NoneHealthy;
    #[async_trait]
    impl HealthAdapter for NoneHealthy {
        async fn available(&self, _candidates: &[String]) -> Vec<String> {
            Vec::new()
        }
    }

    fn urls(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("http://node{i}")).collect()
    }

    #[tokio::test]
    async fn allocate_errors_on_empty_pool() {
        let router = Router::new(Box::new(AllHealthy));
        let err = router.allocate(1).await.unwrap_err();
        assert!(matches!(err, BlobError::NoStorage));
    }

    #[tokio::test]
    async fn allocate_round_robins_with_wraparound() {
        let router = Router::new(Box::new(AllHealthy));
        router.set(urls(3));

        let first = router.allocate(4).await.unwrap();
        let second = router.allocate(4).await.unwrap();

        assert_eq!(first.len(), 4);
        assert_eq!(second.len(), 4);
        // cursor advances by 8 (mod 3) across both calls: 0,1,2,0 then 1,2,0,1
        assert_eq!(first, vec!["http://node0", "http://node1", "http://node2", "http://node0"]);
        assert_eq!(second, vec!["http://node1", "http://node2", "http://node0", "http://node1"]);
    }

    #[tokio::test]
    async fn allocate_falls_back_when_health_adapter_empty() {
        let router = Router::new(Box::new(NoneHealthy));
        router.set(urls(2));
        let result = router.allocate(2).await.unwrap();
        assert_eq!(result.len(), 2);
    }

    #[tokio::test]
    async fn add_deduplicates() {
        let router = Router::new(Box::new(AllHealthy));
        router.set(vec!["http://a".to_string()]);
        router.add(&["http://a".to_string(), "http://b".to_string()]);
        let result = router.allocate(3).await.unwrap();
        let distinct: std::collections::HashSet<_> = result.iter().collect();
        assert_eq!(distinct.len(), 2);
    }

    #[tokio::test]
    async fn set_resets_cursor() {
        let router = Router::new(Box::new(AllHealthy));
        router.set(urls(3));
        let _ = router.allocate(2).await.unwrap();
        router.set(urls(2));
        let result = router.allocate(2).await.unwrap();
        assert_eq!(result, vec!["http://node0", "http://node1"]);
    }

    /// Spins up a real `/health` endpoint on an ephemeral port, returning
    /// `{ok, total_bytes}` with the given body, and reports its base URL.
    async fn spawn_health_endpoint(ok: bool, total_bytes: i64) -> String {
        let app = axum::Router::new().route(
            "/health",
            axum::routing::get(move || async move {
                axum::Json(serde_json::json!({"ok": ok, "total_bytes": total_bytes}))
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });
        format!("http://{addr}")
    }

    /// A `/health` endpoint that always responds `500`.
    async fn spawn_failing_health_endpoint() -> String {
        let app = axum::Router::new().route(
            "/health",
            axum::routing::get(|| async { axum::http::StatusCode::INTERNAL_SERVER_ERROR }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn default_health_adapter_excludes_unreachable_and_failing_nodes() {
        let healthy = spawn_health_endpoint(true, 10).await;
        let failing = spawn_failing_health_endpoint().await;
        // Nothing is listening on this port: connection refused.
        let unreachable = "http://127.0.0.1:1".to_string();

        let adapter = DefaultHealthAdapter::new(0);
        let candidates = vec![healthy.clone(), failing, unreachable];
        let available = adapter.available(&candidates).await;

        assert_eq!(available, vec![healthy]);
    }

    #[tokio::test]
    async fn default_health_adapter_sorts_ascending_by_load() {
        let loaded = spawn_health_endpoint(true, 1000).await;
        let light = spawn_health_endpoint(true, 10).await;

        let adapter = DefaultHealthAdapter::new(0);
        let available = adapter.available(&[loaded.clone(), light.clone()]).await;

        assert_eq!(available, vec![light, loaded]);
    }

    #[tokio::test]
    async fn default_health_adapter_respects_max_load() {
        let loaded = spawn_health_endpoint(true, 1000).await;
        let light = spawn_health_endpoint(true, 10).await;

        let adapter = DefaultHealthAdapter::new(100);
        let available = adapter.available(&[loaded, light.clone()]).await;

        assert_eq!(available, vec![light]);
    }

    #[tokio::test]
    async fn allocate_excludes_unhealthy_storage_end_to_end() {
        let healthy_a = spawn_health_endpoint(true, 5).await;
        let healthy_b = spawn_health_endpoint(true, 15).await;
        let unhealthy = spawn_health_endpoint(false, 0).await;

        let router = Router::new(Box::new(DefaultHealthAdapter::new(0)));
        router.set(vec![healthy_a.clone(), healthy_b.clone(), unhealthy]);

        let destinations = router.allocate(4).await.unwrap();
        assert!(destinations.iter().all(|d| d == &healthy_a || d == &healthy_b));
        assert_eq!(destinations.len(), 4);
    }
}
