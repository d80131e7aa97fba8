//! Cached reachability checks for registered services.
use std::{sync::Arc, time::Duration};

use futures_util::future::join_all;
use scc::HashMap;
use tokio::time::Instant;

use crate::{
    core::service::{ServiceId, ServiceRecord},
    ports::http_client::HttpClient,
};

#[derive(Debug, Clone, Copy)]
struct CachedStatus {
    up: bool,
    checked_at: Instant,
}

/// Reachability of registered services, as shown in registry listings.
///
/// Each answer is cached per service id for `ttl` so listing endpoints do not fan out a
/// probe per request. Routing never consults this.
pub struct StatusProbe {
    client: Arc<dyn HttpClient>,
    path: String,
    timeout: Duration,
    ttl: Duration,
    cache: HashMap<ServiceId, CachedStatus>,
}

impl StatusProbe {
    pub fn new(client: Arc<dyn HttpClient>, path: impl Into<String>, timeout: Duration, ttl: Duration) -> Self {
        Self {
            client,
            path: path.into(),
            timeout,
            ttl,
            cache: HashMap::new(),
        }
    }

    pub async fn is_up(&self, service: &ServiceRecord) -> bool {
        let now = Instant::now();
        if let Some(entry) = self.cache.get_async(&service.id).await {
            let cached = *entry.get();
            if now.duration_since(cached.checked_at) < self.ttl {
                return cached.up;
            }
        }

        let up = self.check(service).await;
        let fresh = CachedStatus {
            up,
            checked_at: Instant::now(),
        };
        self.cache
            .entry_async(service.id)
            .await
            .and_modify(|cached| *cached = fresh)
            .or_insert(fresh);
        up
    }

    /// Drop the cached answer for a service that left the registry.
    pub async fn forget(&self, id: ServiceId) {
        self.cache.remove_async(&id).await;
    }

    /// Number of services with a cached answer.
    pub fn cached(&self) -> usize {
        self.cache.len()
    }

    /// Probe several services concurrently; results follow input order.
    pub async fn statuses(&self, services: &[ServiceRecord]) -> Vec<bool> {
        join_all(services.iter().map(|service| self.is_up(service))).await
    }

    async fn check(&self, service: &ServiceRecord) -> bool {
        let url = service.url.join(&self.path);
        match self.client.probe(&url, self.timeout).await {
            Ok(up) => {
                tracing::debug!(service = %service.name, up, "Status probed");
                up
            }
            Err(e) => {
                tracing::warn!("Failed to retrieve status from '{}': {}", service.name, e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use async_trait::async_trait;
    use axum::body::Body as AxumBody;
    use hyper::{Request, Response};

    use super::*;
    use crate::{
        core::{backend::BackendUrl, service::Credential},
        ports::http_client::{HttpClientError, HttpClientResult},
    };

    const TTL: Duration = Duration::from_secs(4);

    #[derive(Default)]
    struct CountingProbe {
        calls: AtomicUsize,
        up: AtomicBool,
        time_out: AtomicBool,
    }

    #[async_trait]
    impl HttpClient for CountingProbe {
        async fn send_request(&self, _req: Request<AxumBody>) -> HttpClientResult<Response<AxumBody>> {
            Err(HttpClientError::InvalidRequest("unused".to_string()))
        }

        async fn probe(&self, url: &str, timeout: Duration) -> HttpClientResult<bool> {
            assert!(url.ends_with("/health"));
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.time_out.load(Ordering::SeqCst) {
                return Err(HttpClientError::Timeout(timeout));
            }
            Ok(self.up.load(Ordering::SeqCst))
        }

        async fn fetch_json(&self, url: &str, _timeout: Duration) -> HttpClientResult<serde_json::Value> {
            Err(HttpClientError::ConnectionError(url.to_string()))
        }
    }

    fn service(id: ServiceId) -> ServiceRecord {
        ServiceRecord {
            id,
            name: format!("svc{id}"),
            url: BackendUrl::new("http://svc").unwrap(),
            path: "^/".to_string(),
            blocked: false,
            credential: Credential::new("k"),
        }
    }

    fn probe_with(client: &Arc<CountingProbe>) -> StatusProbe {
        StatusProbe::new(client.clone(), "/health", Duration::from_secs(1), TTL)
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_is_cached_for_ttl() {
        let client = Arc::new(CountingProbe::default());
        client.up.store(true, Ordering::SeqCst);
        let probe = probe_with(&client);

        assert!(probe.is_up(&service(1)).await);
        client.up.store(false, Ordering::SeqCst);
        assert!(probe.is_up(&service(1)).await);
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(TTL).await;
        assert!(!probe.is_up(&service(1)).await);
        assert_eq!(client.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_is_per_service() {
        let client = Arc::new(CountingProbe::default());
        let probe = probe_with(&client);

        probe.statuses(&[service(1), service(2)]).await;
        probe.statuses(&[service(1), service(2)]).await;
        assert_eq!(client.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_probe_error_reports_down() {
        let client = Arc::new(CountingProbe::default());
        client.up.store(true, Ordering::SeqCst);
        client.time_out.store(true, Ordering::SeqCst);
        let probe = probe_with(&client);

        assert_eq!(probe.statuses(&[service(1)]).await, vec![false]);
    }

    #[tokio::test]
    async fn test_forget_evicts_cached_status() {
        let client = Arc::new(CountingProbe::default());
        let probe = probe_with(&client);

        probe.statuses(&[service(1), service(2)]).await;
        assert_eq!(probe.cached(), 2);

        probe.forget(1).await;
        assert_eq!(probe.cached(), 1);

        probe.is_up(&service(1)).await;
        assert_eq!(client.calls.load(Ordering::SeqCst), 3);
    }
}
