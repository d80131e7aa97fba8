//! Freshness management for the routing table.
//!
//! Readers get the installed table through a lock-free [`ArcSwap`] load. When the table
//! is stale, the first reader to notice flips the state to [`CachePhase::Regenerating`]
//! under a short mutex and rebuilds from the registry; every reader arriving meanwhile
//! keeps receiving the last good table. A failed rebuild keeps that table and backs off
//! before the registry is asked again.
//!
//! Staleness bound: a table is served for at most `staleness` after it was built, plus
//! the duration of the rebuild that replaces it. While the registry keeps failing, reads
//! keep serving the last good table and a retry happens once per `backoff`.
use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use arc_swap::ArcSwap;
use tokio::time::Instant;

use crate::{
    core::routing::RoutingTable,
    metrics::{self, Outcome},
    ports::registry::ServiceRegistry,
};

/// Where the cache is in its refresh cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachePhase {
    /// The installed table is within its staleness window.
    Fresh,
    /// One caller is rebuilding; the others read the previous table.
    Regenerating,
    /// The last rebuild failed; the previous table is served until the backoff elapses.
    Backoff,
}

#[derive(Debug)]
struct CacheState {
    phase: CachePhase,
    valid_until: Instant,
    /// Set when a refresh is requested while a rebuild is already running.
    refresh_requested: bool,
}

struct CacheInner {
    registry: Arc<dyn ServiceRegistry>,
    table: ArcSwap<RoutingTable>,
    state: Mutex<CacheState>,
    staleness: Duration,
    backoff: Duration,
}

impl CacheInner {
    fn lock_state(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn regenerate(&self) -> Arc<RoutingTable> {
        let result = self.registry.list_active().await;
        let now = Instant::now();

        match result {
            Ok(snapshot) => {
                let table = Arc::new(RoutingTable::build(&snapshot));
                self.table.store(table.clone());

                let mut state = self.lock_state();
                state.phase = CachePhase::Fresh;
                state.valid_until = if std::mem::take(&mut state.refresh_requested) {
                    now
                } else {
                    now + self.staleness
                };
                drop(state);

                tracing::debug!(routes = table.len(), "Routing table regenerated");
                metrics::record_routing_table_rebuild(Outcome::Success, Some(table.len()));
                table
            }
            Err(e) => {
                self.enter_backoff(now);
                tracing::warn!(
                    "Failed to regenerate routing table, serving last good table for {:?}: {}",
                    self.backoff,
                    e
                );
                metrics::record_routing_table_rebuild(Outcome::Failure, None);
                self.table.load_full()
            }
        }
    }

    fn enter_backoff(&self, now: Instant) {
        let mut state = self.lock_state();
        state.phase = CachePhase::Backoff;
        state.refresh_requested = false;
        state.valid_until = now + self.backoff;
    }
}

/// Process-wide routing table holder. Cheap to clone.
#[derive(Clone)]
pub struct RoutingTableCache {
    inner: Arc<CacheInner>,
}

impl RoutingTableCache {
    /// Create a cache that starts empty and stale, so the first read builds the table.
    pub fn new(registry: Arc<dyn ServiceRegistry>, staleness: Duration, backoff: Duration) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                registry,
                table: ArcSwap::from_pointee(RoutingTable::empty()),
                state: Mutex::new(CacheState {
                    phase: CachePhase::Fresh,
                    valid_until: Instant::now(),
                    refresh_requested: false,
                }),
                staleness,
                backoff,
            }),
        }
    }

    /// Build the first table eagerly, typically at startup.
    pub async fn initialize(&self) -> Arc<RoutingTable> {
        self.current().await
    }

    /// The table to route the current request with.
    ///
    /// Returns immediately unless the table is stale and this caller won the right to
    /// rebuild it, in which case it waits for that rebuild. The rebuild itself runs as a
    /// detached task so that dropping this future cannot leave the cache stuck in
    /// `Regenerating`.
    pub async fn current(&self) -> Arc<RoutingTable> {
        if !self.try_begin_regeneration() {
            return self.inner.table.load_full();
        }

        let inner = self.inner.clone();
        let rebuild = tokio::spawn(async move { inner.regenerate().await });

        match rebuild.await {
            Ok(table) => table,
            Err(e) => {
                tracing::error!("Routing table rebuild task failed: {}", e);
                self.inner.enter_backoff(Instant::now());
                self.inner.table.load_full()
            }
        }
    }

    /// The installed table, never triggering a rebuild.
    pub fn snapshot(&self) -> Arc<RoutingTable> {
        self.inner.table.load_full()
    }

    /// Make the next read rebuild, e.g. after the registry was written to.
    pub fn mark_stale(&self) {
        let mut state = self.inner.lock_state();
        match state.phase {
            CachePhase::Regenerating => state.refresh_requested = true,
            CachePhase::Fresh | CachePhase::Backoff => {
                state.phase = CachePhase::Fresh;
                state.valid_until = Instant::now();
            }
        }
    }

    pub fn phase(&self) -> CachePhase {
        self.inner.lock_state().phase
    }

    fn try_begin_regeneration(&self) -> bool {
        let mut state = self.inner.lock_state();
        if state.phase == CachePhase::Regenerating || Instant::now() < state.valid_until {
            return false;
        }
        state.phase = CachePhase::Regenerating;
        true
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use async_trait::async_trait;
    use tokio::sync::Semaphore;

    use super::*;
    use crate::{
        core::{
            backend::BackendUrl,
            service::{Credential, NewService, ServiceId, ServicePatch, ServiceRecord},
        },
        ports::registry::{ListQuery, RegistryError, RegistryResult},
    };

    const STALENESS: Duration = Duration::from_secs(2);
    const BACKOFF: Duration = Duration::from_secs(10);

    /// Registry whose reads can be held open, made to fail, and counted.
    struct ScriptedRegistry {
        records: Mutex<Vec<ServiceRecord>>,
        gate: Semaphore,
        fail: AtomicBool,
        calls: AtomicUsize,
    }

    impl ScriptedRegistry {
        fn new(open: bool) -> Arc<Self> {
            Arc::new(Self {
                records: Mutex::new(Vec::new()),
                gate: Semaphore::new(if open { Semaphore::MAX_PERMITS } else { 0 }),
                fail: AtomicBool::new(false),
                calls: AtomicUsize::new(0),
            })
        }

        fn set_routes(&self, patterns: &[&str]) {
            let records = patterns
                .iter()
                .enumerate()
                .map(|(i, pattern)| ServiceRecord {
                    id: i as ServiceId + 1,
                    name: format!("svc{i}"),
                    url: BackendUrl::new("http://backend").unwrap(),
                    path: pattern.to_string(),
                    blocked: false,
                    credential: Credential::new("k"),
                })
                .collect();
            *self.records.lock().unwrap() = records;
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ServiceRegistry for ScriptedRegistry {
        async fn list_active(&self) -> RegistryResult<Vec<ServiceRecord>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            // each `add_permits(1)` admits exactly one read
            self.gate.acquire().await.expect("gate closed").forget();
            if self.fail.load(Ordering::SeqCst) {
                return Err(RegistryError::Unavailable("connection refused".to_string()));
            }
            Ok(self.records.lock().unwrap().clone())
        }

        async fn list(&self, _query: ListQuery) -> RegistryResult<Vec<ServiceRecord>> {
            self.list_active().await
        }

        async fn get(&self, id: ServiceId) -> RegistryResult<ServiceRecord> {
            Err(RegistryError::NotFound(id))
        }

        async fn insert(&self, _service: NewService) -> RegistryResult<ServiceRecord> {
            unimplemented!("not used by cache tests")
        }

        async fn update(&self, id: ServiceId, _patch: ServicePatch) -> RegistryResult<ServiceRecord> {
            Err(RegistryError::NotFound(id))
        }

        async fn delete(&self, id: ServiceId) -> RegistryResult<ServiceRecord> {
            Err(RegistryError::NotFound(id))
        }
    }

    fn cache_for(registry: &Arc<ScriptedRegistry>) -> RoutingTableCache {
        RoutingTableCache::new(registry.clone(), STALENESS, BACKOFF)
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_read_builds_then_serves_cached() {
        let registry = ScriptedRegistry::new(true);
        registry.set_routes(&["^/a.*"]);
        let cache = cache_for(&registry);

        assert_eq!(cache.initialize().await.len(), 1);
        assert_eq!(cache.phase(), CachePhase::Fresh);

        registry.set_routes(&["^/a.*", "^/b.*"]);
        assert_eq!(cache.current().await.len(), 1);
        assert_eq!(registry.calls(), 1);

        tokio::time::advance(STALENESS).await;
        assert_eq!(cache.current().await.len(), 2);
        assert_eq!(registry.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_readers_see_previous_table_during_rebuild() {
        let registry = ScriptedRegistry::new(false);
        registry.set_routes(&["^/a.*"]);
        let cache = cache_for(&registry);

        registry.gate.add_permits(1);
        let first = cache.initialize().await;
        assert_eq!(first.len(), 1);

        tokio::time::advance(STALENESS).await;
        registry.set_routes(&["^/a.*", "^/b.*"]);

        let rebuilding = tokio::spawn({
            let cache = cache.clone();
            async move { cache.current().await }
        });
        while cache.phase() != CachePhase::Regenerating {
            tokio::task::yield_now().await;
        }

        for _ in 0..5 {
            let seen = cache.current().await;
            assert!(Arc::ptr_eq(&seen, &first));
        }
        // single flight: only the winning reader reached the registry
        assert_eq!(registry.calls(), 2);

        registry.gate.add_permits(1);
        let rebuilt = rebuilding.await.unwrap();
        assert_eq!(rebuilt.len(), 2);
        assert_eq!(cache.current().await.len(), 2);
        assert_eq!(cache.phase(), CachePhase::Fresh);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_rebuild_keeps_last_good_table_and_backs_off() {
        let registry = ScriptedRegistry::new(true);
        registry.set_routes(&["^/a.*"]);
        let cache = cache_for(&registry);
        cache.initialize().await;

        registry.fail.store(true, Ordering::SeqCst);
        tokio::time::advance(STALENESS).await;

        assert_eq!(cache.current().await.len(), 1);
        assert_eq!(cache.phase(), CachePhase::Backoff);
        assert_eq!(registry.calls(), 2);

        // still inside the backoff window: no new registry call
        tokio::time::advance(STALENESS).await;
        assert_eq!(cache.current().await.len(), 1);
        assert_eq!(registry.calls(), 2);

        registry.fail.store(false, Ordering::SeqCst);
        registry.set_routes(&[]);
        tokio::time::advance(BACKOFF).await;
        assert!(cache.current().await.is_empty());
        assert_eq!(cache.phase(), CachePhase::Fresh);
        assert_eq!(registry.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mark_stale_forces_next_read_to_rebuild() {
        let registry = ScriptedRegistry::new(true);
        registry.set_routes(&["^/a.*"]);
        let cache = cache_for(&registry);
        cache.initialize().await;

        registry.set_routes(&[]);
        cache.mark_stale();
        assert!(cache.current().await.is_empty());
        assert_eq!(registry.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mark_stale_during_rebuild_is_not_lost() {
        let registry = ScriptedRegistry::new(false);
        registry.set_routes(&["^/a.*"]);
        let cache = cache_for(&registry);

        let rebuilding = tokio::spawn({
            let cache = cache.clone();
            async move { cache.current().await }
        });
        while cache.phase() != CachePhase::Regenerating {
            tokio::task::yield_now().await;
        }

        cache.mark_stale();
        registry.gate.add_permits(1);
        rebuilding.await.unwrap();

        // the rebuild finished but a refresh was requested while it ran
        registry.gate.add_permits(1);
        cache.current().await;
        assert_eq!(registry.calls(), 2);
    }

    #[tokio::test]
    async fn test_snapshot_never_rebuilds() {
        let registry = ScriptedRegistry::new(true);
        registry.set_routes(&["^/a.*"]);
        let cache = cache_for(&registry);

        assert!(cache.snapshot().is_empty());
        assert_eq!(registry.calls(), 0);
    }
}
