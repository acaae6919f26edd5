//! End-to-end coordinator scenarios
//!
//! Expiry, eviction, single-flight loading, invalidation and resilience
//! exercised through the public API only.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::join_all;
use serde_json::Value;

use cache_coordinator::backend::{Backend, Capacity, MemoryBackend, PersistenceClass};
use cache_coordinator::cache::{Annotation, CacheEntry, CacheStats, SetOptions};
use cache_coordinator::invalidation::InvalidationEngine;
use cache_coordinator::resilience::{BreakerPhase, ResilienceConfig};
use cache_coordinator::{CacheCoordinator, CacheError, Result};

// == Helpers ==

fn memory(name: &str, max_entries: usize) -> MemoryBackend {
    MemoryBackend::new(name, Capacity::entries(max_entries), Duration::from_secs(60))
}

fn fast_resilience() -> ResilienceConfig {
    ResilienceConfig {
        max_retries: 1,
        base_delay: Duration::from_millis(1),
        operation_timeout: Duration::from_millis(200),
        failure_threshold: 3,
        cooldown: Duration::from_secs(60),
    }
}

/// Backend whose every call fails as unreachable, counting the calls.
struct UnreachableBackend {
    calls: Arc<AtomicUsize>,
}

impl UnreachableBackend {
    fn fail<T>(&self) -> Result<T> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(CacheError::BackendUnavailable("primary is down".to_string()))
    }
}

#[async_trait]
impl Backend for UnreachableBackend {
    fn name(&self) -> &str {
        "primary"
    }

    fn persistence(&self) -> PersistenceClass {
        PersistenceClass::DurablePerOrigin
    }

    fn capacity(&self) -> Capacity {
        Capacity::entries(100)
    }

    async fn get(&self, _key: &str) -> Result<Option<CacheEntry>> {
        self.fail()
    }

    async fn peek(&self, _key: &str) -> Result<Option<CacheEntry>> {
        self.fail()
    }

    async fn set(&self, _key: &str, _value: Value, _options: &SetOptions) -> Result<bool> {
        self.fail()
    }

    async fn delete(&self, _key: &str) -> Result<bool> {
        self.fail()
    }

    async fn clear(&self) -> Result<()> {
        self.fail()
    }

    async fn has(&self, _key: &str) -> Result<bool> {
        self.fail()
    }

    async fn keys(&self) -> Result<Vec<String>> {
        self.fail()
    }

    async fn size(&self) -> Result<usize> {
        self.fail()
    }

    async fn stats(&self) -> Result<CacheStats> {
        self.fail()
    }

    async fn annotate(&self, _key: &str, _annotation: &Annotation) -> Result<bool> {
        self.fail()
    }

    async fn evict(&self, _count: usize) -> Result<usize> {
        self.fail()
    }

    async fn purge_expired(&self) -> Result<usize> {
        self.fail()
    }
}

/// Memory backend whose writes stall before reaching the store.
struct SlowWriteBackend {
    inner: MemoryBackend,
    delay: Duration,
}

#[async_trait]
impl Backend for SlowWriteBackend {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn persistence(&self) -> PersistenceClass {
        self.inner.persistence()
    }

    fn capacity(&self) -> Capacity {
        self.inner.capacity()
    }

    async fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        self.inner.get(key).await
    }

    async fn peek(&self, key: &str) -> Result<Option<CacheEntry>> {
        self.inner.peek(key).await
    }

    async fn set(&self, key: &str, value: Value, options: &SetOptions) -> Result<bool> {
        tokio::time::sleep(self.delay).await;
        self.inner.set(key, value, options).await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.inner.delete(key).await
    }

    async fn clear(&self) -> Result<()> {
        self.inner.clear().await
    }

    async fn has(&self, key: &str) -> Result<bool> {
        self.inner.has(key).await
    }

    async fn keys(&self) -> Result<Vec<String>> {
        self.inner.keys().await
    }

    async fn size(&self) -> Result<usize> {
        self.inner.size().await
    }

    async fn stats(&self) -> Result<CacheStats> {
        self.inner.stats().await
    }

    async fn annotate(&self, key: &str, annotation: &Annotation) -> Result<bool> {
        self.inner.annotate(key, annotation).await
    }

    async fn evict(&self, count: usize) -> Result<usize> {
        self.inner.evict(count).await
    }

    async fn purge_expired(&self) -> Result<usize> {
        self.inner.purge_expired().await
    }
}

fn degraded_coordinator(calls: Arc<AtomicUsize>) -> CacheCoordinator {
    CacheCoordinator::builder()
        .backend(UnreachableBackend { calls })
        .backend(memory("secondary", 100))
        .default_backend("primary")
        .resilience(fast_resilience())
        .build()
        .unwrap()
}

// == Expiry and Eviction ==

#[tokio::test]
async fn test_entry_expires_after_ttl() {
    let coordinator = CacheCoordinator::builder()
        .backend(memory("memory", 100))
        .build()
        .unwrap();

    coordinator
        .set("u:1", &"alice", SetOptions::new().ttl(Duration::from_millis(100)))
        .await
        .unwrap();
    assert_eq!(coordinator.get::<String>("u:1", None).await.unwrap().as_deref(), Some("alice"));

    tokio::time::sleep(Duration::from_millis(150)).await;

    assert_eq!(coordinator.get::<String>("u:1", None).await.unwrap(), None);
    assert_eq!(coordinator.size(None).await.unwrap(), 0);
}

#[tokio::test]
async fn test_capacity_evicts_least_recently_used() {
    let coordinator = CacheCoordinator::builder()
        .backend(memory("memory", 2))
        .build()
        .unwrap();

    for key in ["k1", "k2", "k3"] {
        assert!(coordinator.set(key, &key, SetOptions::new()).await.unwrap());
    }

    assert!(!coordinator.has("k1", None).await.unwrap());
    assert!(coordinator.has("k3", None).await.unwrap());
    assert_eq!(coordinator.size(None).await.unwrap(), 2);
    assert_eq!(coordinator.stats(None).await.unwrap().evictions, 1);
}

// == Single-flight ==

#[tokio::test]
async fn test_concurrent_get_or_set_runs_factory_once() {
    let coordinator = CacheCoordinator::builder()
        .backend(memory("memory", 100))
        .build()
        .unwrap();
    let runs = AtomicUsize::new(0);
    let runs = &runs;

    let callers = (0..10).map(|_| {
        coordinator.get_or_set(
            "report",
            move || async move {
                runs.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok::<_, String>(42u32)
            },
            SetOptions::new(),
        )
    });
    let results = join_all(callers).await;

    assert_eq!(runs.load(Ordering::SeqCst), 1);
    for result in results {
        assert_eq!(result.unwrap(), 42);
    }
    assert_eq!(coordinator.get::<u32>("report", None).await.unwrap(), Some(42));
}

#[tokio::test]
async fn test_factory_error_reaches_every_waiter() {
    let coordinator = CacheCoordinator::builder()
        .backend(memory("memory", 100))
        .build()
        .unwrap();

    let callers = (0..5).map(|_| {
        coordinator.get_or_set(
            "broken",
            || async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                Err::<u32, _>("upstream exploded")
            },
            SetOptions::new(),
        )
    });

    for result in join_all(callers).await {
        match result {
            Err(CacheError::Factory(message)) => assert!(message.contains("upstream exploded")),
            other => panic!("expected factory error, got {:?}", other),
        }
    }
    assert!(!coordinator.has("broken", None).await.unwrap());
}

// == Invalidation ==

#[tokio::test]
async fn test_pattern_invalidation_spares_other_keys() {
    let coordinator = Arc::new(
        CacheCoordinator::builder()
            .backend(memory("memory", 100))
            .backend(memory("replica", 100))
            .build()
            .unwrap(),
    );
    for key in ["user:1", "user:2", "post:1"] {
        coordinator.set(key, &1, SetOptions::new().mirror()).await.unwrap();
    }
    let engine = InvalidationEngine::local(coordinator.clone());

    let report = engine.invalidate("user:*").await.unwrap();

    assert_eq!(report.removed, 4);
    for backend in ["memory", "replica"] {
        assert!(!coordinator.has("user:1", Some(backend)).await.unwrap());
        assert!(coordinator.has("post:1", Some(backend)).await.unwrap());
    }
}

// == Resilience ==

#[tokio::test]
async fn test_open_circuit_stops_calling_backend() {
    let calls = Arc::new(AtomicUsize::new(0));
    let coordinator = degraded_coordinator(calls.clone());

    for _ in 0..3 {
        assert_eq!(coordinator.get::<u32>("k", None).await.unwrap(), None);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert!(matches!(
        coordinator.resilience().breaker_phase("primary"),
        BreakerPhase::Open { .. }
    ));

    for _ in 0..5 {
        assert_eq!(coordinator.get::<u32>("k", None).await.unwrap(), None);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_failed_read_served_by_another_backend() {
    let calls = Arc::new(AtomicUsize::new(0));
    let coordinator = degraded_coordinator(calls.clone());
    coordinator
        .set("config", &"from-secondary", SetOptions::new().backend("secondary"))
        .await
        .unwrap();

    let value: Option<String> = coordinator.get("config", None).await.unwrap();

    assert_eq!(value.as_deref(), Some("from-secondary"));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_failed_write_degrades_to_false() {
    let calls = Arc::new(AtomicUsize::new(0));
    let coordinator = degraded_coordinator(calls);

    let stored = coordinator.set("k", &1, SetOptions::new()).await.unwrap();

    assert!(!stored);
    let state = coordinator.resilience().breaker_state("primary").unwrap();
    assert_eq!(state.consecutive_failures, 1);
    assert!(!state.is_open);
}

#[tokio::test]
async fn test_timed_out_write_leaves_nothing_behind() {
    let coordinator = CacheCoordinator::builder()
        .backend(SlowWriteBackend {
            inner: memory("slow", 100),
            delay: Duration::from_millis(500),
        })
        .resilience(fast_resilience())
        .build()
        .unwrap();

    let stored = coordinator.set("late", &1, SetOptions::new()).await.unwrap();
    assert!(!stored);

    tokio::time::sleep(Duration::from_millis(400)).await;

    assert!(coordinator.peek("late", None).await.unwrap().is_none());
    assert_eq!(coordinator.size(None).await.unwrap(), 0);
}
