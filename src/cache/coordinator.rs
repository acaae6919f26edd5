//! Cache Coordinator Module
//!
//! Facade over the registered backends. Routes each call to the selected
//! backend (or the default), runs it through the resilience layer, records
//! latency and hit rate, and coalesces concurrent `get_or_set` loads.
//!
//! Availability failures degrade instead of surfacing: reads become a miss,
//! writes report `false`. Capacity, factory, validation and decode errors
//! are returned to the caller.

use std::collections::{BTreeMap, HashSet};
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::{estimate_size, Annotation, CacheEntry, CacheStats, SetOptions, SingleFlight};
use crate::backend::{eviction_batch, Backend};
use crate::error::{CacheError, Result};
use crate::invalidation::KeyPattern;
use crate::monitoring::{Monitor, Operation};
use crate::resilience::{BreakerPhase, FallbackStrategy, Recovery, ResilienceConfig, ResilienceLayer};

// == Builder ==
pub struct CoordinatorBuilder {
    backends: Vec<Arc<dyn Backend>>,
    default_backend: Option<String>,
    default_ttl: Duration,
    resilience: ResilienceConfig,
    strategies: Option<Vec<FallbackStrategy>>,
    monitor: Option<Arc<Monitor>>,
}

impl Default for CoordinatorBuilder {
    fn default() -> Self {
        Self {
            backends: Vec::new(),
            default_backend: None,
            default_ttl: Duration::from_secs(300),
            resilience: ResilienceConfig::default(),
            strategies: None,
            monitor: None,
        }
    }
}

impl CoordinatorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a backend. Registration order is the fallback search order.
    pub fn backend<B: Backend + 'static>(mut self, backend: B) -> Self {
        self.backends.push(Arc::new(backend));
        self
    }

    pub fn shared_backend(mut self, backend: Arc<dyn Backend>) -> Self {
        self.backends.push(backend);
        self
    }

    /// Defaults to the first registered backend.
    pub fn default_backend(mut self, name: impl Into<String>) -> Self {
        self.default_backend = Some(name.into());
        self
    }

    pub fn default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn resilience(mut self, config: ResilienceConfig) -> Self {
        self.resilience = config;
        self
    }

    pub fn strategies(mut self, strategies: Vec<FallbackStrategy>) -> Self {
        self.strategies = Some(strategies);
        self
    }

    pub fn monitor(mut self, monitor: Arc<Monitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    pub fn build(self) -> Result<CacheCoordinator> {
        let first = self.backends.first().ok_or_else(|| {
            CacheError::InvalidRequest("at least one backend must be registered".to_string())
        })?;
        let first_name = first.name().to_string();

        let mut names = HashSet::new();
        for backend in &self.backends {
            if !names.insert(backend.name().to_string()) {
                return Err(CacheError::InvalidRequest(format!(
                    "backend '{}' registered twice",
                    backend.name()
                )));
            }
        }

        let default_backend = match self.default_backend {
            Some(name) if !names.contains(&name) => return Err(CacheError::UnknownBackend(name)),
            Some(name) => name,
            None => first_name,
        };

        let resilience = match self.strategies {
            Some(strategies) => ResilienceLayer::with_strategies(self.resilience, strategies),
            None => ResilienceLayer::new(self.resilience),
        };

        info!(
            backends = ?names,
            default = %default_backend,
            "Cache coordinator ready"
        );

        Ok(CacheCoordinator {
            backends: self.backends,
            default_backend,
            default_ttl: self.default_ttl,
            resilience,
            flights: SingleFlight::new(),
            monitor: self.monitor,
        })
    }
}

// == Coordinator ==
pub struct CacheCoordinator {
    backends: Vec<Arc<dyn Backend>>,
    default_backend: String,
    default_ttl: Duration,
    resilience: ResilienceLayer,
    flights: SingleFlight,
    monitor: Option<Arc<Monitor>>,
}

impl CacheCoordinator {
    pub fn builder() -> CoordinatorBuilder {
        CoordinatorBuilder::new()
    }

    pub fn backend(&self, name: &str) -> Result<&Arc<dyn Backend>> {
        self.backends
            .iter()
            .find(|backend| backend.name() == name)
            .ok_or_else(|| CacheError::UnknownBackend(name.to_string()))
    }

    pub fn backends(&self) -> &[Arc<dyn Backend>] {
        &self.backends
    }

    pub fn backend_names(&self) -> Vec<String> {
        self.backends.iter().map(|b| b.name().to_string()).collect()
    }

    pub fn default_backend(&self) -> &str {
        &self.default_backend
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    pub fn resilience(&self) -> &ResilienceLayer {
        &self.resilience
    }

    pub fn monitor(&self) -> Option<&Arc<Monitor>> {
        self.monitor.as_ref()
    }

    fn route(&self, selector: Option<&str>) -> Result<&Arc<dyn Backend>> {
        self.backend(selector.unwrap_or(&self.default_backend))
    }

    /// The named backend, or every backend when no name is given.
    fn targets(&self, selector: Option<&str>) -> Result<Vec<&Arc<dyn Backend>>> {
        match selector {
            Some(name) => Ok(vec![self.backend(name)?]),
            None => Ok(self.backends.iter().collect()),
        }
    }

    fn observe<T>(&self, operation: Operation, backend: &str, started: Instant, result: &Result<T>) {
        if let Some(monitor) = &self.monitor {
            let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
            monitor.record_operation(operation, backend, result.is_ok(), latency_ms);
        }
    }

    fn degrade<T>(operation: Operation, backend: &str, result: Result<T>, fallback: T) -> Result<T> {
        match result {
            Err(err) if err.is_availability() => {
                warn!(backend, operation = %operation, error = %err, "Backend unavailable, degrading");
                Ok(fallback)
            }
            other => other,
        }
    }

    // == Reads ==

    /// Live entry for `key`, counting a hit or miss.
    ///
    /// When the backend fails, another backend still holding the key can
    /// answer; otherwise the read is a miss.
    pub async fn get_entry(&self, key: &str, backend: Option<&str>) -> Result<Option<CacheEntry>> {
        let target = self.route(backend)?;
        let name = target.name();
        let started = Instant::now();

        let result = self
            .resilience
            .execute_with_fallback(
                name,
                || target.get(key),
                Recovery::none()
                    .with_alternate(move || async move { self.peek_elsewhere(key, name).await.map(Some) }),
            )
            .await;
        self.observe(Operation::Get, name, started, &result);

        let entry = Self::degrade(Operation::Get, name, result, None)?;
        if let Some(monitor) = &self.monitor {
            monitor.record_lookup(name, entry.is_some());
        }
        Ok(entry)
    }

    /// Decoded value for `key`.
    pub async fn get<V: DeserializeOwned>(&self, key: &str, backend: Option<&str>) -> Result<Option<V>> {
        match self.get_entry(key, backend).await? {
            Some(entry) => Ok(Some(serde_json::from_value(entry.value)?)),
            None => Ok(None),
        }
    }

    /// Entry for `key` without touching statistics or recency.
    pub async fn peek(&self, key: &str, backend: Option<&str>) -> Result<Option<CacheEntry>> {
        let target = self.route(backend)?;
        let result = self.resilience.execute(target.name(), || target.peek(key)).await;
        Self::degrade(Operation::Get, target.name(), result, None)
    }

    async fn peek_elsewhere(&self, key: &str, except: &str) -> Option<CacheEntry> {
        for backend in self.backends.iter().filter(|b| b.name() != except) {
            if matches!(self.resilience.breaker_phase(backend.name()), BreakerPhase::Open { .. }) {
                continue;
            }
            match backend.peek(key).await {
                Ok(Some(entry)) => {
                    debug!(key, source = backend.name(), "Served from alternate backend");
                    return Some(entry);
                }
                Ok(None) => {}
                Err(err) => debug!(backend = backend.name(), error = %err, "Alternate lookup failed"),
            }
        }
        None
    }

    pub async fn has(&self, key: &str, backend: Option<&str>) -> Result<bool> {
        let target = self.route(backend)?;
        let name = target.name();
        let started = Instant::now();
        let result = self.resilience.execute(name, || target.has(key)).await;
        self.observe(Operation::Has, name, started, &result);
        Self::degrade(Operation::Has, name, result, false)
    }

    pub async fn keys(&self, backend: Option<&str>) -> Result<Vec<String>> {
        let target = self.route(backend)?;
        let name = target.name();
        let started = Instant::now();
        let result = self.resilience.execute(name, || target.keys()).await;
        self.observe(Operation::Keys, name, started, &result);
        Self::degrade(Operation::Keys, name, result, Vec::new())
    }

    pub async fn size(&self, backend: Option<&str>) -> Result<usize> {
        let target = self.route(backend)?;
        let result = self.resilience.execute(target.name(), || target.size()).await;
        Self::degrade(Operation::Keys, target.name(), result, 0)
    }

    /// Statistics of one backend, or the aggregate of all of them.
    pub async fn stats(&self, backend: Option<&str>) -> Result<CacheStats> {
        match backend {
            Some(name) => {
                let target = self.backend(name)?;
                self.resilience.execute(name, || target.stats()).await
            }
            None => {
                let per_backend = self.backend_stats().await?;
                Ok(CacheStats::aggregate(per_backend.values()))
            }
        }
    }

    /// Statistics of every reachable backend.
    pub async fn backend_stats(&self) -> Result<BTreeMap<String, CacheStats>> {
        let mut all = BTreeMap::new();
        for backend in &self.backends {
            match self.resilience.execute(backend.name(), || backend.stats()).await {
                Ok(stats) => {
                    all.insert(backend.name().to_string(), stats);
                }
                Err(err) if err.is_availability() => {
                    warn!(backend = backend.name(), error = %err, "Stats unavailable");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(all)
    }

    // == Writes ==

    /// Encodes and stores `value`. Returns false when the backend could not
    /// be reached.
    pub async fn set<V: Serialize + ?Sized>(&self, key: &str, value: &V, options: SetOptions) -> Result<bool> {
        let value = serde_json::to_value(value)?;
        self.set_value(key, value, &options).await
    }

    pub async fn set_value(&self, key: &str, value: Value, options: &SetOptions) -> Result<bool> {
        let target = self.route(options.backend.as_deref())?;
        let mut resolved = options.clone();
        resolved.ttl = Some(options.ttl.unwrap_or(self.default_ttl));

        let stored = self.write(target, key, &value, &resolved).await?;
        if stored && options.mirror && options.backend.is_none() {
            self.mirror(target.name(), key, &value, &resolved).await;
        }
        Ok(stored)
    }

    async fn write(&self, target: &Arc<dyn Backend>, key: &str, value: &Value, options: &SetOptions) -> Result<bool> {
        let name = target.name();
        let started = Instant::now();

        // Eviction cannot help an entry larger than the whole byte budget,
        // and a backend that evicts on write has already run its one cycle
        let oversized = target
            .capacity()
            .max_bytes
            .is_some_and(|max| estimate_size(key, value) > max);
        let recovery = if oversized || target.evicts_on_write() {
            Recovery::none()
        } else {
            Recovery::none().with_evict(move || evict_batch(target))
        };

        let result = self
            .resilience
            .execute_with_fallback(name, || target.set(key, value.clone(), options), recovery)
            .await;
        self.observe(Operation::Set, name, started, &result);
        Self::degrade(Operation::Set, name, result, false)
    }

    /// Best-effort copy to every other backend.
    async fn mirror(&self, primary: &str, key: &str, value: &Value, options: &SetOptions) {
        for backend in self.backends.iter().filter(|b| b.name() != primary) {
            match self.write(backend, key, value, options).await {
                Ok(true) => debug!(key, backend = backend.name(), "Mirrored entry"),
                Ok(false) => {}
                Err(err) => warn!(key, backend = backend.name(), error = %err, "Mirror write failed"),
            }
        }
    }

    /// Removes `key` from the named backend, or from every backend.
    pub async fn delete(&self, key: &str, backend: Option<&str>) -> Result<bool> {
        let mut removed = false;
        for target in self.targets(backend)? {
            let name = target.name();
            let started = Instant::now();
            let result = self.resilience.execute(name, || target.delete(key)).await;
            self.observe(Operation::Delete, name, started, &result);
            removed |= Self::degrade(Operation::Delete, name, result, false)?;
        }
        Ok(removed)
    }

    /// Empties the named backend, or every backend.
    pub async fn clear(&self, backend: Option<&str>) -> Result<()> {
        for target in self.targets(backend)? {
            let name = target.name();
            let started = Instant::now();
            let result = self.resilience.execute(name, || target.clear()).await;
            self.observe(Operation::Clear, name, started, &result);
            Self::degrade(Operation::Clear, name, result, ())?;
        }
        Ok(())
    }

    // == Compute-if-absent ==

    /// Returns the cached value for `key`, or runs `factory`, caches its
    /// result and returns it.
    ///
    /// Concurrent calls for the same key share one factory run; a factory
    /// error reaches every waiting caller as `CacheError::Factory`. A
    /// computed value that cannot be stored is still returned.
    pub async fn get_or_set<V, F, Fut, E>(&self, key: &str, factory: F, options: SetOptions) -> Result<V>
    where
        V: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<V, E>>,
        E: Display,
    {
        let target = self.route(options.backend.as_deref())?;
        let name = target.name();
        let started = Instant::now();

        if let Some(value) = self.get::<V>(key, Some(name)).await? {
            return Ok(value);
        }

        let flight_key = format!("{}/{}", name, key);
        let options = &options;
        let result = self
            .flights
            .run(&flight_key, move || async move {
                // Another flight may have filled the key since the miss
                if let Some(entry) = self.peek(key, Some(name)).await? {
                    return Ok(entry.value);
                }

                let produced = factory()
                    .await
                    .map_err(|err| CacheError::Factory(err.to_string()))?;
                let value = serde_json::to_value(&produced)?;

                match self.set_value(key, value.clone(), options).await {
                    Ok(true) => {}
                    Ok(false) => warn!(key, backend = name, "Computed value was not cached"),
                    Err(err) => warn!(key, backend = name, error = %err, "Failed to cache computed value"),
                }
                Ok(value)
            })
            .await;
        self.observe(Operation::GetOrSet, name, started, &result);

        Ok(serde_json::from_value(result?)?)
    }

    // == Invalidation primitives ==

    /// `(backend, key)` pairs of live keys matching `pattern`, across every
    /// reachable backend.
    pub async fn matching_keys(&self, pattern: &KeyPattern) -> Result<Vec<(String, String)>> {
        let mut matches = Vec::new();
        for backend in &self.backends {
            let name = backend.name();
            let result = self.resilience.execute(name, || backend.keys()).await;
            for key in Self::degrade(Operation::Keys, name, result, Vec::new())? {
                if pattern.matches(&key) {
                    matches.push((name.to_string(), key));
                }
            }
        }
        Ok(matches)
    }

    /// Deletes every key matching `pattern` from every backend.
    pub async fn invalidate_pattern(&self, pattern: &str) -> Result<usize> {
        let pattern = KeyPattern::parse(pattern)?;
        let mut removed = 0;
        for (backend, key) in self.matching_keys(&pattern).await? {
            if self.delete(&key, Some(&backend)).await? {
                removed += 1;
            }
        }
        info!(pattern = %pattern, removed, "Invalidated by pattern");
        Ok(removed)
    }

    /// Deletes every entry tagged `tag` from every backend.
    pub async fn invalidate_by_tag(&self, tag: &str) -> Result<usize> {
        let mut removed = 0;
        for backend in &self.backends {
            let name = backend.name();
            let result = self.resilience.execute(name, || backend.keys_with_tag(tag)).await;
            for key in Self::degrade(Operation::Keys, name, result, Vec::new())? {
                if self.delete(&key, Some(name)).await? {
                    removed += 1;
                }
            }
        }
        info!(tag, removed, "Invalidated by tag");
        Ok(removed)
    }

    pub async fn annotate(&self, key: &str, backend: &str, annotation: &Annotation) -> Result<bool> {
        let target = self.backend(backend)?;
        let result = self
            .resilience
            .execute(backend, || target.annotate(key, annotation))
            .await;
        Self::degrade(Operation::Set, backend, result, false)
    }

    /// Sweeps expired entries out of every backend.
    pub async fn purge_expired(&self) -> usize {
        let mut purged = 0;
        for backend in &self.backends {
            match self.resilience.execute(backend.name(), || backend.purge_expired()).await {
                Ok(count) => purged += count,
                Err(err) => debug!(backend = backend.name(), error = %err, "Expiry sweep skipped"),
            }
        }
        purged
    }
}

async fn evict_batch(backend: &Arc<dyn Backend>) -> Result<usize> {
    let len = backend.size().await?;
    backend
        .evict(eviction_batch(len, backend.capacity().max_entries))
        .await
}
