//! Web Storage Backend
//!
//! Entries encoded as JSON strings in a synchronous, quota-bound storage area.
//! One implementation serves both the durable per-origin area and the
//! session-scoped area; only the declared persistence class differs.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{
    eviction_batch, validate_write, Backend, Capacity, PersistenceClass, StorageSubstrate,
    SubstrateError,
};
use crate::cache::{Annotation, CacheEntry, CacheStats, LruTracker, SetOptions};
use crate::error::{CacheError, Result};

/// Outcome of reading one stored record.
enum Loaded {
    Live(CacheEntry),
    /// Record was expired or corrupt and has been removed
    Purged,
    Missing,
}

#[derive(Debug)]
struct WebStorageState {
    lru: LruTracker,
    stats: CacheStats,
}

// == Web Storage Backend ==
pub struct WebStorageBackend {
    name: String,
    class: PersistenceClass,
    substrate: Arc<dyn StorageSubstrate>,
    prefix: String,
    capacity: Capacity,
    default_ttl: Duration,
    state: Mutex<WebStorageState>,
}

impl WebStorageBackend {
    /// Backend over durable per-origin storage.
    pub fn local(
        name: impl Into<String>,
        substrate: Arc<dyn StorageSubstrate>,
        capacity: Capacity,
        default_ttl: Duration,
    ) -> Self {
        Self::open(name.into(), PersistenceClass::DurablePerOrigin, substrate, capacity, default_ttl)
    }

    /// Backend over tab-scoped session storage.
    pub fn session(
        name: impl Into<String>,
        substrate: Arc<dyn StorageSubstrate>,
        capacity: Capacity,
        default_ttl: Duration,
    ) -> Self {
        Self::open(name.into(), PersistenceClass::SessionScoped, substrate, capacity, default_ttl)
    }

    fn open(
        name: String,
        class: PersistenceClass,
        substrate: Arc<dyn StorageSubstrate>,
        capacity: Capacity,
        default_ttl: Duration,
    ) -> Self {
        let prefix = format!("{}::", name);
        let lru = recover_order(&name, substrate.as_ref(), &prefix);
        Self {
            name,
            class,
            substrate,
            prefix,
            capacity,
            default_ttl,
            state: Mutex::new(WebStorageState {
                lru,
                stats: CacheStats::new(),
            }),
        }
    }

    fn storage_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    /// Cache keys stored under this backend's prefix.
    fn stored_keys(&self) -> Result<Vec<String>> {
        Ok(prefixed_keys(self.substrate.as_ref(), &self.prefix)?)
    }

    fn load(&self, state: &mut WebStorageState, key: &str) -> Result<Loaded> {
        let storage_key = self.storage_key(key);
        let Some(raw) = self.substrate.get_item(&storage_key)? else {
            return Ok(Loaded::Missing);
        };

        let purge = match serde_json::from_str::<CacheEntry>(&raw) {
            Ok(entry) if !entry.is_expired() => return Ok(Loaded::Live(entry)),
            Ok(_) => false,
            Err(err) => {
                let corrupt = CacheError::CorruptEntry(format!("{}: {}", key, err));
                warn!(backend = %self.name, error = %corrupt, "Purging undecodable record");
                true
            }
        };
        debug!(backend = %self.name, key, corrupt = purge, "Removing dead record");
        self.substrate.remove_item(&storage_key)?;
        state.lru.remove(key);
        Ok(Loaded::Purged)
    }

    fn write(&self, entry: &CacheEntry, encoded: &str) -> std::result::Result<(), SubstrateError> {
        self.substrate.set_item(&self.storage_key(&entry.key), encoded)
    }

    fn evict_locked(&self, state: &mut WebStorageState, count: usize) -> Result<usize> {
        let present = self.stored_keys()?;
        state.lru.reconcile(&present);
        let victims = state.lru.evict_oldest_n(count);
        for key in &victims {
            self.substrate.remove_item(&self.storage_key(key))?;
        }
        state.stats.record_evictions(victims.len());
        Ok(victims.len())
    }

    fn live_entries(&self, state: &mut WebStorageState) -> Result<(Vec<CacheEntry>, usize)> {
        let mut live = Vec::new();
        let mut purged = 0;
        for key in self.stored_keys()? {
            match self.load(state, &key)? {
                Loaded::Live(entry) => live.push(entry),
                Loaded::Purged => purged += 1,
                Loaded::Missing => {}
            }
        }
        Ok((live, purged))
    }
}

fn prefixed_keys(
    substrate: &dyn StorageSubstrate,
    prefix: &str,
) -> std::result::Result<Vec<String>, SubstrateError> {
    Ok(substrate
        .keys()?
        .into_iter()
        .filter_map(|k| k.strip_prefix(prefix).map(str::to_string))
        .collect())
}

/// Rebuilds access order from records persisted by earlier sessions,
/// oldest creation first.
fn recover_order(name: &str, substrate: &dyn StorageSubstrate, prefix: &str) -> LruTracker {
    let mut lru = LruTracker::new();
    let keys = match prefixed_keys(substrate, prefix) {
        Ok(keys) => keys,
        Err(err) => {
            warn!(backend = %name, error = %err, "Storage unavailable at startup");
            return lru;
        }
    };

    let mut recovered: Vec<(u64, String)> = keys
        .into_iter()
        .filter_map(|key| {
            let raw = substrate.get_item(&format!("{}{}", prefix, key)).ok()??;
            let entry: CacheEntry = serde_json::from_str(&raw).ok()?;
            Some((entry.created_at, key))
        })
        .collect();
    recovered.sort();
    for (_, key) in recovered {
        lru.touch(&key);
    }
    lru
}

#[async_trait]
impl Backend for WebStorageBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn persistence(&self) -> PersistenceClass {
        self.class
    }

    fn capacity(&self) -> Capacity {
        self.capacity
    }

    fn evicts_on_write(&self) -> bool {
        true
    }

    async fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        let mut state = self.state.lock().await;
        match self.load(&mut state, key)? {
            Loaded::Live(mut entry) => {
                entry.hit_count += 1;
                let encoded = serde_json::to_string(&entry)?;
                if let Err(err) = self.write(&entry, &encoded) {
                    debug!(backend = %self.name, key, error = %err, "Hit count not persisted");
                }
                state.stats.record_hit();
                state.lru.touch(key);
                Ok(Some(entry))
            }
            Loaded::Purged | Loaded::Missing => {
                state.stats.record_miss();
                Ok(None)
            }
        }
    }

    async fn peek(&self, key: &str) -> Result<Option<CacheEntry>> {
        let mut state = self.state.lock().await;
        match self.load(&mut state, key)? {
            Loaded::Live(entry) => Ok(Some(entry)),
            _ => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Value, options: &SetOptions) -> Result<bool> {
        validate_write(key, &value)?;
        let ttl = options.ttl.unwrap_or(self.default_ttl);
        let entry = CacheEntry::from_options(key, value, ttl, options)?;
        let encoded = serde_json::to_string(&entry)?;
        let storage_key = self.storage_key(key);

        // Eviction cannot make room for a record larger than the whole area
        if let Some(quota) = self.substrate.quota() {
            let needed = storage_key.len() + encoded.len();
            if needed > quota {
                return Err(CacheError::CapacityExceeded(format!(
                    "entry '{}' ({} bytes) exceeds backend '{}' quota of {} bytes",
                    key, needed, self.name, quota
                )));
            }
        }

        let mut state = self.state.lock().await;
        if self.substrate.get_item(&storage_key)?.is_none() {
            let stored = self.stored_keys()?.len();
            if stored >= self.capacity.max_entries {
                let batch = eviction_batch(stored, self.capacity.max_entries);
                let evicted = self.evict_locked(&mut state, batch)?;
                debug!(backend = %self.name, evicted, "Evicted LRU batch for entry bound");
            }
        }

        match self.write(&entry, &encoded) {
            Ok(()) => {}
            Err(SubstrateError::QuotaExceeded { .. }) => {
                // One eviction-and-retry cycle before giving up
                let stored = self.stored_keys()?.len();
                let batch = eviction_batch(stored, self.capacity.max_entries);
                let evicted = self.evict_locked(&mut state, batch)?;
                warn!(backend = %self.name, key, evicted, "Quota exceeded, retrying after eviction");

                self.write(&entry, &encoded).map_err(|err| match err {
                    SubstrateError::QuotaExceeded { .. } => CacheError::CapacityExceeded(format!(
                        "backend '{}' rejected '{}' after eviction: {}",
                        self.name, key, err
                    )),
                    other => other.into(),
                })?;
            }
            Err(err) => return Err(err.into()),
        }

        state.lru.touch(key);
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut state = self.state.lock().await;
        let storage_key = self.storage_key(key);
        let existed = self.substrate.get_item(&storage_key)?.is_some();
        if existed {
            self.substrate.remove_item(&storage_key)?;
        }
        state.lru.remove(key);
        Ok(existed)
    }

    async fn clear(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        for key in self.stored_keys()? {
            self.substrate.remove_item(&self.storage_key(&key))?;
        }
        state.lru.clear();
        Ok(())
    }

    async fn has(&self, key: &str) -> Result<bool> {
        let mut state = self.state.lock().await;
        Ok(matches!(self.load(&mut state, key)?, Loaded::Live(_)))
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let mut state = self.state.lock().await;
        let (live, _) = self.live_entries(&mut state)?;
        Ok(live.into_iter().map(|entry| entry.key).collect())
    }

    async fn size(&self) -> Result<usize> {
        let mut state = self.state.lock().await;
        let (live, _) = self.live_entries(&mut state)?;
        Ok(live.len())
    }

    async fn stats(&self) -> Result<CacheStats> {
        let mut state = self.state.lock().await;
        let (live, _) = self.live_entries(&mut state)?;
        let total_size = live.iter().map(|entry| entry.size_bytes).sum();
        Ok(state.stats.snapshot(live.len(), total_size))
    }

    async fn annotate(&self, key: &str, annotation: &Annotation) -> Result<bool> {
        let mut state = self.state.lock().await;
        match self.load(&mut state, key)? {
            Loaded::Live(mut entry) => {
                entry.annotate(annotation);
                let encoded = serde_json::to_string(&entry)?;
                self.write(&entry, &encoded)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn evict(&self, count: usize) -> Result<usize> {
        let mut state = self.state.lock().await;
        self.evict_locked(&mut state, count)
    }

    async fn purge_expired(&self) -> Result<usize> {
        let mut state = self.state.lock().await;
        let (_, purged) = self.live_entries(&mut state)?;
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemorySubstrate;
    use serde_json::json;
    use tokio::time::sleep;

    fn local(substrate: &MemorySubstrate, max_entries: usize) -> WebStorageBackend {
        WebStorageBackend::local(
            "local",
            Arc::new(substrate.clone()),
            Capacity::entries(max_entries),
            Duration::from_secs(300),
        )
    }

    #[tokio::test]
    async fn test_set_and_get_roundtrip_through_substrate() {
        let substrate = MemorySubstrate::new(64 * 1024);
        let backend = local(&substrate, 10);

        backend
            .set("u:1", json!({"name": "Ann"}), &SetOptions::new().tag("users"))
            .await
            .unwrap();

        let raw = substrate.get_item("local::u:1").unwrap().unwrap();
        assert!(raw.contains("Ann"));

        let entry = backend.get("u:1").await.unwrap().unwrap();
        assert_eq!(entry.value, json!({"name": "Ann"}));
        assert!(entry.tags.contains("users"));
        assert_eq!(entry.hit_count, 1);
        assert_eq!(backend.persistence(), PersistenceClass::DurablePerOrigin);
    }

    #[tokio::test]
    async fn test_session_class() {
        let substrate = MemorySubstrate::new(1024);
        let backend = WebStorageBackend::session(
            "session",
            Arc::new(substrate),
            Capacity::entries(10),
            Duration::from_secs(60),
        );
        assert_eq!(backend.persistence(), PersistenceClass::SessionScoped);
    }

    #[tokio::test]
    async fn test_expired_entry_purged_on_get() {
        let substrate = MemorySubstrate::new(64 * 1024);
        let backend = local(&substrate, 10);

        backend
            .set("k", json!(1), &SetOptions::new().ttl(Duration::from_millis(40)))
            .await
            .unwrap();
        sleep(Duration::from_millis(70)).await;

        assert!(backend.get("k").await.unwrap().is_none());
        assert!(substrate.get_item("local::k").unwrap().is_none());
        assert_eq!(backend.stats().await.unwrap().misses, 1);
    }

    #[tokio::test]
    async fn test_corrupt_record_is_a_silent_miss() {
        let substrate = MemorySubstrate::new(64 * 1024);
        let backend = local(&substrate, 10);

        substrate.set_item("local::broken", "{not json").unwrap();

        assert!(backend.get("broken").await.unwrap().is_none());
        assert!(substrate.get_item("local::broken").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_entry_bound_evicts_oldest() {
        let substrate = MemorySubstrate::new(64 * 1024);
        let backend = local(&substrate, 2);

        backend.set("k1", json!("v1"), &SetOptions::new()).await.unwrap();
        backend.set("k2", json!("v2"), &SetOptions::new()).await.unwrap();
        backend.set("k3", json!("v3"), &SetOptions::new()).await.unwrap();

        assert_eq!(backend.size().await.unwrap(), 2);
        assert!(!backend.has("k1").await.unwrap());
        assert!(backend.has("k3").await.unwrap());
    }

    #[tokio::test]
    async fn test_quota_triggers_eviction_retry() {
        let substrate = MemorySubstrate::new(700);
        let backend = local(&substrate, 100);

        for i in 0..20 {
            backend
                .set(&format!("k{}", i), json!("x".repeat(40)), &SetOptions::new())
                .await
                .unwrap();
        }

        // Every write landed by evicting older records
        assert!(backend.has("k19").await.unwrap());
        assert!(substrate.used_bytes() <= 700);
        assert!(backend.stats().await.unwrap().evictions > 0);
    }

    async fn fill(backend: &WebStorageBackend, count: usize) {
        for i in 0..count {
            backend
                .set(&format!("k{:02}", i), json!("x".repeat(10)), &SetOptions::new())
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_entry_larger_than_quota_rejected_without_eviction() {
        let substrate = MemorySubstrate::new(4000);
        let backend = local(&substrate, 100);
        fill(&backend, 21).await;

        let result = backend
            .set("huge", json!("x".repeat(8000)), &SetOptions::new())
            .await;

        assert!(matches!(result, Err(CacheError::CapacityExceeded(_))));
        assert_eq!(backend.size().await.unwrap(), 21);
        assert_eq!(backend.stats().await.unwrap().evictions, 0);
    }

    #[tokio::test]
    async fn test_quota_rejection_evicts_a_single_batch() {
        let substrate = MemorySubstrate::new(4000);
        let backend = local(&substrate, 100);
        fill(&backend, 21).await;

        // Fits the quota, but not after dropping one batch of three records
        let result = backend
            .set("big", json!("x".repeat(2500)), &SetOptions::new())
            .await;

        assert!(matches!(result, Err(CacheError::CapacityExceeded(_))));
        assert_eq!(backend.size().await.unwrap(), 18);
        assert_eq!(backend.stats().await.unwrap().evictions, 3);
        assert!(!backend.has("k00").await.unwrap());
        assert!(backend.has("k03").await.unwrap());
    }

    #[tokio::test]
    async fn test_unavailable_substrate() {
        let substrate = MemorySubstrate::new(1024);
        let backend = local(&substrate, 10);
        substrate.set_available(false);

        let result = backend.get("k").await;
        assert!(matches!(result, Err(CacheError::BackendUnavailable(_))));
    }

    #[tokio::test]
    async fn test_recovers_order_from_existing_records() {
        let substrate = MemorySubstrate::new(64 * 1024);
        {
            let backend = local(&substrate, 2);
            backend.set("old", json!(1), &SetOptions::new()).await.unwrap();
            sleep(Duration::from_millis(5)).await;
            backend.set("new", json!(2), &SetOptions::new()).await.unwrap();
        }

        // A new session over the same area evicts the oldest persisted record
        let reopened = local(&substrate, 2);
        reopened.set("newest", json!(3), &SetOptions::new()).await.unwrap();

        assert!(!reopened.has("old").await.unwrap());
        assert!(reopened.has("new").await.unwrap());
        assert!(reopened.has("newest").await.unwrap());
    }

    #[tokio::test]
    async fn test_clear_leaves_foreign_keys() {
        let substrate = MemorySubstrate::new(64 * 1024);
        let backend = local(&substrate, 10);

        substrate.set_item("unrelated", "keep").unwrap();
        backend.set("a", json!(1), &SetOptions::new()).await.unwrap();
        backend.clear().await.unwrap();

        assert_eq!(backend.size().await.unwrap(), 0);
        assert_eq!(substrate.get_item("unrelated").unwrap(), Some("keep".to_string()));
    }

    #[tokio::test]
    async fn test_annotate_persists() {
        let substrate = MemorySubstrate::new(64 * 1024);
        let backend = local(&substrate, 10);

        backend.set("a", json!(1), &SetOptions::new()).await.unwrap();
        assert!(backend.annotate("a", &Annotation::MarkStale).await.unwrap());

        let reopened = local(&substrate, 10);
        assert!(reopened.peek("a").await.unwrap().unwrap().is_stale());
    }
}
