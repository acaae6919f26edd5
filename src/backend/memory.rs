//! Memory Backend
//!
//! Volatile in-process store combining a HashMap with LRU tracking and TTL
//! expiration.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::debug;

use super::{eviction_batch, validate_write, Backend, Capacity, PersistenceClass};
use crate::cache::{Annotation, CacheEntry, CacheStats, LruTracker, SetOptions};
use crate::error::{CacheError, Result};

// == Memory Store ==
/// Single-owner state behind the backend's lock.
#[derive(Debug)]
struct MemoryStore {
    entries: HashMap<String, CacheEntry>,
    lru: LruTracker,
    stats: CacheStats,
    total_bytes: usize,
}

impl MemoryStore {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            lru: LruTracker::new(),
            stats: CacheStats::new(),
            total_bytes: 0,
        }
    }

    fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let removed = self.entries.remove(key);
        if let Some(entry) = &removed {
            self.total_bytes -= entry.size_bytes;
            self.lru.remove(key);
        }
        removed
    }

    fn evict(&mut self, count: usize) -> usize {
        let victims = self.lru.evict_oldest_n(count);
        for key in &victims {
            if let Some(entry) = self.entries.remove(key) {
                self.total_bytes -= entry.size_bytes;
            }
        }
        self.stats.record_evictions(victims.len());
        victims.len()
    }

    /// Live entry for `key`, purging it first if expired.
    fn live(&mut self, key: &str) -> Option<&mut CacheEntry> {
        let expired = self.entries.get(key).map(CacheEntry::is_expired)?;
        if expired {
            self.remove(key);
            return None;
        }
        self.entries.get_mut(key)
    }

    fn purge_expired(&mut self) -> usize {
        let expired_keys: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired())
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired_keys {
            self.remove(key);
        }
        expired_keys.len()
    }
}

// == Memory Backend ==
/// In-process volatile backend.
#[derive(Debug)]
pub struct MemoryBackend {
    name: String,
    capacity: Capacity,
    default_ttl: Duration,
    store: RwLock<MemoryStore>,
}

impl MemoryBackend {
    // == Constructor ==
    /// Creates a new memory backend.
    ///
    /// # Arguments
    /// * `name` - Registry name
    /// * `capacity` - Entry (and optional byte) bound
    /// * `default_ttl` - TTL for writes that don't specify one
    pub fn new(name: impl Into<String>, capacity: Capacity, default_ttl: Duration) -> Self {
        Self {
            name: name.into(),
            capacity,
            default_ttl,
            store: RwLock::new(MemoryStore::new()),
        }
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn persistence(&self) -> PersistenceClass {
        PersistenceClass::VolatileMemory
    }

    fn capacity(&self) -> Capacity {
        self.capacity
    }

    fn evicts_on_write(&self) -> bool {
        true
    }

    async fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        let mut store = self.store.write().await;
        let found = store.live(key).map(|entry| {
            entry.hit_count += 1;
            entry.clone()
        });

        match found {
            Some(entry) => {
                store.stats.record_hit();
                store.lru.touch(key);
                Ok(Some(entry))
            }
            None => {
                store.stats.record_miss();
                Ok(None)
            }
        }
    }

    async fn peek(&self, key: &str) -> Result<Option<CacheEntry>> {
        let store = self.store.read().await;
        Ok(store
            .entries
            .get(key)
            .filter(|entry| !entry.is_expired())
            .cloned())
    }

    async fn set(&self, key: &str, value: Value, options: &SetOptions) -> Result<bool> {
        validate_write(key, &value)?;
        let ttl = options.ttl.unwrap_or(self.default_ttl);
        let entry = CacheEntry::from_options(key, value, ttl, options)?;
        if let Some(max_bytes) = self.capacity.max_bytes {
            if entry.size_bytes > max_bytes {
                return Err(CacheError::CapacityExceeded(format!(
                    "entry '{}' ({} bytes) exceeds backend '{}' byte bound",
                    key, entry.size_bytes, self.name
                )));
            }
        }

        let mut store = self.store.write().await;
        store.remove(key);

        if store.entries.len() >= self.capacity.max_entries {
            let batch = eviction_batch(store.entries.len(), self.capacity.max_entries);
            let evicted = store.evict(batch);
            debug!(backend = %self.name, evicted, "Evicted LRU batch for entry bound");
        }

        if let Some(max_bytes) = self.capacity.max_bytes {
            while !store.entries.is_empty() && store.total_bytes + entry.size_bytes > max_bytes {
                let batch = eviction_batch(store.entries.len(), self.capacity.max_entries);
                store.evict(batch);
            }
        }

        store.total_bytes += entry.size_bytes;
        store.entries.insert(key.to_string(), entry);
        store.lru.touch(key);
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut store = self.store.write().await;
        Ok(store.remove(key).is_some())
    }

    async fn clear(&self) -> Result<()> {
        let mut store = self.store.write().await;
        store.entries.clear();
        store.lru.clear();
        store.total_bytes = 0;
        Ok(())
    }

    async fn has(&self, key: &str) -> Result<bool> {
        let mut store = self.store.write().await;
        Ok(store.live(key).is_some())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let mut store = self.store.write().await;
        store.purge_expired();
        Ok(store.entries.keys().cloned().collect())
    }

    async fn size(&self) -> Result<usize> {
        let mut store = self.store.write().await;
        store.purge_expired();
        Ok(store.entries.len())
    }

    async fn stats(&self) -> Result<CacheStats> {
        let mut store = self.store.write().await;
        store.purge_expired();
        Ok(store.stats.snapshot(store.entries.len(), store.total_bytes))
    }

    async fn annotate(&self, key: &str, annotation: &Annotation) -> Result<bool> {
        let mut store = self.store.write().await;
        match store.live(key) {
            Some(entry) => {
                entry.annotate(annotation);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn evict(&self, count: usize) -> Result<usize> {
        let mut store = self.store.write().await;
        Ok(store.evict(count))
    }

    async fn purge_expired(&self) -> Result<usize> {
        let mut store = self.store.write().await;
        Ok(store.purge_expired())
    }
}
