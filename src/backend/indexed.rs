//! Indexed Backend
//!
//! Transactional structured store. Every operation runs as one transaction
//! under the store lock and keeps two secondary indexes in step with the
//! records: tag → keys, and a recency cursor ordered by last access.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::debug;

use super::{eviction_batch, validate_write, Backend, Capacity, PersistenceClass};
use crate::cache::{Annotation, CacheEntry, CacheStats, SetOptions};
use crate::error::{CacheError, Result};

#[derive(Debug, Default)]
struct IndexedStore {
    records: HashMap<String, CacheEntry>,
    /// tag -> keys carrying it
    by_tag: HashMap<String, BTreeSet<String>>,
    /// access sequence -> key, oldest first
    by_recency: BTreeMap<u64, String>,
    /// key -> its current access sequence
    recency_of: HashMap<String, u64>,
    next_seq: u64,
    total_bytes: usize,
    stats: CacheStats,
}

impl IndexedStore {
    fn touch(&mut self, key: &str) {
        if let Some(old) = self.recency_of.remove(key) {
            self.by_recency.remove(&old);
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.by_recency.insert(seq, key.to_string());
        self.recency_of.insert(key.to_string(), seq);
    }

    fn index_tags(&mut self, entry: &CacheEntry) {
        for tag in &entry.tags {
            self.by_tag
                .entry(tag.clone())
                .or_default()
                .insert(entry.key.clone());
        }
    }

    fn insert(&mut self, entry: CacheEntry) {
        self.remove(&entry.key);
        self.index_tags(&entry);
        self.touch(&entry.key);
        self.total_bytes += entry.size_bytes;
        self.records.insert(entry.key.clone(), entry);
    }

    fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let entry = self.records.remove(key)?;
        self.total_bytes -= entry.size_bytes;
        for tag in &entry.tags {
            if let Some(keys) = self.by_tag.get_mut(tag) {
                keys.remove(key);
                if keys.is_empty() {
                    self.by_tag.remove(tag);
                }
            }
        }
        if let Some(seq) = self.recency_of.remove(key) {
            self.by_recency.remove(&seq);
        }
        Some(entry)
    }

    fn live(&mut self, key: &str) -> Option<&mut CacheEntry> {
        let expired = self.records.get(key).map(CacheEntry::is_expired)?;
        if expired {
            self.remove(key);
            return None;
        }
        self.records.get_mut(key)
    }

    fn least_recent(&self, limit: usize) -> Vec<String> {
        self.by_recency.values().take(limit).cloned().collect()
    }

    fn evict(&mut self, count: usize) -> usize {
        let victims = self.least_recent(count);
        for key in &victims {
            self.remove(key);
        }
        self.stats.record_evictions(victims.len());
        victims.len()
    }

    fn purge_expired(&mut self) -> usize {
        let now = crate::cache::current_timestamp_ms();
        let expired: Vec<String> = self
            .records
            .values()
            .filter(|entry| entry.is_expired_at(now))
            .map(|entry| entry.key.clone())
            .collect();
        for key in &expired {
            self.remove(key);
        }
        expired.len()
    }
}

// == Indexed Backend ==
/// Structured store with tag and recency indexes.
#[derive(Debug)]
pub struct IndexedBackend {
    name: String,
    capacity: Capacity,
    default_ttl: Duration,
    store: RwLock<IndexedStore>,
}

impl IndexedBackend {
    pub fn new(name: impl Into<String>, capacity: Capacity, default_ttl: Duration) -> Self {
        Self {
            name: name.into(),
            capacity,
            default_ttl,
            store: RwLock::new(IndexedStore::default()),
        }
    }

    /// Live keys carrying `tag`, answered from the tag index.
    pub async fn keys_by_tag(&self, tag: &str) -> Result<Vec<String>> {
        let store = self.store.read().await;
        let now = crate::cache::current_timestamp_ms();
        Ok(store
            .by_tag
            .get(tag)
            .map(|keys| {
                keys.iter()
                    .filter(|key| {
                        store
                            .records
                            .get(key.as_str())
                            .is_some_and(|entry| !entry.is_expired_at(now))
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    /// Up to `limit` keys walking the recency cursor, least recently used first.
    pub async fn least_recent(&self, limit: usize) -> Result<Vec<String>> {
        let store = self.store.read().await;
        Ok(store.least_recent(limit))
    }

    /// Keys whose entry was created strictly before `timestamp_ms`.
    pub async fn created_before(&self, timestamp_ms: u64) -> Result<Vec<String>> {
        let store = self.store.read().await;
        let mut keys: Vec<(u64, String)> = store
            .records
            .values()
            .filter(|entry| entry.created_at < timestamp_ms)
            .map(|entry| (entry.created_at, entry.key.clone()))
            .collect();
        keys.sort();
        Ok(keys.into_iter().map(|(_, key)| key).collect())
    }
}

#[async_trait]
impl Backend for IndexedBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn persistence(&self) -> PersistenceClass {
        PersistenceClass::TransactionalStructured
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
                store.touch(key);
                store.stats.record_hit();
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
            .records
            .get(key)
            .filter(|entry| !entry.is_expired())
            .cloned())
    }

    async fn set(&self, key: &str, value: Value, options: &SetOptions) -> Result<bool> {
        validate_write(key, &value)?;
        let ttl = options.ttl.unwrap_or(self.default_ttl);
        let entry = CacheEntry::from_options(key, value, ttl, options)?;
        if self.capacity.max_bytes.is_some_and(|max| entry.size_bytes > max) {
            return Err(CacheError::CapacityExceeded(format!(
                "entry '{}' ({} bytes) exceeds backend '{}' byte bound",
                key, entry.size_bytes, self.name
            )));
        }

        let mut store = self.store.write().await;
        store.remove(key);

        let len = store.records.len();
        if len >= self.capacity.max_entries {
            let evicted = store.evict(eviction_batch(len, self.capacity.max_entries));
            debug!(backend = %self.name, evicted, "Evicted LRU batch for entry bound");
        }
        if let Some(max_bytes) = self.capacity.max_bytes {
            while !store.records.is_empty() && store.total_bytes + entry.size_bytes > max_bytes {
                let len = store.records.len();
                store.evict(eviction_batch(len, self.capacity.max_entries));
            }
        }

        store.insert(entry);
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut store = self.store.write().await;
        Ok(store.remove(key).is_some())
    }

    async fn clear(&self) -> Result<()> {
        let mut store = self.store.write().await;
        let stats = std::mem::take(&mut store.stats);
        *store = IndexedStore {
            stats,
            ..IndexedStore::default()
        };
        Ok(())
    }

    async fn has(&self, key: &str) -> Result<bool> {
        let mut store = self.store.write().await;
        Ok(store.live(key).is_some())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let mut store = self.store.write().await;
        store.purge_expired();
        Ok(store.records.keys().cloned().collect())
    }

    async fn size(&self) -> Result<usize> {
        let mut store = self.store.write().await;
        store.purge_expired();
        Ok(store.records.len())
    }

    async fn stats(&self) -> Result<CacheStats> {
        let mut store = self.store.write().await;
        store.purge_expired();
        Ok(store.stats.snapshot(store.records.len(), store.total_bytes))
    }

    async fn annotate(&self, key: &str, annotation: &Annotation) -> Result<bool> {
        let mut store = self.store.write().await;
        let Some(entry) = store.live(key) else {
            return Ok(false);
        };
        entry.annotate(annotation);
        let updated = entry.clone();
        // Tag changes must reach the index
        store.index_tags(&updated);
        Ok(true)
    }

    async fn evict(&self, count: usize) -> Result<usize> {
        let mut store = self.store.write().await;
        Ok(store.evict(count))
    }

    async fn purge_expired(&self) -> Result<usize> {
        let mut store = self.store.write().await;
        Ok(store.purge_expired())
    }

    async fn keys_with_tag(&self, tag: &str) -> Result<Vec<String>> {
        self.keys_by_tag(tag).await
    }
}
