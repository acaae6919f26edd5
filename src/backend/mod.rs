//! Backend Module
//!
//! The uniform storage contract every cache backend implements, and the
//! four adapters shipped with the crate:
//! - `MemoryBackend`: in-process volatile map
//! - `WebStorageBackend`: durable per-origin or session-scoped key/value area
//! - `IndexedBackend`: transactional structured store with secondary indexes
//!
//! Web storage sits on a `StorageSubstrate`, the platform boundary.

mod indexed;
mod memory;
mod substrate;
mod web_storage;

pub use indexed::IndexedBackend;
pub use memory::MemoryBackend;
pub use substrate::{MemorySubstrate, StorageChange, StorageSubstrate, SubstrateError};
pub use web_storage::WebStorageBackend;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::cache::{Annotation, CacheEntry, CacheStats, SetOptions, MAX_KEY_LENGTH, MAX_VALUE_SIZE};
use crate::error::{CacheError, Result};

// == Eviction Policy ==
/// Percentage of current entries removed when a capacity bound is hit.
///
/// Batch eviction (10% of the store, oldest first) amortises the cost of
/// eviction on substrates where every removal is a synchronous write.
pub const EVICTION_PERCENT: usize = 10;

/// Number of entries to evict before inserting into a store holding `len`
/// entries under a bound of `max_entries`.
///
/// At least one entry, at least `EVICTION_PERCENT` of the store (rounded up),
/// and at least enough to make room for the incoming entry.
pub fn eviction_batch(len: usize, max_entries: usize) -> usize {
    let ratio_batch = (len * EVICTION_PERCENT).div_ceil(100);
    let needed = (len + 1).saturating_sub(max_entries);
    ratio_batch.max(needed).max(1).min(len)
}

// == Persistence Class ==
/// Durability and lifetime guarantee of a backend's substrate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PersistenceClass {
    VolatileMemory,
    DurablePerOrigin,
    SessionScoped,
    TransactionalStructured,
}

// == Capacity ==
/// Capacity bound of a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Capacity {
    pub max_entries: usize,
    pub max_bytes: Option<usize>,
}

impl Capacity {
    pub fn entries(max_entries: usize) -> Self {
        Self {
            max_entries: max_entries.max(1),
            max_bytes: None,
        }
    }

    pub fn with_max_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = Some(max_bytes);
        self
    }
}

// == Backend Trait ==
/// Uniform contract over a storage substrate.
///
/// Each backend exclusively owns its entries: expiry, eviction and encoding
/// all happen behind this trait. Callers never mutate an entry directly.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Registry name of this backend.
    fn name(&self) -> &str;

    fn persistence(&self) -> PersistenceClass;

    fn capacity(&self) -> Capacity;

    /// True when `set` already runs its own evict-and-retry cycle before
    /// reporting `CapacityExceeded`. Callers must not evict again.
    fn evicts_on_write(&self) -> bool {
        false
    }

    /// Returns the live entry for `key`, counting a hit or a miss.
    ///
    /// Expired or undecodable entries are purged and reported as a miss.
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>>;

    /// Like `get`, without touching statistics, hit counts or recency.
    async fn peek(&self, key: &str) -> Result<Option<CacheEntry>>;

    /// Stores `value`, evicting a least-recently-used batch first if full.
    async fn set(&self, key: &str, value: Value, options: &SetOptions) -> Result<bool>;

    async fn delete(&self, key: &str) -> Result<bool>;

    async fn clear(&self) -> Result<()>;

    async fn has(&self, key: &str) -> Result<bool>;

    /// Keys of all live entries.
    async fn keys(&self) -> Result<Vec<String>>;

    /// Number of live entries.
    async fn size(&self) -> Result<usize>;

    async fn stats(&self) -> Result<CacheStats>;

    /// Rewrites an entry in place; false when the key is absent.
    async fn annotate(&self, key: &str, annotation: &Annotation) -> Result<bool>;

    /// Drops up to `count` least-recently-used entries.
    async fn evict(&self, count: usize) -> Result<usize>;

    /// Removes every expired entry; returns how many were removed.
    async fn purge_expired(&self) -> Result<usize>;

    /// Keys whose entry carries `tag`.
    ///
    /// The default scans every key; indexed backends answer from an index.
    async fn keys_with_tag(&self, tag: &str) -> Result<Vec<String>> {
        let mut tagged = Vec::new();
        for key in self.keys().await? {
            if let Some(entry) = self.peek(&key).await? {
                if entry.tags.contains(tag) {
                    tagged.push(key);
                }
            }
        }
        Ok(tagged)
    }
}

/// Key and value size limits shared by every backend.
pub(crate) fn validate_write(key: &str, value: &Value) -> Result<()> {
    if key.is_empty() {
        return Err(CacheError::InvalidRequest("Key cannot be empty".to_string()));
    }
    if key.len() > MAX_KEY_LENGTH {
        return Err(CacheError::InvalidRequest(format!(
            "Key exceeds maximum length of {} bytes",
            MAX_KEY_LENGTH
        )));
    }
    if value.to_string().len() > MAX_VALUE_SIZE {
        return Err(CacheError::InvalidRequest(format!(
            "Value exceeds maximum size of {} bytes",
            MAX_VALUE_SIZE
        )));
    }
    Ok(())
}
