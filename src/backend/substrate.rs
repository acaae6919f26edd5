//! Storage Substrate Module
//!
//! The platform boundary under the web storage backends: a synchronous
//! string key/value area with a byte quota and change notifications.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tokio::sync::broadcast;

use crate::error::CacheError;

const CHANGE_CHANNEL_CAPACITY: usize = 256;

// == Substrate Error ==
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SubstrateError {
    /// Storage disabled or missing in this runtime
    #[error("storage area unavailable")]
    Unavailable,

    /// Platform-imposed quota rejected the write
    #[error("quota exceeded: write needs {needed} bytes, quota is {quota}")]
    QuotaExceeded { needed: usize, quota: usize },
}

impl From<SubstrateError> for CacheError {
    fn from(err: SubstrateError) -> Self {
        match err {
            SubstrateError::Unavailable => CacheError::BackendUnavailable(err.to_string()),
            SubstrateError::QuotaExceeded { .. } => CacheError::CapacityExceeded(err.to_string()),
        }
    }
}

// == Storage Change ==
/// A write observed on a shared storage area.
#[derive(Debug, Clone, PartialEq)]
pub struct StorageChange {
    pub key: String,
    /// None when the key was removed
    pub new_value: Option<String>,
    /// Instance that performed the write
    pub source: u64,
}

// == Substrate Trait ==
/// Synchronous string storage as exposed by the host platform.
pub trait StorageSubstrate: Send + Sync {
    /// Identifies this attachment among all instances sharing the area.
    fn instance_id(&self) -> u64;

    fn get_item(&self, key: &str) -> Result<Option<String>, SubstrateError>;

    fn set_item(&self, key: &str, value: &str) -> Result<(), SubstrateError>;

    fn remove_item(&self, key: &str) -> Result<(), SubstrateError>;

    fn keys(&self) -> Result<Vec<String>, SubstrateError>;

    /// Total bytes (keys plus values) the area accepts, when known.
    fn quota(&self) -> Option<usize> {
        None
    }

    /// Change feed for writes made through any attachment, if supported.
    fn subscribe(&self) -> Option<broadcast::Receiver<StorageChange>> {
        None
    }
}

// == Memory Substrate ==
struct StorageArea {
    items: Mutex<HashMap<String, String>>,
    quota_bytes: usize,
    available: AtomicBool,
    changes: broadcast::Sender<StorageChange>,
    next_instance: AtomicU64,
}

impl StorageArea {
    fn items(&self) -> MutexGuard<'_, HashMap<String, String>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// In-process storage area shared by every attached instance.
///
/// Models per-origin (or per-tab) browser storage: a hard byte quota, an
/// availability switch, and storage events delivered to all subscribers.
#[derive(Clone)]
pub struct MemorySubstrate {
    area: Arc<StorageArea>,
    instance_id: u64,
}

impl MemorySubstrate {
    /// Creates a fresh storage area with a byte quota (keys plus values).
    pub fn new(quota_bytes: usize) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        let area = Arc::new(StorageArea {
            items: Mutex::new(HashMap::new()),
            quota_bytes,
            available: AtomicBool::new(true),
            changes,
            next_instance: AtomicU64::new(1),
        });
        Self {
            area,
            instance_id: 0,
        }
    }

    /// Attaches another runtime instance to the same storage area.
    pub fn attach(&self) -> Self {
        let instance_id = self.area.next_instance.fetch_add(1, Ordering::Relaxed);
        Self {
            area: self.area.clone(),
            instance_id,
        }
    }

    /// Enables or disables the area for every attached instance.
    pub fn set_available(&self, available: bool) {
        self.area.available.store(available, Ordering::SeqCst);
    }

    pub fn used_bytes(&self) -> usize {
        self.area
            .items()
            .iter()
            .map(|(k, v)| k.len() + v.len())
            .sum()
    }

    pub fn quota_bytes(&self) -> usize {
        self.area.quota_bytes
    }

    fn ensure_available(&self) -> Result<(), SubstrateError> {
        if self.area.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(SubstrateError::Unavailable)
        }
    }

    fn notify(&self, key: &str, new_value: Option<String>) {
        // No subscribers is fine
        let _ = self.area.changes.send(StorageChange {
            key: key.to_string(),
            new_value,
            source: self.instance_id,
        });
    }
}

impl StorageSubstrate for MemorySubstrate {
    fn instance_id(&self) -> u64 {
        self.instance_id
    }

    fn get_item(&self, key: &str) -> Result<Option<String>, SubstrateError> {
        self.ensure_available()?;
        Ok(self.area.items().get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), SubstrateError> {
        self.ensure_available()?;
        {
            let mut items = self.area.items();
            let used: usize = items.iter().map(|(k, v)| k.len() + v.len()).sum();
            let replaced = items.get(key).map(|old| key.len() + old.len()).unwrap_or(0);
            let needed = used - replaced + key.len() + value.len();
            if needed > self.area.quota_bytes {
                return Err(SubstrateError::QuotaExceeded {
                    needed,
                    quota: self.area.quota_bytes,
                });
            }
            items.insert(key.to_string(), value.to_string());
        }
        self.notify(key, Some(value.to_string()));
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), SubstrateError> {
        self.ensure_available()?;
        let removed = self.area.items().remove(key).is_some();
        if removed {
            self.notify(key, None);
        }
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, SubstrateError> {
        self.ensure_available()?;
        Ok(self.area.items().keys().cloned().collect())
    }

    fn quota(&self) -> Option<usize> {
        Some(self.area.quota_bytes)
    }

    fn subscribe(&self) -> Option<broadcast::Receiver<StorageChange>> {
        Some(self.area.changes.subscribe())
    }
}
