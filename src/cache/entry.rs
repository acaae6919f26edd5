//! Cache Entry Module
//!
//! Defines the record every backend stores, plus the options accepted by `set`.

use std::collections::BTreeSet;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{CacheError, Result};

/// Metadata flag written by `mark-invalid` invalidation rules.
pub const STALE_FLAG: &str = "stale";

// == Cache Entry ==
/// A single cached key/value record with TTL and metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub key: String,
    pub value: Value,
    /// Creation timestamp (Unix milliseconds)
    pub created_at: u64,
    /// Lifetime in milliseconds, always > 0
    pub ttl_ms: u64,
    #[serde(default)]
    pub hit_count: u64,
    /// Estimated footprint, used only for eviction heuristics
    pub size_bytes: usize,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl CacheEntry {
    // == Constructor ==
    /// Creates a new entry stamped with the current time.
    ///
    /// A TTL too long to express in milliseconds is clamped to `u64::MAX`.
    ///
    /// # Errors
    /// `InvalidRequest` when the TTL is zero.
    pub fn new(key: impl Into<String>, value: Value, ttl: Duration) -> Result<Self> {
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
        if ttl_ms == 0 {
            return Err(CacheError::InvalidRequest(
                "TTL must be greater than zero".to_string(),
            ));
        }

        let key = key.into();
        let size_bytes = estimate_size(&key, &value);
        Ok(Self {
            key,
            value,
            created_at: current_timestamp_ms(),
            ttl_ms,
            hit_count: 0,
            size_bytes,
            tags: BTreeSet::new(),
            metadata: Map::new(),
        })
    }

    /// Builds an entry from `set` options (tags and metadata applied).
    pub fn from_options(key: &str, value: Value, ttl: Duration, options: &SetOptions) -> Result<Self> {
        let mut entry = Self::new(key, value, ttl)?;
        entry.tags.extend(options.tags.iter().cloned());
        entry.metadata = options.metadata.clone();
        Ok(entry)
    }

    // == Is Expired ==
    /// Checks if the entry has expired.
    ///
    /// An entry is expired strictly after its TTL has elapsed:
    /// `now - created_at > ttl`.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(current_timestamp_ms())
    }

    /// Expiry check against an explicit clock reading.
    pub fn is_expired_at(&self, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.created_at) > self.ttl_ms
    }

    // == Time To Live ==
    /// Returns remaining TTL in milliseconds (0 once expired).
    pub fn ttl_remaining_ms(&self) -> u64 {
        let deadline = self.created_at.saturating_add(self.ttl_ms);
        deadline.saturating_sub(current_timestamp_ms())
    }

    /// True once a `mark-invalid` rule has flagged this entry.
    pub fn is_stale(&self) -> bool {
        self.metadata
            .get(STALE_FLAG)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Applies an annotation in place.
    pub fn annotate(&mut self, annotation: &Annotation) {
        match annotation {
            Annotation::MarkStale => {
                self.metadata.insert(STALE_FLAG.to_string(), Value::Bool(true));
            }
            Annotation::AddTags(tags) => {
                self.tags.extend(tags.iter().cloned());
            }
        }
    }
}

// == Annotation ==
/// In-place rewrites a backend performs on one of its own entries.
#[derive(Debug, Clone, PartialEq)]
pub enum Annotation {
    /// Keep the entry but flag it stale
    MarkStale,
    /// Union extra tags into the entry
    AddTags(Vec<String>),
}

// == Set Options ==
/// Options accepted by `set` and `get_or_set`.
#[derive(Debug, Clone, Default)]
pub struct SetOptions {
    /// Entry lifetime; the coordinator's default applies when unset
    pub ttl: Option<Duration>,
    pub tags: Vec<String>,
    pub metadata: Map<String, Value>,
    /// Target backend; the default backend when unset
    pub backend: Option<String>,
    /// Also write to every other registered backend (best-effort)
    pub mirror: bool,
}

impl SetOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn backend(mut self, name: impl Into<String>) -> Self {
        self.backend = Some(name.into());
        self
    }

    pub fn mirror(mut self) -> Self {
        self.mirror = true;
        self
    }
}

// == Utility Functions ==
/// Returns current Unix timestamp in milliseconds.
pub fn current_timestamp_ms() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}

/// Footprint estimate: key bytes plus encoded value bytes.
pub fn estimate_size(key: &str, value: &Value) -> usize {
    key.len() + value.to_string().len()
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::thread::sleep;

    #[test]
    fn test_entry_creation() {
        let entry = CacheEntry::new("user:1", json!({"name": "Ann"}), Duration::from_secs(60)).unwrap();

        assert_eq!(entry.key, "user:1");
        assert_eq!(entry.value, json!({"name": "Ann"}));
        assert_eq!(entry.ttl_ms, 60_000);
        assert_eq!(entry.hit_count, 0);
        assert!(entry.size_bytes > "user:1".len());
        assert!(!entry.is_expired());
    }

    #[test]
    fn test_zero_ttl_rejected() {
        let result = CacheEntry::new("k", json!(1), Duration::ZERO);
        assert!(matches!(result, Err(CacheError::InvalidRequest(_))));
    }

    #[test]
    fn test_entry_expiration() {
        let entry = CacheEntry::new("k", json!("v"), Duration::from_millis(50)).unwrap();

        assert!(!entry.is_expired());

        // Wait for expiration
        sleep(Duration::from_millis(80));

        assert!(entry.is_expired());
        assert_eq!(entry.ttl_remaining_ms(), 0);
    }

    #[test]
    fn test_expiration_boundary_condition() {
        let mut entry = CacheEntry::new("k", json!("v"), Duration::from_millis(100)).unwrap();
        entry.created_at = 1_000;

        // Exactly at the TTL boundary the entry is still live
        assert!(!entry.is_expired_at(1_100));
        assert!(entry.is_expired_at(1_101));
    }

    #[test]
    fn test_ttl_remaining_ms() {
        let entry = CacheEntry::new("k", json!("v"), Duration::from_secs(10)).unwrap();

        let remaining_ms = entry.ttl_remaining_ms();
        assert!(remaining_ms <= 10_000);
        assert!(remaining_ms >= 9_000);
    }

    #[test]
    fn test_huge_ttl_is_clamped_not_wrapped() {
        // 2^61 + 1 seconds overflows u64 once converted to milliseconds
        let ttl = Duration::from_secs((1u64 << 61) + 1);
        let entry = CacheEntry::new("long", json!("v"), ttl).unwrap();

        assert_eq!(entry.ttl_ms, u64::MAX);
        assert!(!entry.is_expired_at(entry.created_at + 1_100));
        assert!(!entry.is_expired());
    }

    #[test]
    fn test_ttl_remaining_saturates_at_far_deadline() {
        let entry = CacheEntry::new("k", json!("v"), Duration::from_secs(18_446_744_073_709_551)).unwrap();

        // created_at + ttl_ms exceeds u64::MAX; the deadline saturates
        let remaining = entry.ttl_remaining_ms();
        assert!(remaining >= u64::MAX - current_timestamp_ms());
    }

    #[test]
    fn test_from_options_applies_tags_and_metadata() {
        let options = SetOptions::new()
            .tag("users")
            .tag("profile")
            .metadata("source", json!("api"));
        let entry = CacheEntry::from_options("u:1", json!(1), Duration::from_secs(1), &options).unwrap();

        assert!(entry.tags.contains("users"));
        assert!(entry.tags.contains("profile"));
        assert_eq!(entry.metadata.get("source"), Some(&json!("api")));
    }

    #[test]
    fn test_annotations() {
        let mut entry = CacheEntry::new("k", json!("v"), Duration::from_secs(1)).unwrap();
        assert!(!entry.is_stale());

        entry.annotate(&Annotation::MarkStale);
        assert!(entry.is_stale());

        entry.annotate(&Annotation::AddTags(vec!["a".into(), "b".into()]));
        entry.annotate(&Annotation::AddTags(vec!["a".into()]));
        assert_eq!(entry.tags.len(), 2);
    }

    #[test]
    fn test_serialized_shape_is_camel_case() {
        let entry = CacheEntry::new("k", json!("v"), Duration::from_secs(1)).unwrap();
        let encoded = serde_json::to_value(&entry).unwrap();

        assert!(encoded.get("createdAt").is_some());
        assert!(encoded.get("ttlMs").is_some());
        assert!(encoded.get("sizeBytes").is_some());
    }
}
