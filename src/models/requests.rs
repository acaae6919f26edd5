//! Request DTOs for the admin API
//!
//! Defines the structure of incoming HTTP request bodies and query strings.

use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

use crate::cache::{SetOptions, MAX_KEY_LENGTH};

/// Request body for PUT /cache
///
/// # Fields
/// - `key`: The cache key to store the value under
/// - `value`: Any JSON value
/// - `ttl`: Optional TTL in seconds (uses default if not specified)
/// - `tags`: Tags for tag-based invalidation
/// - `backend`: Target backend (default backend if absent)
/// - `mirror`: Also write to every other backend
#[derive(Debug, Clone, Deserialize)]
pub struct SetRequest {
    pub key: String,
    pub value: Value,
    /// Optional TTL in seconds
    #[serde(default)]
    pub ttl: Option<u64>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub backend: Option<String>,
    #[serde(default)]
    pub mirror: bool,
}

impl SetRequest {
    /// Validates the request data
    ///
    /// Returns an error message if validation fails, None if valid.
    pub fn validate(&self) -> Option<String> {
        if self.key.is_empty() {
            return Some("Key cannot be empty".to_string());
        }
        if self.key.len() > MAX_KEY_LENGTH {
            return Some(format!(
                "Key exceeds maximum length of {} characters",
                MAX_KEY_LENGTH
            ));
        }
        if self.ttl == Some(0) {
            return Some("TTL must be greater than zero".to_string());
        }
        None
    }

    pub fn options(&self) -> SetOptions {
        let mut options = SetOptions::new();
        if let Some(ttl) = self.ttl {
            options = options.ttl(Duration::from_secs(ttl));
        }
        for tag in &self.tags {
            options = options.tag(tag.clone());
        }
        if let Some(backend) = &self.backend {
            options = options.backend(backend.clone());
        }
        if self.mirror {
            options = options.mirror();
        }
        options
    }
}

/// Request body for POST /invalidate/pattern
#[derive(Debug, Clone, Deserialize)]
pub struct PatternRequest {
    pub pattern: String,
}

/// Request body for POST /invalidate/tag
#[derive(Debug, Clone, Deserialize)]
pub struct TagRequest {
    pub tag: String,
}

/// Optional `?backend=` selector
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BackendQuery {
    pub backend: Option<String>,
}
