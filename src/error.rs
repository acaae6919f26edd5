//! Error types for the cache coordinator
//!
//! Provides unified error handling using thiserror.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

// == Cache Error Enum ==
/// Unified error type for backends, the coordinator and the HTTP layer.
///
/// `Clone` so a single in-flight `get_or_set` result can be handed to every
/// waiting caller.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CacheError {
    /// Substrate missing or disabled in this runtime
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Write rejected even after an eviction retry
    #[error("Capacity exceeded: {0}")]
    CapacityExceeded(String),

    /// Stored record failed to decode
    #[error("Corrupt entry: {0}")]
    CorruptEntry(String),

    /// Call short-circuited by an open breaker
    #[error("Circuit open for backend '{backend}' (retry in {retry_in_ms}ms)")]
    CircuitOpen { backend: String, retry_in_ms: u64 },

    /// Invalidation dependency cycle
    #[error("Invalidation cycle detected at pattern: {0}")]
    CycleDetected(String),

    /// The value factory passed to `get_or_set` failed
    #[error("Factory failed: {0}")]
    Factory(String),

    /// Backend operation exceeded its deadline
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// No backend registered under this name
    #[error("Unknown backend: {0}")]
    UnknownBackend(String),

    /// Invalid request data
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Pattern could not be compiled
    #[error("Invalid pattern: {0}")]
    InvalidPattern(String),

    /// Value could not be encoded or decoded as the requested type
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Key not found in cache
    #[error("Key not found: {0}")]
    NotFound(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CacheError {
    /// Errors worth another attempt against the same backend.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CacheError::BackendUnavailable(_) | CacheError::Timeout(_)
        )
    }

    /// Topology failures: they trip the breaker and degrade to a cache miss.
    pub fn is_availability(&self) -> bool {
        matches!(
            self,
            CacheError::BackendUnavailable(_)
                | CacheError::Timeout(_)
                | CacheError::CircuitOpen { .. }
        )
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::Serialization(err.to_string())
    }
}

// == IntoResponse Implementation ==
impl IntoResponse for CacheError {
    fn into_response(self) -> Response {
        let status = match &self {
            CacheError::NotFound(_) => StatusCode::NOT_FOUND,
            CacheError::InvalidRequest(_)
            | CacheError::InvalidPattern(_)
            | CacheError::Serialization(_) => StatusCode::BAD_REQUEST,
            CacheError::UnknownBackend(_) => StatusCode::NOT_FOUND,
            CacheError::CapacityExceeded(_) => StatusCode::INSUFFICIENT_STORAGE,
            CacheError::BackendUnavailable(_) | CacheError::CircuitOpen { .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            CacheError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            CacheError::CorruptEntry(_)
            | CacheError::CycleDetected(_)
            | CacheError::Factory(_)
            | CacheError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({
            "error": self.to_string()
        }));

        (status, body).into_response()
    }
}

// == Result Type Alias ==
/// Convenience Result type for the cache coordinator.
pub type Result<T> = std::result::Result<T, CacheError>;
