//! API Handlers
//!
//! HTTP request handlers for each admin endpoint. Handlers only translate
//! between HTTP and the coordinator, invalidation engine and monitor.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};

use crate::backend::{Capacity, IndexedBackend, MemoryBackend, MemorySubstrate, WebStorageBackend};
use crate::cache::CacheCoordinator;
use crate::config::Config;
use crate::error::{CacheError, Result};
use crate::invalidation::{InvalidationEngine, StorageEventBus};
use crate::models::{
    AlertsResponse, BackendHealth, BackendQuery, DeleteResponse, GetResponse, HealthResponse,
    PatternInvalidationResponse, PatternRequest, SetRequest, SetResponse, StatsResponse,
    TagInvalidationResponse, TagRequest,
};
use crate::monitoring::{Monitor, PerformanceReport};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<CacheCoordinator>,
    pub engine: Arc<InvalidationEngine>,
    pub monitor: Arc<Monitor>,
}

impl AppState {
    pub fn new(engine: Arc<InvalidationEngine>, monitor: Arc<Monitor>) -> Self {
        Self {
            coordinator: engine.coordinator().clone(),
            engine,
            monitor,
        }
    }

    /// Builds the default topology from configuration.
    ///
    /// - `memory`: volatile, the default backend
    /// - `local`: durable per-origin web storage, also carrying broadcasts
    /// - `session`: session-scoped web storage
    /// - `indexed`: transactional structured store
    pub fn from_config(config: &Config) -> Result<Self> {
        let monitor = Arc::new(Monitor::default());
        let ttl = config.default_ttl_duration();
        let capacity = Capacity::entries(config.max_entries);
        let durable = MemorySubstrate::new(config.storage_quota_bytes);
        let session = MemorySubstrate::new(config.storage_quota_bytes);

        let coordinator = CacheCoordinator::builder()
            .backend(MemoryBackend::new("memory", capacity, ttl))
            .backend(WebStorageBackend::local("local", Arc::new(durable.attach()), capacity, ttl))
            .backend(WebStorageBackend::session("session", Arc::new(session), capacity, ttl))
            .backend(IndexedBackend::new("indexed", capacity, ttl))
            .default_backend("memory")
            .default_ttl(ttl)
            .resilience(config.resilience())
            .monitor(monitor.clone())
            .build()?;

        let bus = StorageEventBus::new(Arc::new(durable.attach()));
        let engine = InvalidationEngine::new(Arc::new(coordinator), Arc::new(bus));
        Ok(Self::new(Arc::new(engine), monitor))
    }
}

/// Handler for PUT /cache
///
/// Stores a JSON value with optional TTL, tags, target backend and mirroring.
pub async fn set_handler(
    State(state): State<AppState>,
    Json(req): Json<SetRequest>,
) -> Result<Json<SetResponse>> {
    if let Some(error_msg) = req.validate() {
        return Err(CacheError::InvalidRequest(error_msg));
    }

    let stored = state
        .coordinator
        .set_value(&req.key, req.value.clone(), &req.options())
        .await?;

    Ok(Json(SetResponse::new(req.key, stored)))
}

/// Handler for GET /cache/:key
pub async fn get_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(query): Query<BackendQuery>,
) -> Result<Json<GetResponse>> {
    let entry = state
        .coordinator
        .get_entry(&key, query.backend.as_deref())
        .await?;

    match entry {
        Some(entry) => Ok(Json(GetResponse::from_entry(entry))),
        None => Err(CacheError::NotFound(key)),
    }
}

/// Handler for DELETE /cache/:key
///
/// Without `?backend=` the key is removed from every backend.
pub async fn delete_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(query): Query<BackendQuery>,
) -> Result<Json<DeleteResponse>> {
    if !state.coordinator.delete(&key, query.backend.as_deref()).await? {
        return Err(CacheError::NotFound(key));
    }

    Ok(Json(DeleteResponse::new(key)))
}

/// Handler for GET /stats
///
/// One backend with `?backend=`, otherwise the aggregate plus a breakdown.
pub async fn stats_handler(
    State(state): State<AppState>,
    Query(query): Query<BackendQuery>,
) -> Result<Json<StatsResponse>> {
    let response = match query.backend {
        Some(backend) => {
            let stats = state.coordinator.stats(Some(&backend)).await?;
            StatsResponse::single(backend, stats)
        }
        None => StatsResponse::aggregate(state.coordinator.backend_stats().await?),
    };

    Ok(Json(response))
}

/// Handler for POST /invalidate/pattern
pub async fn invalidate_pattern_handler(
    State(state): State<AppState>,
    Json(req): Json<PatternRequest>,
) -> Result<Json<PatternInvalidationResponse>> {
    let report = state.engine.invalidate(&req.pattern).await?;

    Ok(Json(PatternInvalidationResponse {
        pattern: req.pattern,
        report,
    }))
}

/// Handler for POST /invalidate/tag
pub async fn invalidate_tag_handler(
    State(state): State<AppState>,
    Json(req): Json<TagRequest>,
) -> Result<Json<TagInvalidationResponse>> {
    if req.tag.is_empty() {
        return Err(CacheError::InvalidRequest("Tag cannot be empty".to_string()));
    }
    let removed = state.engine.invalidate_tag(&req.tag).await?;

    Ok(Json(TagInvalidationResponse {
        tag: req.tag,
        removed,
    }))
}

/// Handler for GET /report
pub async fn report_handler(State(state): State<AppState>) -> Json<PerformanceReport> {
    Json(state.monitor.generate_report())
}

/// Handler for GET /alerts
pub async fn alerts_handler(State(state): State<AppState>) -> Json<AlertsResponse> {
    Json(AlertsResponse::new(state.monitor.get_alerts()))
}

/// Handler for DELETE /alerts
pub async fn clear_alerts_handler(State(state): State<AppState>) -> StatusCode {
    state.monitor.clear_alerts();
    StatusCode::NO_CONTENT
}

/// Handler for GET /health
///
/// Reports "degraded" while any backend's circuit is open.
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let coordinator = &state.coordinator;
    let backends = coordinator
        .backends()
        .iter()
        .map(|backend| BackendHealth {
            name: backend.name().to_string(),
            persistence: backend.persistence(),
            is_default: backend.name() == coordinator.default_backend(),
            circuit: coordinator.resilience().breaker_state(backend.name()),
        })
        .collect();

    Json(HealthResponse::new(backends))
}
