//! API Routes
//!
//! Configures the Axum router with all admin endpoints.

use axum::{
    routing::{get, post, put},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::handlers::{
    alerts_handler, clear_alerts_handler, delete_handler, get_handler, health_handler,
    invalidate_pattern_handler, invalidate_tag_handler, report_handler, set_handler,
    stats_handler, AppState,
};

/// Creates the main router with all endpoints configured.
///
/// # Endpoints
/// - `PUT /cache` - Store a value
/// - `GET /cache/:key` - Retrieve an entry (`?backend=` optional)
/// - `DELETE /cache/:key` - Delete a key (`?backend=` optional)
/// - `GET /stats` - Statistics (`?backend=` optional)
/// - `POST /invalidate/pattern` - Rule-driven pattern invalidation
/// - `POST /invalidate/tag` - Tag invalidation
/// - `GET /report` - Performance report
/// - `GET /alerts`, `DELETE /alerts` - Current alerts
/// - `GET /health` - Health check with per-backend circuit state
///
/// # Middleware
/// - CORS: Allows any origin (configurable for production)
/// - Tracing: Logs all requests for debugging
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/cache", put(set_handler))
        .route("/cache/:key", get(get_handler).delete(delete_handler))
        .route("/stats", get(stats_handler))
        .route("/invalidate/pattern", post(invalidate_pattern_handler))
        .route("/invalidate/tag", post(invalidate_tag_handler))
        .route("/report", get(report_handler))
        .route("/alerts", get(alerts_handler).delete(clear_alerts_handler))
        .route("/health", get(health_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
