//! API Module
//!
//! HTTP handlers and routing for the admin REST API.
//!
//! # Endpoints
//! - `PUT /cache`, `GET /cache/:key`, `DELETE /cache/:key` - Entry access
//! - `GET /stats` - Cache statistics
//! - `POST /invalidate/pattern`, `POST /invalidate/tag` - Invalidation
//! - `GET /report`, `GET /alerts` - Monitoring
//! - `GET /health` - Health check endpoint

pub mod handlers;
pub mod routes;

pub use handlers::*;
pub use routes::create_router;
