//! Status API using Axum
//!
//! Read-only HTTP endpoints for monitoring a running relay:
//! - /health and /api/v1/health - liveness from the age of the last cycle
//! - /api/v1/status - counters and configuration summary

pub mod handlers;
mod routes;

pub use handlers::StatusState;

use axum::Router;
use tower_http::trace::TraceLayer;

/// Create the status router.
pub fn create_app(state: StatusState) -> Router {
    Router::new()
        .nest("/api/v1", routes::api_routes(state.clone()))
        .merge(routes::legacy_routes(state))
        .layer(TraceLayer::new_for_http())
}
