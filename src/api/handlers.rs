//! HTTP handlers for the status API

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::relay::{HealthState, RelayStats, SharedStats};

/// Shared state for the status handlers
#[derive(Clone)]
pub struct StatusState {
    pub stats: SharedStats,
}

impl StatusState {
    pub fn new(stats: SharedStats) -> Self {
        Self { stats }
    }
}

// ============================================================================
// Health
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: HealthState,
    pub version: &'static str,
    pub uptime_seconds: i64,
    pub cycles_completed: u64,
    pub last_cycle_at: Option<DateTime<Utc>>,
    /// Age of the last cycle beyond which the relay reports `stale`.
    pub stale_after_secs: i64,
}

/// GET /health, /api/v1/health
///
/// 200 while cycles keep completing, 503 before the first cycle or once
/// the last one is too old.
pub async fn get_health(State(state): State<StatusState>) -> Response {
    let stats = state.stats.read().await;
    let now = Utc::now();
    let health = stats.health(now);

    let body = HealthResponse {
        status: health,
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: (now - stats.started_at).num_seconds(),
        cycles_completed: stats.cycles_completed,
        last_cycle_at: stats.last_cycle_at,
        stale_after_secs: stats.stale_after().num_seconds(),
    };

    let code = match health {
        HealthState::Healthy => StatusCode::OK,
        HealthState::Starting | HealthState::Stale => StatusCode::SERVICE_UNAVAILABLE,
    };
    (code, Json(body)).into_response()
}

// ============================================================================
// Status
// ============================================================================

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: HealthState,
    pub version: &'static str,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub stats: RelayStats,
}

/// GET /api/v1/status - snapshot of the relay counters
pub async fn get_status(State(state): State<StatusState>) -> Json<StatusResponse> {
    let stats = state.stats.read().await.clone();
    let now = Utc::now();
    Json(StatusResponse {
        status: stats.health(now),
        version: env!("CARGO_PKG_VERSION"),
        timestamp: now,
        stats,
    })
}
