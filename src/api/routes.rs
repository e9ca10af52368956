//! API route definitions

use axum::{routing::get, Router};

use super::handlers::{self, StatusState};

/// Versioned status routes, nested under /api/v1
pub fn api_routes(state: StatusState) -> Router {
    Router::new()
        .route("/health", get(handlers::get_health))
        .route("/status", get(handlers::get_status))
        .with_state(state)
}

/// Health endpoint at root level, for load balancers and container probes
pub fn legacy_routes(state: StatusState) -> Router {
    Router::new()
        .route("/health", get(handlers::get_health))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RelayConfig;
    use crate::relay::RelayStats;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn create_test_state() -> StatusState {
        StatusState::new(RelayStats::new(&RelayConfig::default()).shared())
    }

    #[tokio::test]
    async fn test_api_routes_status() {
        let app = api_routes(create_test_state());

        let response = app
            .oneshot(Request::builder().uri("/status").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_legacy_health_before_first_cycle() {
        let app = legacy_routes(create_test_state());

        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
