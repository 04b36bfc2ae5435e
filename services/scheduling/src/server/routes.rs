//! Router configuration for the scheduling service.

use super::state::AppState;
use crate::api::appointments;
use axum::{
    Router,
    extract::State,
    response::{IntoResponse, Response},
    routing::{get, patch, post, put},
};
use dentalbook_runtime::{HealthCheck, HealthReport};
use dentalbook_web::health::{health_response, liveness, metrics_response};
use dentalbook_web::{AppError, correlation_id_layer, realtime::ws_handler};
use tower_http::trace::TraceLayer;

const SERVICE_NAME: &str = "scheduling-service";

/// Build the complete Axum router.
///
/// - `/api/appointments/...`: booking endpoints (bearer token required)
/// - `/ws`: real-time rooms (bearer token or `?token=`)
/// - `/health`, `/health/live`, `/metrics`: operations
pub fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route(
            "/appointments",
            post(appointments::create_appointment).get(appointments::list_appointments),
        )
        .route("/appointments/:id", get(appointments::get_appointment))
        .route("/appointments/:id/assign", put(appointments::assign_practitioner))
        .route("/appointments/:id/reschedule", put(appointments::reschedule_appointment))
        .route("/appointments/:id/cancel", put(appointments::cancel_appointment))
        .route("/appointments/:id/status", patch(appointments::update_status))
        .route("/appointments/client/:id", get(appointments::client_appointments))
        .route(
            "/appointments/practitioner/:id",
            get(appointments::practitioner_appointments),
        )
        .route("/appointments/availability/:date", get(appointments::availability));

    Router::new()
        // Operations (no authentication)
        .route("/health", get(health))
        .route("/health/live", get(liveness))
        .route("/metrics", get(metrics))
        .route("/ws", get(ws_handler))
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(correlation_id_layer())
        .with_state(state)
}

/// Readiness: the service is only useful with its database.
///
/// ```bash
/// curl http://localhost:3003/health
/// # {"service":"scheduling-service","status":"healthy","checks":[...]}
/// ```
async fn health(State(state): State<AppState>) -> Response {
    let postgres = if state.scheduler.storage_ready().await {
        HealthCheck::healthy("postgres")
    } else {
        HealthCheck::unhealthy("postgres", "database unreachable")
    };
    health_response(HealthReport::new(SERVICE_NAME, vec![postgres]))
}

async fn metrics(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(exporter) => metrics_response(exporter),
        None => AppError::unavailable("Metrics recorder not installed").into_response(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::engine::tests::harness;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use dentalbook_auth::{AuthError, AuthenticatedUser, TokenValidator};
    use dentalbook_web::AuthState;
    use std::sync::Arc;
    use tower::ServiceExt;

    struct RejectAll;

    #[async_trait]
    impl TokenValidator for RejectAll {
        async fn validate(&self, _token: &str) -> dentalbook_auth::Result<AuthenticatedUser> {
            Err(AuthError::InvalidToken("rejected".to_string()))
        }
    }

    fn app() -> Router {
        let h = harness("2025-06-01T09:00:00Z");
        build_router(AppState::new(
            h.scheduler,
            AuthState::new(Arc::new(RejectAll), "svc-key"),
            h.rooms,
            None,
        ))
    }

    async fn get_status(uri: &str) -> StatusCode {
        app()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
            .status()
    }

    #[tokio::test]
    async fn health_reports_storage() {
        assert_eq!(get_status("/health").await, StatusCode::OK);
        assert_eq!(get_status("/health/live").await, StatusCode::OK);
    }

    #[tokio::test]
    async fn realtime_upgrade_requires_a_valid_token() {
        for token in [None, Some("Bearer forged")] {
            let mut request = Request::builder()
                .uri("/ws")
                .header("Connection", "upgrade")
                .header("Upgrade", "websocket")
                .header("Sec-WebSocket-Version", "13")
                .header("Sec-WebSocket-Key", "dGhlIHNhbXBsZSBub25jZQ==");
            if let Some(token) = token {
                request = request.header("Authorization", token);
            }
            let response = app().oneshot(request.body(Body::empty()).unwrap()).await.unwrap();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        }
    }

    #[tokio::test]
    async fn metrics_without_a_recorder_is_unavailable() {
        assert_eq!(get_status("/metrics").await, StatusCode::SERVICE_UNAVAILABLE);
    }
}
