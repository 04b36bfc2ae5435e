//! Router configuration for the identity service.

use super::state::AppState;
use crate::api::auth;
use axum::{
    Router,
    extract::State,
    response::{IntoResponse, Response},
    routing::{get, patch, post},
};
use dentalbook_runtime::{HealthCheck, HealthReport};
use dentalbook_web::health::{health_response, liveness, metrics_response};
use dentalbook_web::{AppError, correlation_id_layer};
use tower_http::trace::TraceLayer;

const SERVICE_NAME: &str = "identity-service";

/// Build the complete Axum router.
pub fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/auth/validate-token", post(auth::validate_token))
        .route("/auth/me", get(auth::me))
        .route("/auth/users", post(auth::create_user))
        .route("/auth/users/:id/status", patch(auth::set_status))
        .route("/auth/internal/users", get(auth::internal_users));

    Router::new()
        .route("/health", get(health))
        .route("/health/live", get(liveness))
        .route("/metrics", get(metrics))
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(correlation_id_layer())
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Response {
    let postgres = if state.accounts.storage_ready().await {
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
    use crate::service::tests::harness;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use dentalbook_web::AuthState;
    use std::sync::Arc;
    use tower::ServiceExt;

    #[tokio::test]
    async fn operations_endpoints() {
        let h = harness();
        let app = build_router(AppState::new(
            h.accounts.clone(),
            AuthState::new(Arc::new(h.accounts), "svc-key"),
            None,
        ));
        for (uri, status) in [
            ("/health", StatusCode::OK),
            ("/health/live", StatusCode::OK),
            ("/metrics", StatusCode::SERVICE_UNAVAILABLE),
            ("/api/auth/me", StatusCode::UNAUTHORIZED),
        ] {
            let response = app
                .clone()
                .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), status, "{uri}");
        }
    }
}
