//! Router configuration for the profile service.

use super::state::AppState;
use crate::api::users;
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

const SERVICE_NAME: &str = "profile-service";

/// Build the complete Axum router.
///
/// - `/api/users/...`: profile endpoints (bearer token or internal credential)
/// - `/health`, `/health/live`, `/metrics`: operations
pub fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/users", get(users::list_users))
        .route("/users/create-with-id", post(users::create_with_id))
        .route("/users/practitioners/available", get(users::available_practitioners))
        .route("/users/role/:role", get(users::users_by_role))
        .route("/users/sync/:id", post(users::sync_user))
        .route("/users/by-email/:email", get(users::user_by_email))
        .route(
            "/users/:id",
            get(users::get_user).put(users::update_user).delete(users::delete_user),
        )
        .route("/users/:id/complete-profile", post(users::complete_profile))
        .route("/users/:id/toggle-active", patch(users::toggle_active));

    Router::new()
        .route("/health", get(health))
        .route("/health/live", get(liveness))
        .route("/metrics", get(metrics))
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(correlation_id_layer())
        .with_state(state)
}

/// Readiness, gated on the replica store.
async fn health(State(state): State<AppState>) -> Response {
    let postgres = if state.profiles.storage_ready().await {
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
