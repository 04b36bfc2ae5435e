//! Application state for the profile HTTP server.

use crate::service::Profiles;
use axum::extract::FromRef;
use dentalbook_runtime::metrics::MetricsExporter;
use dentalbook_web::AuthState;

/// Application state shared across all HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    /// Profile replica and commands
    pub profiles: Profiles,

    /// Token validation and internal-service credential
    pub auth: AuthState,

    /// Prometheus handle; `None` when no recorder is installed (tests)
    pub metrics: Option<MetricsExporter>,
}

impl AppState {
    /// Create a new application state.
    #[must_use]
    pub const fn new(profiles: Profiles, auth: AuthState, metrics: Option<MetricsExporter>) -> Self {
        Self { profiles, auth, metrics }
    }
}

impl FromRef<AppState> for AuthState {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.auth.clone()
    }
}
