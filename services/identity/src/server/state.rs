//! Application state for the identity HTTP server.

use crate::service::Accounts;
use axum::extract::FromRef;
use dentalbook_runtime::metrics::MetricsExporter;
use dentalbook_web::AuthState;

/// Application state shared across all HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    /// Account commands and queries
    pub accounts: Accounts,

    /// Token validation and internal-service credential
    pub auth: AuthState,

    /// Prometheus handle; `None` when no recorder is installed (tests)
    pub metrics: Option<MetricsExporter>,
}

impl AppState {
    /// Create a new application state.
    #[must_use]
    pub const fn new(accounts: Accounts, auth: AuthState, metrics: Option<MetricsExporter>) -> Self {
        Self { accounts, auth, metrics }
    }
}

impl FromRef<AppState> for AuthState {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.auth.clone()
    }
}
