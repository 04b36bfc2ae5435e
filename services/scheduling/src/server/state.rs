//! Application state for the scheduling HTTP server.

use crate::engine::Scheduler;
use axum::extract::FromRef;
use dentalbook_runtime::metrics::MetricsExporter;
use dentalbook_web::{AuthState, RoomBroadcaster};

/// Application state shared across all HTTP handlers.
///
/// Cloned per request; every field is a handle over shared data.
#[derive(Clone)]
pub struct AppState {
    /// Booking engine
    pub scheduler: Scheduler,

    /// Token validation and internal-service credential
    pub auth: AuthState,

    /// Real-time rooms served on `/ws`
    pub rooms: RoomBroadcaster,

    /// Prometheus handle; `None` when no recorder is installed (tests)
    pub metrics: Option<MetricsExporter>,
}

impl AppState {
    /// Create a new application state.
    #[must_use]
    pub const fn new(
        scheduler: Scheduler,
        auth: AuthState,
        rooms: RoomBroadcaster,
        metrics: Option<MetricsExporter>,
    ) -> Self {
        Self {
            scheduler,
            auth,
            rooms,
            metrics,
        }
    }
}

// Auth extractors need the validator
impl FromRef<AppState> for AuthState {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.auth.clone()
    }
}

// `ws_handler` needs the rooms
impl FromRef<AppState> for RoomBroadcaster {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.rooms.clone()
    }
}
