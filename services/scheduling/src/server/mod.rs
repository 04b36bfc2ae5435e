//! HTTP server module for the scheduling service.
//!
//! - Application state shared by handlers
//! - Router configuration (REST, WebSocket, health, metrics)

pub mod routes;
pub mod state;

pub use routes::build_router;
pub use state::AppState;
