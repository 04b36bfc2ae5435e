//! HTTP server module for the identity service.

pub mod routes;
pub mod state;

pub use routes::build_router;
pub use state::AppState;
