//! Axum integration for the dentalbook services.
//!
//! Handlers stay thin: extract, build an action, hand it to the service's
//! reducer pipeline, map the outcome to a response.
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │         Imperative Shell (Axum)         │  ← HTTP, JSON, WebSockets
//! │  - Request parsing, auth extractors     │  ← Correlation IDs
//! │  - Response / error serialization       │  ← Logging, metrics
//! ├─────────────────────────────────────────┤
//! │         Functional Core                 │
//! │  - Reducers (booking rules, profiles)   │  ← Testable at memory speed
//! │  - Effect descriptions (values)         │  ← No I/O
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use dentalbook_web::{AppError, AuthUser};
//! use axum::{Json, extract::State};
//!
//! async fn get_profile(
//!     auth: AuthUser,
//!     State(state): State<AppState>,
//!     Path(id): Path<i64>,
//! ) -> Result<Json<Profile>, AppError> {
//!     auth.require_self_or_staff(id)?;
//!     let profile = state.repo.find(id).await?
//!         .ok_or_else(|| AppError::not_found("Profile", id))?;
//!     Ok(Json(profile))
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod extractors;
pub mod health;
pub mod middleware;
pub mod realtime;

pub use error::AppError;
pub use extractors::{AuthState, AuthUser, Caller, ClientIp, CorrelationId, InternalService, UserAgent};
pub use middleware::{CORRELATION_ID_HEADER, correlation_id_layer};
pub use realtime::{RealtimeMessage, Room, RoomBroadcaster};
