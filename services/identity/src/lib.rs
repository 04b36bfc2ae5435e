//! Identity service for the dental clinic.
//!
//! Owns accounts and credentials: registration, login, token issuance and
//! validation, and account status. Every change is announced so the
//! profile service can keep its replica current.
//!
//! ```text
//!   HTTP (axum) ──► Accounts ──► AccountReducer (pure rules)
//!                      │                 │
//!        bcrypt + JWT  │                 ▼
//!                      ▼        user.events  (USER_CREATED, USER_UPDATED, USER_DELETED)
//!                 accounts table auth.events (USER_LOGIN)
//! ```
//!
//! Tokens presented to this service are checked against the live account,
//! so a deactivated user is refused even with an unexpired token.

pub mod aggregates;
pub mod api;
pub mod config;
pub mod events;
pub mod repository;
pub mod server;
pub mod service;
pub mod types;

pub use config::Config;
pub use service::{AccountError, Accounts};
