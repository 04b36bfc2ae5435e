//! Profile service for the dental clinic.
//!
//! Holds the profile-side replica of every user: identity-owned fields
//! (id, email, names, role, active) copied from identity events, plus the
//! fields only this service edits (national id, phone, address, practitioner
//! and front-desk details).
//!
//! # Replication
//!
//! ```text
//!   identity ── user.events / auth.events ──► Reconciler ──┐
//!                                                           ▼
//!   HTTP (axum) ─────────────────────────────────────► Profiles ── AccountSource (sync fallback)
//!                                                           │
//!                               ProfileReducer (pure rules) │ conditional write on updated_at
//!                                                           ▼
//!                                             user.events (USER_UPDATED, USER_DELETED,
//!                                                          PROFILE_UPDATED)
//! ```
//!
//! Replication is at-least-once. `USER_CREATED` is idempotent on id and
//! email; updates merge field by field whatever their age.

pub mod aggregates;
pub mod api;
pub mod config;
pub mod events;
pub mod identity;
pub mod reconciler;
pub mod repository;
pub mod server;
pub mod service;
pub mod types;

pub use config::Config;
pub use service::{ProfileError, Profiles};
