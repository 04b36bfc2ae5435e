//! Scheduling service for the dental clinic.
//!
//! Owns appointments: booking, practitioner assignment, rescheduling,
//! cancellation, status changes, and the periodic reminder, no-show and
//! retention sweeps.
//!
//! # Architecture
//!
//! ```text
//!   HTTP (axum)            sweeps (tokio intervals)
//!        │                          │
//!        └──────────┬───────────────┘
//!                   ▼
//!              Scheduler ── UserDirectory (profile service)
//!                   │
//!     begin tx + advisory locks (day / practitioner-day)
//!                   │
//!                   ▼
//!          AppointmentReducer  (pure booking rules)
//!                   │
//!         write row [+ outbox] ──► commit
//!                   │
//!                   ▼
//!   EffectExecutor: cita.events / notification.events, real-time rooms
//! ```
//!
//! Overlap checks and the write they guard run in one transaction holding
//! the calendar locks, so two concurrent bookings of the same slot cannot
//! both succeed.

pub mod aggregates;
pub mod api;
pub mod availability;
pub mod config;
pub mod directory;
pub mod engine;
pub mod events;
pub mod repository;
pub mod server;
pub mod sweeps;
pub mod types;

pub use config::Config;
pub use engine::{Scheduler, SchedulingError};
