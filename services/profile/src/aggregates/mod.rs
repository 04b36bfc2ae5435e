//! Aggregates for the profile service.
//!
//! - [`profile`]: replication, edits, profile completion and soft deletes

pub mod profile;

pub use profile::{ProfileAction, ProfileEnvironment, ProfileReducer, ProfileRejection, ProfileState};
