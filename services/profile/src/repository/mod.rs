//! Profile storage.
//!
//! Updates are optimistic: [`ProfileRepository::update`] only writes if the
//! stored `updated_at` still equals the value the caller read, and reports
//! whether it did. The service retries on a lost race.

mod memory;
mod postgres;

pub use memory::InMemoryProfileRepository;
pub use postgres::PostgresProfileRepository;

use crate::types::{Page, Profile, ProfileFilter};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dentalbook_auth::Role;
use dentalbook_postgres::RepositoryError;

/// Result alias for storage operations
pub type Result<T> = std::result::Result<T, RepositoryError>;

/// Unique constraint on `email`
pub const EMAIL_CONSTRAINT: &str = "profiles_email_key";
/// Unique constraint on `national_id`
pub const NATIONAL_ID_CONSTRAINT: &str = "profiles_national_id_key";
/// Primary key
pub const ID_CONSTRAINT: &str = "profiles_pkey";

/// The wire name of the field behind a unique-violation message.
#[must_use]
pub fn violated_field(message: &str) -> &'static str {
    if message.contains(NATIONAL_ID_CONSTRAINT) {
        "nationalId"
    } else if message.contains(EMAIL_CONSTRAINT) {
        "email"
    } else {
        "id"
    }
}

/// Persistence for profiles.
#[async_trait]
pub trait ProfileRepository: Send + Sync {
    /// One profile by id
    async fn find(&self, id: i64) -> Result<Option<Profile>>;

    /// One profile by email (exact match)
    async fn find_by_email(&self, email: &str) -> Result<Option<Profile>>;

    /// Insert a new profile.
    ///
    /// Fails with [`RepositoryError::UniqueViolation`] on a taken id, email
    /// or national id.
    async fn insert(&self, profile: &Profile) -> Result<()>;

    /// Overwrite `profile` if its stored `updated_at` is still `expected`.
    /// Returns `false` if someone else wrote first.
    async fn update(&self, profile: &Profile, expected: DateTime<Utc>) -> Result<bool>;

    /// Filtered listing, newest first
    async fn list(&self, filter: &ProfileFilter) -> Result<Page<Profile>>;

    /// Users with `role` and the given active flag, by name then surname
    async fn by_role(&self, role: Role, active: bool) -> Result<Vec<Profile>>;

    /// Storage is reachable
    async fn ping(&self) -> bool;
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn constraint_names_map_to_fields() {
        assert_eq!(
            violated_field("duplicate key value violates unique constraint \"profiles_national_id_key\""),
            "nationalId"
        );
        assert_eq!(violated_field("profiles_email_key"), "email");
        assert_eq!(violated_field("profiles_pkey"), "id");
    }
}
