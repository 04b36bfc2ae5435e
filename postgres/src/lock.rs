//! Transaction-scoped advisory locks.
//!
//! Availability checks and the writes they guard must not interleave across
//! requests or service replicas. Writers take `pg_advisory_xact_lock` on the
//! scopes they touch before reading; the lock is released on commit or
//! rollback.
//!
//! Several scopes are always locked in ascending key order so two writers
//! locking the same pair cannot deadlock.

use chrono::NaiveDate;
use sqlx::PgConnection;

/// Something a booking write must hold exclusively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockScope {
    /// The clinic-wide calendar of one day
    Day(NaiveDate),
    /// One practitioner's calendar on one day
    PractitionerDay(NaiveDate, i64),
}

impl LockScope {
    /// Stable 64-bit key for `pg_advisory_xact_lock`.
    ///
    /// FNV-1a over a textual form of the scope; identical across processes
    /// and builds.
    #[must_use]
    pub fn key(&self) -> i64 {
        let text = match self {
            Self::Day(date) => format!("day:{date}"),
            Self::PractitionerDay(date, practitioner) => format!("practitioner:{practitioner}:{date}"),
        };

        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in text.bytes() {
            hash ^= u64::from(byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        i64::from_ne_bytes(hash.to_ne_bytes())
    }
}

/// Sorted, de-duplicated keys for a set of scopes.
#[must_use]
pub fn ordered_keys(scopes: &[LockScope]) -> Vec<i64> {
    let mut keys: Vec<i64> = scopes.iter().map(LockScope::key).collect();
    keys.sort_unstable();
    keys.dedup();
    keys
}

/// Take transaction-scoped advisory locks on every scope, in key order.
///
/// Must be called inside a transaction; blocks until the locks are granted.
///
/// # Errors
///
/// Returns the database error if a lock statement fails.
pub async fn advisory_xact_lock(
    conn: &mut PgConnection,
    scopes: &[LockScope],
) -> Result<(), sqlx::Error> {
    for key in ordered_keys(scopes) {
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(key)
            .execute(&mut *conn)
            .await?;
    }
    tracing::trace!(scopes = ?scopes, "Advisory locks acquired");
    Ok(())
}
