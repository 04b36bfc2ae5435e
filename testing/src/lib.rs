//! # Dentalbook Testing
//!
//! Testing utilities for the dentalbook services.
//!
//! This crate provides:
//! - Deterministic clocks
//! - An in-memory event bus that records publishes and settlements
//! - A Given-When-Then harness for reducers
//!
//! ## Example
//!
//! ```ignore
//! use dentalbook_testing::{ReducerTest, mocks::InMemoryEventBus, test_clock};
//!
//! ReducerTest::new(AppointmentReducer::new())
//!     .with_env(test_environment())
//!     .given_state(Booking::default())
//!     .when_action(AppointmentAction::Create { .. })
//!     .then_state(|state| assert!(state.rejection.is_none()))
//!     .run();
//! ```

use chrono::{DateTime, Utc};
use dentalbook_core::environment::Clock;

mod event_bus;

/// Mock implementations of environment traits.
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use std::sync::{Arc, RwLock};

    pub use crate::event_bus::{InMemoryEventBus, SettlementRecord};

    /// Fixed clock for deterministic tests
    ///
    /// Returns the same instant until moved with [`FixedClock::set`] or
    /// [`FixedClock::advance`]. Clones share the same instant, so a test can
    /// keep one handle and move time under an environment that owns another.
    ///
    /// # Example
    ///
    /// ```
    /// use dentalbook_testing::mocks::FixedClock;
    /// use dentalbook_core::environment::Clock;
    /// use chrono::{Duration, Utc};
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let before = clock.now();
    /// clock.advance(Duration::hours(2));
    /// assert_eq!(clock.now() - before, Duration::hours(2));
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: Arc<RwLock<DateTime<Utc>>>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Arc::new(RwLock::new(time)),
            }
        }

        /// Move the clock to `time`
        pub fn set(&self, time: DateTime<Utc>) {
            if let Ok(mut guard) = self.time.write() {
                *guard = time;
            }
        }

        /// Move the clock forward
        pub fn advance(&self, by: chrono::Duration) {
            if let Ok(mut guard) = self.time.write() {
                *guard += by;
            }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time.read().map_or_else(|poisoned| *poisoned.into_inner(), |guard| *guard)
        }
    }

    /// Create a default fixed clock for tests (2025-06-02 09:00:00 UTC, a Monday)
    ///
    /// # Panics
    ///
    /// Never in practice: the timestamp is hardcoded.
    #[must_use]
    pub fn test_clock() -> FixedClock {
        clock_at("2025-06-02T09:00:00Z")
    }

    /// Fixed clock at an RFC 3339 instant
    ///
    /// # Panics
    ///
    /// Panics if `rfc3339` does not parse.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn clock_at(rfc3339: &str) -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339(rfc3339)
                .expect("test timestamp should parse")
                .with_timezone(&Utc),
        )
    }
}

/// Install a test subscriber that honours `RUST_LOG`; safe to call repeatedly.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_test_writer()
        .try_init();
}

pub use mocks::{FixedClock, clock_at, test_clock};
pub use reducer_test::{ReducerTest, assertions};
