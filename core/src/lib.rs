//! # Dentalbook Core
//!
//! Core traits and types shared by the dentalbook services.
//!
//! Business logic is written as reducers: pure functions that take the current
//! state and an action, mutate the state, and return descriptions of side
//! effects. The services (the imperative shell) persist the state and hand the
//! effects to the runtime for execution.
//!
//! ## Core Concepts
//!
//! - **State**: Domain state a reducer works on (an appointment and its day, a profile)
//! - **Action**: All inputs to a reducer (commands from HTTP, sweeps, remote events)
//! - **Reducer**: `(State, Action, Environment) → (State, Effects)`
//! - **Effect**: Side effect descriptions (publish an event, broadcast a notification)
//! - **Environment**: Injected dependencies (clock, event bus, fanout)
//!
//! ## Example
//!
//! ```ignore
//! use dentalbook_core::{effect::Effect, reducer::Reducer, smallvec, SmallVec};
//!
//! impl Reducer for AppointmentReducer {
//!     type State = Booking;
//!     type Action = AppointmentAction;
//!     type Environment = AppointmentEnvironment;
//!
//!     fn reduce(
//!         &self,
//!         state: &mut Booking,
//!         action: AppointmentAction,
//!         env: &AppointmentEnvironment,
//!     ) -> SmallVec<[Effect<AppointmentAction>; 4]> {
//!         smallvec![Effect::None]
//!     }
//! }
//! ```

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};
pub use smallvec::{smallvec, SmallVec};

pub mod event;
pub mod event_bus;

mod effect_macros;

/// Reducer module - the core trait for business logic
///
/// Reducers are pure functions: `(State, Action, Environment) → (State, Effects)`.
/// They contain all business rules and are deterministic given a fixed clock.
pub mod reducer {
    use super::effect::Effect;
    use smallvec::SmallVec;

    /// The Reducer trait - core abstraction for business logic
    ///
    /// # Type Parameters
    ///
    /// - `State`: The domain state this reducer operates on
    /// - `Action`: The action type this reducer processes
    /// - `Environment`: The injected dependencies this reducer needs
    pub trait Reducer {
        /// The state type this reducer operates on
        type State;

        /// The action type this reducer processes
        type Action;

        /// The environment type with injected dependencies
        type Environment;

        /// Reduce an action into state changes and effects
        ///
        /// This is a pure function that:
        /// 1. Validates the action
        /// 2. Updates state in place
        /// 3. Returns effect descriptions to be executed
        fn reduce(
            &self,
            state: &mut Self::State,
            action: Self::Action,
            env: &Self::Environment,
        ) -> SmallVec<[Effect<Self::Action>; 4]>;
    }
}

/// Effect module - side effect descriptions
///
/// Effects are values. Reducers return them; the runtime executes them after
/// the state change they belong to has been made durable.
pub mod effect {
    use crate::event::SerializedEvent;
    use crate::event_bus::{EventBus, EventBusError};
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::Arc;

    /// Callback invoked when an event bus operation succeeds
    pub type OnPublished<Action> = Box<dyn FnOnce(()) -> Option<Action> + Send>;

    /// Callback invoked when an event bus operation fails
    pub type OnPublishFailed<Action> = Box<dyn FnOnce(EventBusError) -> Option<Action> + Send>;

    /// Event bus operations that can be described as effects
    pub enum EventBusOperation<Action> {
        /// Publish one event to a topic
        Publish {
            /// Bus to publish through
            event_bus: Arc<dyn EventBus>,
            /// Destination topic
            topic: String,
            /// The event (envelope bytes plus routing metadata)
            event: SerializedEvent,
            /// Feedback on success
            on_success: OnPublished<Action>,
            /// Feedback on failure
            on_error: OnPublishFailed<Action>,
        },
    }

    impl<Action> EventBusOperation<Action> {
        /// Topic this operation targets
        #[must_use]
        pub fn topic(&self) -> &str {
            match self {
                Self::Publish { topic, .. } => topic,
            }
        }

        /// Event carried by this operation
        #[must_use]
        pub const fn event(&self) -> &SerializedEvent {
            match self {
                Self::Publish { event, .. } => event,
            }
        }
    }

    /// Effect type - describes a side effect to be executed
    ///
    /// # Type Parameters
    ///
    /// - `Action`: The action type that effects can produce (feedback loop)
    pub enum Effect<Action> {
        /// No-op effect
        None,

        /// Run effects in parallel
        Parallel(Vec<Effect<Action>>),

        /// Run effects sequentially
        Sequential(Vec<Effect<Action>>),

        /// Arbitrary async computation
        ///
        /// Returns `Option<Action>`; if `Some`, the action is handed back to the caller's feedback sink.
        Future(Pin<Box<dyn Future<Output = Option<Action>> + Send>>),

        /// Publish a domain event
        ///
        /// Kept as data (not an opaque future) so the shell can divert it into
        /// the transactional outbox instead of publishing directly.
        PublishEvent(EventBusOperation<Action>),
    }

    // Manual Debug implementation since Future doesn't implement Debug
    impl<Action> std::fmt::Debug for Effect<Action> {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                Effect::None => write!(f, "Effect::None"),
                Effect::Parallel(effects) => {
                    f.debug_tuple("Effect::Parallel").field(effects).finish()
                },
                Effect::Sequential(effects) => {
                    f.debug_tuple("Effect::Sequential").field(effects).finish()
                },
                Effect::Future(_) => write!(f, "Effect::Future(<future>)"),
                Effect::PublishEvent(op) => f
                    .debug_struct("Effect::PublishEvent")
                    .field("topic", &op.topic())
                    .field("event_type", &op.event().event_type)
                    .finish(),
            }
        }
    }

    impl<Action> Effect<Action> {
        /// Combine effects to run in parallel
        #[must_use]
        pub const fn merge(effects: Vec<Effect<Action>>) -> Effect<Action> {
            Effect::Parallel(effects)
        }

        /// Chain effects to run sequentially
        #[must_use]
        pub const fn chain(effects: Vec<Effect<Action>>) -> Effect<Action> {
            Effect::Sequential(effects)
        }

        /// Collect every publish operation in this effect tree, depth first.
        ///
        /// Used by tests and by the outbox path to see which events a reducer emitted.
        #[must_use]
        pub fn published_events(&self) -> Vec<(&str, &SerializedEvent)> {
            let mut found = Vec::new();
            self.collect_published(&mut found);
            found
        }

        fn collect_published<'a>(&'a self, found: &mut Vec<(&'a str, &'a SerializedEvent)>) {
            match self {
                Effect::PublishEvent(op) => found.push((op.topic(), op.event())),
                Effect::Parallel(effects) | Effect::Sequential(effects) => {
                    for effect in effects {
                        effect.collect_published(found);
                    }
                },
                Effect::None | Effect::Future(_) => {},
            }
        }
    }
}

/// Environment module - dependency injection traits
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Production clock backed by the system time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::effect::Effect;
    use super::environment::{Clock, SystemClock};

    #[test]
    fn system_clock_moves_forward() {
        let clock = SystemClock;
        let first = clock.now();
        let second = clock.now();
        assert!(second >= first);
    }

    #[test]
    fn published_events_ignores_plain_futures() {
        let effect: Effect<()> = Effect::merge(vec![
            Effect::None,
            Effect::Future(Box::pin(async { None })),
        ]);
        assert!(effect.published_events().is_empty());
    }
}
