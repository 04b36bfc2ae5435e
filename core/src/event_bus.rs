//! Event bus abstraction for cross-service communication.
//!
//! Services never touch each other's storage. Identity, profile and
//! scheduling changes flow between them as events published on named topics
//! and consumed by durable consumer groups.
//!
//! # Delivery Semantics
//!
//! - **At-least-once**: a message is redelivered until a consumer acknowledges it
//! - **Explicit settlement**: every [`Delivery`] must be settled with
//!   [`Delivery::ack`] or [`Delivery::nack`]; `nack(true)` requeues the message,
//!   `nack(false)` drops it
//! - **Idempotent consumers**: duplicates are expected and must be harmless
//! - **Ordering**: only within one partition (one routing key)
//!
//! # Topics
//!
//! - `user.events` - identity and profile changes
//! - `auth.events` - login activity
//! - `cita.events` - appointment lifecycle
//! - `notification.events` - reminders
//!
//! # Implementations
//!
//! - `InMemoryEventBus` (testing crate) - in-process, records settlements
//! - `RedpandaEventBus` (redpanda crate) - Kafka-compatible, manual commits
//!
//! # Example
//!
//! ```rust,ignore
//! use futures::StreamExt;
//!
//! let mut stream = event_bus.subscribe(&["user.events"]).await?;
//! while let Some(result) = stream.next().await {
//!     let delivery = result?;
//!     match handle(delivery.event()).await {
//!         Ok(()) => delivery.ack()?,
//!         Err(_) => delivery.nack(true)?,
//!     }
//! }
//! ```

use crate::event::SerializedEvent;
use futures::Stream;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors that can occur during event bus operations.
#[derive(Error, Debug, Clone)]
pub enum EventBusError {
    /// Failed to connect to the event bus
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Failed to publish an event to a topic
    #[error("Publish failed for topic '{topic}': {reason}")]
    PublishFailed {
        /// The topic that failed
        topic: String,
        /// The reason for failure
        reason: String,
    },

    /// Failed to subscribe to topics
    #[error("Subscription failed for topics {topics:?}: {reason}")]
    SubscriptionFailed {
        /// The topics that failed to subscribe
        topics: Vec<String>,
        /// The reason for failure
        reason: String,
    },

    /// Failed to deserialize an event
    #[error("Deserialization failed: {0}")]
    DeserializationFailed(String),

    /// Failed to settle (ack/nack) a delivery
    #[error("Settlement failed: {0}")]
    SettlementFailed(String),

    /// Network or transport error
    #[error("Transport error: {0}")]
    TransportError(String),
}

/// How a consumer settles a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    /// Processing succeeded; the message will not be delivered again
    Ack,
    /// Processing failed
    Nack {
        /// Whether the message should be delivered again
        requeue: bool,
    },
}

/// Transport-specific settlement of a single delivery.
pub trait Acknowledger: Send {
    /// Settle the delivery. Consumes the acknowledger: a delivery is settled once.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::SettlementFailed`] if the transport rejects the settlement.
    fn settle(self: Box<Self>, settlement: Settlement) -> Result<(), EventBusError>;
}

/// One message handed to a consumer, together with its settlement handle.
pub struct Delivery {
    event: SerializedEvent,
    acker: Box<dyn Acknowledger>,
}

impl Delivery {
    /// Pair an event with the handle that settles it.
    #[must_use]
    pub fn new(event: SerializedEvent, acker: Box<dyn Acknowledger>) -> Self {
        Self { event, acker }
    }

    /// The delivered event.
    #[must_use]
    pub const fn event(&self) -> &SerializedEvent {
        &self.event
    }

    /// Acknowledge successful processing.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::SettlementFailed`] if the transport rejects the ack.
    pub fn ack(self) -> Result<(), EventBusError> {
        self.acker.settle(Settlement::Ack)
    }

    /// Negatively acknowledge, optionally asking for redelivery.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::SettlementFailed`] if the transport rejects the nack.
    pub fn nack(self, requeue: bool) -> Result<(), EventBusError> {
        self.acker.settle(Settlement::Nack { requeue })
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("event", &self.event)
            .finish_non_exhaustive()
    }
}

/// Stream of deliveries from a subscription.
pub type DeliveryStream = Pin<Box<dyn Stream<Item = Result<Delivery, EventBusError>> + Send>>;

/// Trait for event bus implementations.
///
/// # Dyn Compatibility
///
/// This trait uses explicit `Pin<Box<dyn Future>>` returns instead of `async fn`
/// so that it can be used as `Arc<dyn EventBus>` inside effects.
pub trait EventBus: Send + Sync {
    /// Publish an event to a topic.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::PublishFailed`] if the publish operation fails.
    fn publish(
        &self,
        topic: &str,
        event: &SerializedEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + '_>>;

    /// Subscribe to one or more topics.
    ///
    /// Implementations bind the subscription to a durable consumer group so
    /// that unsettled messages survive a restart.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::SubscriptionFailed`] if subscription fails.
    fn subscribe(
        &self,
        topics: &[&str],
    ) -> Pin<Box<dyn Future<Output = Result<DeliveryStream, EventBusError>> + Send + '_>>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    struct Recorder(Arc<Mutex<Vec<Settlement>>>);

    impl Acknowledger for Recorder {
        fn settle(self: Box<Self>, settlement: Settlement) -> Result<(), EventBusError> {
            self.0.lock().unwrap().push(settlement);
            Ok(())
        }
    }

    #[test]
    fn delivery_settles_through_its_acknowledger() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let event = SerializedEvent::new("USER_CREATED".to_string(), vec![], None);

        Delivery::new(event.clone(), Box::new(Recorder(Arc::clone(&log))))
            .ack()
            .unwrap();
        Delivery::new(event, Box::new(Recorder(Arc::clone(&log))))
            .nack(true)
            .unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec![Settlement::Ack, Settlement::Nack { requeue: true }]
        );
    }
}
