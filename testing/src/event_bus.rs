//! In-memory event bus for tests.
//!
//! Publishes are recorded per topic and fanned out to live subscriptions.
//! Every settlement is logged so tests can assert ack/nack behaviour;
//! `nack(requeue = true)` puts the message back on the same subscription.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)]

use dentalbook_core::event::SerializedEvent;
use dentalbook_core::event_bus::{
    Acknowledger, Delivery, DeliveryStream, EventBus, EventBusError, Settlement,
};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::mpsc;

type Subscriber = (Vec<String>, mpsc::UnboundedSender<Result<Delivery, EventBusError>>);

/// One settlement as seen by the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementRecord {
    /// Topic the delivery came from
    pub topic: String,
    /// Event type of the settled message
    pub event_type: String,
    /// How it was settled
    pub settlement: Settlement,
}

/// In-memory [`EventBus`] implementation.
///
/// # Example
///
/// ```
/// use dentalbook_testing::mocks::InMemoryEventBus;
/// use dentalbook_core::event_bus::EventBus;
/// use dentalbook_core::event::SerializedEvent;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let bus = InMemoryEventBus::new();
/// let event = SerializedEvent::new("USER_DELETED".into(), b"{}".to_vec(), None);
/// bus.publish("user.events", &event).await?;
/// assert_eq!(bus.published("user.events").len(), 1);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Default)]
pub struct InMemoryEventBus {
    published: Arc<RwLock<HashMap<String, Vec<SerializedEvent>>>>,
    subscribers: Arc<Mutex<Vec<Subscriber>>>,
    settlements: Arc<Mutex<Vec<SettlementRecord>>>,
    fail_publishes: Arc<AtomicBool>,
}

impl std::fmt::Debug for InMemoryEventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryEventBus")
            .field("topics", &self.published.read().unwrap().keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl InMemoryEventBus {
    /// Create an empty bus
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent publish fail (or succeed again)
    pub fn fail_publishes(&self, fail: bool) {
        self.fail_publishes.store(fail, Ordering::SeqCst);
    }

    /// Events published on `topic`, in publish order
    #[must_use]
    pub fn published(&self, topic: &str) -> Vec<SerializedEvent> {
        self.published
            .read()
            .unwrap()
            .get(topic)
            .cloned()
            .unwrap_or_default()
    }

    /// Event types published on `topic`, in publish order
    #[must_use]
    pub fn published_types(&self, topic: &str) -> Vec<String> {
        self.published(topic)
            .into_iter()
            .map(|e| e.event_type)
            .collect()
    }

    /// All settlements made by consumers so far
    #[must_use]
    pub fn settlements(&self) -> Vec<SettlementRecord> {
        self.settlements.lock().unwrap().clone()
    }

    /// Forget everything recorded so far (subscriptions stay open)
    pub fn clear(&self) {
        self.published.write().unwrap().clear();
        self.settlements.lock().unwrap().clear();
    }

    fn deliver(&self, topic: &str, event: &SerializedEvent) {
        let mut subscribers = self.subscribers.lock().unwrap();
        subscribers.retain(|(_, tx)| !tx.is_closed());
        for (topics, tx) in subscribers.iter() {
            if topics.iter().any(|t| t == topic) {
                let acker = InMemoryAcker {
                    topic: topic.to_string(),
                    event: event.clone(),
                    redeliver: tx.clone(),
                    log: Arc::clone(&self.settlements),
                };
                let _ = tx.send(Ok(Delivery::new(event.clone(), Box::new(acker))));
            }
        }
    }
}

impl EventBus for InMemoryEventBus {
    fn publish(
        &self,
        topic: &str,
        event: &SerializedEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + '_>> {
        let topic = topic.to_string();
        let event = event.clone();
        Box::pin(async move {
            if self.fail_publishes.load(Ordering::SeqCst) {
                return Err(EventBusError::PublishFailed {
                    topic,
                    reason: "publishing disabled by test".to_string(),
                });
            }

            self.published
                .write()
                .unwrap()
                .entry(topic.clone())
                .or_default()
                .push(event.clone());
            self.deliver(&topic, &event);
            Ok(())
        })
    }

    fn subscribe(
        &self,
        topics: &[&str],
    ) -> Pin<Box<dyn Future<Output = Result<DeliveryStream, EventBusError>> + Send + '_>> {
        let topics: Vec<String> = topics.iter().map(|t| (*t).to_string()).collect();
        Box::pin(async move {
            let (tx, mut rx) = mpsc::unbounded_channel();
            self.subscribers.lock().unwrap().push((topics, tx));

            let stream: DeliveryStream =
                Box::pin(futures::stream::poll_fn(move |cx| rx.poll_recv(cx)));
            Ok(stream)
        })
    }
}

struct InMemoryAcker {
    topic: String,
    event: SerializedEvent,
    redeliver: mpsc::UnboundedSender<Result<Delivery, EventBusError>>,
    log: Arc<Mutex<Vec<SettlementRecord>>>,
}

impl Acknowledger for InMemoryAcker {
    fn settle(self: Box<Self>, settlement: Settlement) -> Result<(), EventBusError> {
        self.log.lock().unwrap().push(SettlementRecord {
            topic: self.topic.clone(),
            event_type: self.event.event_type.clone(),
            settlement,
        });

        if settlement == (Settlement::Nack { requeue: true }) {
            let event = self.event.clone();
            let redeliver = self.redeliver.clone();
            redeliver
                .send(Ok(Delivery::new(event, self)))
                .map_err(|_| EventBusError::SettlementFailed("subscription closed".to_string()))?;
        }
        Ok(())
    }
}
