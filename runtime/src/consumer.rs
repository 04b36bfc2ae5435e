//! Event bus consumer with automatic reconnection and explicit settlement.
//!
//! A service implements [`EventHandler`] and lets [`EventConsumer`] own the
//! subscribe-process-reconnect loop:
//!
//! ```text
//! loop {
//!     subscribe (retry after `retry_delay` on failure)
//!     for each delivery:
//!         settlement = handler.handle(event)
//!         ack / nack(requeue) / nack(drop)
//!     stream ended → wait and resubscribe
//! }
//! ```
//!
//! Handlers decide the settlement; the consumer never acks on their behalf.
//!
//! # Example
//!
//! ```rust,ignore
//! use dentalbook_runtime::consumer::EventConsumer;
//!
//! let handle = EventConsumer::new(
//!     "profile-reconciler",
//!     vec!["user.events".to_string(), "auth.events".to_string()],
//!     event_bus,
//!     Arc::new(reconciler),
//!     shutdown_rx,
//! )
//! .spawn();
//! ```

use crate::metrics::EventBusMetrics;
use async_trait::async_trait;
use dentalbook_core::event::SerializedEvent;
use dentalbook_core::event_bus::{DeliveryStream, EventBus, Settlement};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

/// Processes one delivered event and says how to settle it.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handle `event`.
    ///
    /// Return [`Settlement::Ack`] once the effect of the event is durable,
    /// `Nack { requeue: true }` for transient failures and
    /// `Nack { requeue: false }` for messages that can never succeed.
    async fn handle(&self, event: &SerializedEvent) -> Settlement;
}

/// Generic event bus consumer.
///
/// Runs until the shutdown signal fires. Subscription failures and ended
/// streams are retried after `retry_delay` (default 5 seconds).
pub struct EventConsumer {
    name: String,
    topics: Vec<String>,
    event_bus: Arc<dyn EventBus>,
    handler: Arc<dyn EventHandler>,
    shutdown: broadcast::Receiver<()>,
    retry_delay: Duration,
}

impl EventConsumer {
    /// Create a consumer with the default retry delay.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        topics: Vec<String>,
        event_bus: Arc<dyn EventBus>,
        handler: Arc<dyn EventHandler>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            name: name.into(),
            topics,
            event_bus,
            handler,
            shutdown,
            retry_delay: Duration::from_secs(5),
        }
    }

    /// Set custom retry delay.
    #[must_use]
    pub const fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Spawn the consumer as a background task.
    #[must_use]
    pub fn spawn(mut self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(&mut self) {
        info!(consumer = %self.name, topics = ?self.topics, "Event consumer started");

        loop {
            let topics: Vec<&str> = self.topics.iter().map(String::as_str).collect();

            tokio::select! {
                _ = self.shutdown.recv() => {
                    info!(consumer = %self.name, "Event consumer received shutdown signal");
                    break;
                }
                subscribe_result = self.event_bus.subscribe(&topics) => {
                    match subscribe_result {
                        Ok(stream) => {
                            info!(consumer = %self.name, "Subscribed to event bus");
                            if self.process_stream(stream).await {
                                break;
                            }
                            warn!(consumer = %self.name, retry_in = ?self.retry_delay, "Event stream ended, reconnecting");
                        }
                        Err(e) => {
                            error!(
                                consumer = %self.name,
                                error = %e,
                                retry_in = ?self.retry_delay,
                                "Failed to subscribe to event bus"
                            );
                        }
                    }
                }
            }

            tokio::select! {
                _ = self.shutdown.recv() => break,
                () = tokio::time::sleep(self.retry_delay) => {}
            }
        }

        info!(consumer = %self.name, "Event consumer stopped");
    }

    /// Returns `true` if processing stopped because of shutdown.
    async fn process_stream(&mut self, mut stream: DeliveryStream) -> bool {
        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    info!(consumer = %self.name, "Shutdown during processing");
                    return true;
                }
                next = stream.next() => {
                    match next {
                        Some(Ok(delivery)) => {
                            EventBusMetrics::record_consume();
                            let settlement = self.handler.handle(delivery.event()).await;
                            let event_type = delivery.event().event_type.clone();

                            let (outcome, result) = match settlement {
                                Settlement::Ack => ("ack", delivery.ack()),
                                Settlement::Nack { requeue: true } => ("requeue", delivery.nack(true)),
                                Settlement::Nack { requeue: false } => ("drop", delivery.nack(false)),
                            };
                            EventBusMetrics::record_settlement(outcome);

                            if let Err(e) = result {
                                error!(
                                    consumer = %self.name,
                                    event_type = %event_type,
                                    error = %e,
                                    "Failed to settle delivery"
                                );
                            }
                        }
                        Some(Err(e)) => {
                            EventBusMetrics::record_consume_error();
                            error!(consumer = %self.name, error = %e, "Error receiving event from stream");
                        }
                        None => return false,
                    }
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use dentalbook_testing::mocks::InMemoryEventBus;
    use std::sync::Mutex;

    struct Scripted {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl EventHandler for Scripted {
        async fn handle(&self, event: &SerializedEvent) -> Settlement {
            self.seen.lock().unwrap().push(event.event_type.clone());
            match event.event_type.as_str() {
                "GOOD" => Settlement::Ack,
                "POISON" => Settlement::Nack { requeue: false },
                _ => Settlement::Nack { requeue: true },
            }
        }
    }

    fn event(kind: &str) -> SerializedEvent {
        SerializedEvent::new(kind.to_string(), b"{}".to_vec(), None)
    }

    #[tokio::test]
    async fn settles_each_delivery_as_the_handler_decides() {
        let bus = Arc::new(InMemoryEventBus::new());
        let handler = Arc::new(Scripted {
            seen: Mutex::new(Vec::new()),
        });
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let handle = EventConsumer::new(
            "test",
            vec!["user.events".to_string()],
            Arc::clone(&bus) as Arc<dyn EventBus>,
            Arc::clone(&handler) as Arc<dyn EventHandler>,
            shutdown_rx,
        )
        .with_retry_delay(Duration::from_millis(10))
        .spawn();

        // Give the consumer time to subscribe before publishing.
        tokio::time::sleep(Duration::from_millis(50)).await;
        bus.publish("user.events", &event("GOOD")).await.unwrap();
        bus.publish("user.events", &event("POISON")).await.unwrap();

        for _ in 0..50 {
            if bus.settlements().len() >= 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();

        let settlements: Vec<Settlement> =
            bus.settlements().into_iter().map(|r| r.settlement).collect();
        assert_eq!(
            settlements,
            vec![Settlement::Ack, Settlement::Nack { requeue: false }]
        );
        assert_eq!(*handler.seen.lock().unwrap(), vec!["GOOD", "POISON"]);
    }

    #[tokio::test]
    async fn stops_on_shutdown_before_any_event() {
        let bus: Arc<dyn EventBus> = Arc::new(InMemoryEventBus::new());
        let handler: Arc<dyn EventHandler> = Arc::new(Scripted {
            seen: Mutex::new(Vec::new()),
        });
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let handle = EventConsumer::new("idle", vec!["cita.events".to_string()], bus, handler, shutdown_rx)
            .spawn();
        tokio::time::sleep(Duration::from_millis(20)).await;
        shutdown_tx.send(()).unwrap();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("consumer stops promptly")
            .unwrap();
    }
}
