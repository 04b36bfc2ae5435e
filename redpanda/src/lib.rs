//! Redpanda event bus for the dentalbook services.
//!
//! Implements the [`EventBus`] trait from `dentalbook-core` with rdkafka,
//! so any Kafka-compatible broker works (Redpanda, Apache Kafka, MSK).
//!
//! # Wire Format
//!
//! - **Payload**: the JSON envelope `{eventType, timestamp, data}` as produced
//!   by `dentalbook_core::event`
//! - **Key**: the routing key (`user.created`, `cita.cancelled`, ...), falling
//!   back to the event type; messages with the same key share a partition
//!
//! # Delivery Semantics
//!
//! **At-least-once delivery** with manual offset commits. Each subscription
//! owns one consumer task that hands out one [`Delivery`] at a time and waits
//! for it to be settled:
//!
//! - `ack` / `nack(false)`: the offset is committed and the next message follows
//! - `nack(true)`: the consumer seeks back to the message, waits
//!   `redelivery_delay` and delivers it again
//! - dropped without settlement: treated like `nack(true)`
//!
//! Subscribers MUST be idempotent; a crash between processing and commit
//! redelivers the message.
//!
//! # Example
//!
//! ```no_run
//! use dentalbook_redpanda::RedpandaEventBus;
//! use dentalbook_core::event_bus::EventBus;
//! use futures::StreamExt;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let event_bus = RedpandaEventBus::builder()
//!     .brokers("localhost:9092")
//!     .consumer_group("profile-service")
//!     .build()?;
//!
//! let mut stream = event_bus.subscribe(&["user.events"]).await?;
//! while let Some(result) = stream.next().await {
//!     let delivery = result?;
//!     println!("Received: {}", delivery.event().event_type);
//!     delivery.ack()?;
//! }
//! # Ok(())
//! # }
//! ```

use dentalbook_core::event::{ROUTING_KEY, SerializedEvent};
use dentalbook_core::event_bus::{
    Acknowledger, Delivery, DeliveryStream, EventBus, EventBusError, Settlement,
};
use rdkafka::Offset;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Message};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// Event type reported for payloads that are not a readable envelope.
pub const UNKNOWN_EVENT_TYPE: &str = "UNKNOWN";

/// Redpanda event bus implementation.
///
/// # Configuration
///
/// - **Broker addresses**: Bootstrap servers (required)
/// - **Producer settings**: Acks, compression, timeout
/// - **Consumer group**: Explicit ID or derived from the topics
/// - **Buffer size**: Deliveries buffered ahead of the subscriber (default: 1)
/// - **Offset reset**: Where new groups start reading (default: "earliest")
/// - **Redelivery delay**: Pause before a requeued message comes back (default: 1s)
pub struct RedpandaEventBus {
    producer: FutureProducer,
    brokers: String,
    timeout: Duration,
    consumer_group: Option<String>,
    buffer_size: usize,
    auto_offset_reset: String,
    redelivery_delay: Duration,
}

impl RedpandaEventBus {
    /// Create a new Redpanda event bus with default configuration.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::ConnectionFailed`] if the producer cannot be created.
    pub fn new(brokers: &str) -> Result<Self, EventBusError> {
        Self::builder().brokers(brokers).build()
    }

    /// Create a new builder for configuring the event bus.
    #[must_use]
    pub fn builder() -> RedpandaEventBusBuilder {
        RedpandaEventBusBuilder::default()
    }

    /// Broker addresses this bus talks to.
    #[must_use]
    pub fn brokers(&self) -> &str {
        &self.brokers
    }
}

impl std::fmt::Debug for RedpandaEventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedpandaEventBus")
            .field("brokers", &self.brokers)
            .field("consumer_group", &self.consumer_group)
            .finish_non_exhaustive()
    }
}

/// Builder for configuring a [`RedpandaEventBus`].
///
/// # Example
///
/// ```no_run
/// use dentalbook_redpanda::RedpandaEventBus;
/// use std::time::Duration;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let event_bus = RedpandaEventBus::builder()
///     .brokers("localhost:9092,localhost:9093")
///     .producer_acks("all")
///     .timeout(Duration::from_secs(10))
///     .redelivery_delay(Duration::from_millis(500))
///     .build()?;
/// # Ok(())
/// # }
/// ```
#[derive(Default, Debug)]
pub struct RedpandaEventBusBuilder {
    brokers: Option<String>,
    producer_acks: Option<String>,
    compression: Option<String>,
    timeout: Option<Duration>,
    consumer_group: Option<String>,
    buffer_size: Option<usize>,
    auto_offset_reset: Option<String>,
    redelivery_delay: Option<Duration>,
}

impl RedpandaEventBusBuilder {
    /// Set the broker addresses (comma-separated).
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Set the producer acknowledgment mode: "0", "1" or "all". Default: "all"
    #[must_use]
    pub fn producer_acks(mut self, acks: impl Into<String>) -> Self {
        self.producer_acks = Some(acks.into());
        self
    }

    /// Set the compression codec. Default: "none"
    #[must_use]
    pub fn compression(mut self, compression: impl Into<String>) -> Self {
        self.compression = Some(compression.into());
        self
    }

    /// Set the producer send timeout. Default: 5 seconds
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the consumer group ID for subscriptions.
    ///
    /// Instances sharing a group share the partitions. Without one, the group
    /// is derived from the subscribed topics.
    #[must_use]
    pub fn consumer_group(mut self, consumer_group: impl Into<String>) -> Self {
        self.consumer_group = Some(consumer_group.into());
        self
    }

    /// Set how many deliveries may wait in the subscriber's buffer (minimum 1).
    #[must_use]
    pub fn buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = Some(buffer_size.max(1));
        self
    }

    /// Set the auto offset reset policy for new consumer groups.
    #[must_use]
    pub fn auto_offset_reset(mut self, policy: impl Into<String>) -> Self {
        self.auto_offset_reset = Some(policy.into());
        self
    }

    /// Set the pause before a requeued message is delivered again.
    #[must_use]
    pub const fn redelivery_delay(mut self, delay: Duration) -> Self {
        self.redelivery_delay = Some(delay);
        self
    }

    /// Build the [`RedpandaEventBus`].
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::ConnectionFailed`] if brokers are not set or
    /// the producer cannot be created.
    pub fn build(self) -> Result<RedpandaEventBus, EventBusError> {
        let brokers = self
            .brokers
            .ok_or_else(|| EventBusError::ConnectionFailed("Brokers not configured".to_string()))?;
        let acks = self.producer_acks.as_deref().unwrap_or("all");
        let compression = self.compression.as_deref().unwrap_or("none");

        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &brokers)
            .set("message.timeout.ms", "5000")
            .set("acks", acks)
            .set("compression.type", compression)
            .create()
            .map_err(|e| {
                EventBusError::ConnectionFailed(format!("Failed to create producer: {e}"))
            })?;

        let bus = RedpandaEventBus {
            producer,
            brokers,
            timeout: self.timeout.unwrap_or(Duration::from_secs(5)),
            consumer_group: self.consumer_group,
            buffer_size: self.buffer_size.unwrap_or(1),
            auto_offset_reset: self
                .auto_offset_reset
                .unwrap_or_else(|| "earliest".to_string()),
            redelivery_delay: self.redelivery_delay.unwrap_or(Duration::from_secs(1)),
        };

        tracing::info!(
            brokers = %bus.brokers,
            acks,
            compression,
            consumer_group = ?bus.consumer_group,
            auto_offset_reset = %bus.auto_offset_reset,
            "RedpandaEventBus created"
        );

        Ok(bus)
    }
}

#[derive(serde::Deserialize)]
struct EnvelopeHead {
    #[serde(rename = "eventType")]
    event_type: String,
}

/// Rebuild a [`SerializedEvent`] from a consumed record.
///
/// The event type is read from the envelope; payloads that are not an
/// envelope are still delivered (as [`UNKNOWN_EVENT_TYPE`]) so the consumer
/// decides how to settle them.
#[must_use]
pub fn decode_record(
    payload: Option<&[u8]>,
    key: Option<&[u8]>,
    topic: &str,
    partition: i32,
    offset: i64,
) -> SerializedEvent {
    let data = payload.map(<[u8]>::to_vec).unwrap_or_default();
    let event_type = serde_json::from_slice::<EnvelopeHead>(&data)
        .map_or_else(|_| UNKNOWN_EVENT_TYPE.to_string(), |head| head.event_type);

    let mut metadata = serde_json::json!({
        "topic": topic,
        "partition": partition,
        "offset": offset,
    });
    if let Some(key) = key {
        metadata[ROUTING_KEY] = serde_json::Value::String(String::from_utf8_lossy(key).into_owned());
    }

    SerializedEvent::new(event_type, data, Some(metadata))
}

struct RedpandaAcker {
    settled: oneshot::Sender<Settlement>,
}

impl Acknowledger for RedpandaAcker {
    fn settle(self: Box<Self>, settlement: Settlement) -> Result<(), EventBusError> {
        self.settled.send(settlement).map_err(|_| {
            EventBusError::SettlementFailed("consumer task is no longer running".to_string())
        })
    }
}

impl EventBus for RedpandaEventBus {
    fn publish(
        &self,
        topic: &str,
        event: &SerializedEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + '_>> {
        let topic = topic.to_string();
        let event = event.clone();
        let timeout = self.timeout;

        Box::pin(async move {
            let key = event
                .routing_key()
                .unwrap_or(event.event_type.as_str())
                .to_string();
            let record = FutureRecord::to(&topic).payload(&event.data).key(&key);

            match self.producer.send(record, Timeout::After(timeout)).await {
                Ok((partition, offset)) => {
                    tracing::debug!(
                        topic = %topic,
                        partition,
                        offset,
                        key = %key,
                        event_type = %event.event_type,
                        "Event published"
                    );
                    Ok(())
                },
                Err((kafka_error, _)) => {
                    tracing::error!(topic = %topic, error = %kafka_error, "Failed to publish event");
                    Err(EventBusError::PublishFailed {
                        topic,
                        reason: kafka_error.to_string(),
                    })
                },
            }
        })
    }

    fn subscribe(
        &self,
        topics: &[&str],
    ) -> Pin<Box<dyn Future<Output = Result<DeliveryStream, EventBusError>> + Send + '_>> {
        let topics: Vec<String> = topics.iter().map(|s| (*s).to_string()).collect();
        let brokers = self.brokers.clone();
        let consumer_group = self.consumer_group.clone();
        let buffer_size = self.buffer_size;
        let auto_offset_reset = self.auto_offset_reset.clone();
        let redelivery_delay = self.redelivery_delay;

        Box::pin(async move {
            let consumer_group_id = consumer_group.unwrap_or_else(|| {
                let mut sorted_topics = topics.clone();
                sorted_topics.sort();
                format!("dentalbook-{}", sorted_topics.join("-"))
            });

            let consumer: StreamConsumer = ClientConfig::new()
                .set("bootstrap.servers", &brokers)
                .set("group.id", &consumer_group_id)
                .set("enable.auto.commit", "false")
                .set("auto.offset.reset", &auto_offset_reset)
                .set("session.timeout.ms", "6000")
                .set("enable.partition.eof", "false")
                .create()
                .map_err(|e| EventBusError::SubscriptionFailed {
                    topics: topics.clone(),
                    reason: format!("Failed to create consumer: {e}"),
                })?;

            let topic_refs: Vec<&str> = topics.iter().map(String::as_str).collect();
            consumer
                .subscribe(&topic_refs)
                .map_err(|e| EventBusError::SubscriptionFailed {
                    topics: topics.clone(),
                    reason: format!("Failed to subscribe to topics: {e}"),
                })?;

            tracing::info!(
                topics = ?topics,
                consumer_group = %consumer_group_id,
                auto_offset_reset = %auto_offset_reset,
                "Subscribed to topics"
            );

            let (tx, rx) = mpsc::channel(buffer_size);
            tokio::spawn(forward(consumer, tx, redelivery_delay));

            let stream = async_stream::stream! {
                let mut rx = rx;
                while let Some(result) = rx.recv().await {
                    yield result;
                }
            };

            Ok(Box::pin(stream) as DeliveryStream)
        })
    }
}

// Owns the consumer: hands out one delivery at a time and applies its settlement.
async fn forward(
    consumer: StreamConsumer,
    tx: mpsc::Sender<Result<Delivery, EventBusError>>,
    redelivery_delay: Duration,
) {
    use futures::StreamExt;

    let mut stream = consumer.stream();

    while let Some(msg_result) = stream.next().await {
        let message = match msg_result {
            Ok(message) => message,
            Err(e) => {
                let err = EventBusError::TransportError(format!("Failed to receive message: {e}"));
                if tx.send(Err(err)).await.is_err() {
                    break;
                }
                continue;
            },
        };

        let event = decode_record(
            message.payload(),
            message.key(),
            message.topic(),
            message.partition(),
            message.offset(),
        );
        tracing::trace!(
            topic = message.topic(),
            partition = message.partition(),
            offset = message.offset(),
            event_type = %event.event_type,
            "Received event"
        );

        let (settled_tx, settled_rx) = oneshot::channel();
        let delivery = Delivery::new(event, Box::new(RedpandaAcker { settled: settled_tx }));
        if tx.send(Ok(delivery)).await.is_err() {
            tracing::debug!("Subscriber dropped, exiting consumer task");
            break;
        }

        // An unsettled drop closes the channel; redeliver in that case.
        let settlement = settled_rx
            .await
            .unwrap_or(Settlement::Nack { requeue: true });

        match settlement {
            Settlement::Ack | Settlement::Nack { requeue: false } => commit(&consumer, &message),
            Settlement::Nack { requeue: true } => {
                rewind(&consumer, &message);
                tokio::time::sleep(redelivery_delay).await;
            },
        }
    }

    tracing::debug!("Consumer task exiting");
}

fn commit(consumer: &StreamConsumer, message: &BorrowedMessage<'_>) {
    if let Err(e) = consumer.commit_message(message, CommitMode::Async) {
        tracing::warn!(
            topic = message.topic(),
            partition = message.partition(),
            offset = message.offset(),
            error = %e,
            "Failed to commit offset (message may be redelivered)"
        );
    }
}

fn rewind(consumer: &StreamConsumer, message: &BorrowedMessage<'_>) {
    let result = consumer.seek(
        message.topic(),
        message.partition(),
        Offset::Offset(message.offset()),
        Duration::from_secs(5),
    );
    match result {
        Ok(()) => tracing::debug!(
            topic = message.topic(),
            partition = message.partition(),
            offset = message.offset(),
            "Message requeued"
        ),
        Err(e) => tracing::warn!(
            topic = message.topic(),
            partition = message.partition(),
            offset = message.offset(),
            error = %e,
            "Failed to seek back; message will return after the next rebalance"
        ),
    }
}
