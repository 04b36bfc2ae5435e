//! Domain events and their wire format.
//!
//! Every event that crosses a service boundary travels as a JSON envelope:
//!
//! ```json
//! { "eventType": "USER_CREATED", "timestamp": "2025-06-01T09:00:00Z", "data": { ... } }
//! ```
//!
//! The envelope bytes are carried in [`SerializedEvent::data`]. The routing key
//! (`user.created`, `cita.reminder`, ...) travels in the metadata so that bus
//! implementations can use it for partitioning and consumers can filter on it.
//!
//! # Example
//!
//! ```
//! use dentalbook_core::event::{Event, EventEnvelope};
//! use serde::Serialize;
//!
//! #[derive(Serialize)]
//! struct Deleted {
//!     #[serde(rename = "userId")]
//!     user_id: i64,
//! }
//!
//! impl Event for Deleted {
//!     fn event_type(&self) -> &'static str {
//!         "USER_DELETED"
//!     }
//!     fn routing_key(&self) -> &'static str {
//!         "user.deleted"
//!     }
//! }
//!
//! let now = chrono::Utc::now();
//! let serialized = Deleted { user_id: 7 }.to_serialized(now).unwrap();
//! let envelope = EventEnvelope::from_serialized(&serialized).unwrap();
//! assert_eq!(envelope.event_type, "USER_DELETED");
//! assert_eq!(serialized.routing_key(), Some("user.deleted"));
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::fmt;
use thiserror::Error;

/// Metadata key holding the routing key of an event.
pub const ROUTING_KEY: &str = "routing_key";

/// Errors that can occur when encoding or decoding events.
#[derive(Error, Debug)]
pub enum EventError {
    /// Serialization to the envelope failed
    #[error("Failed to serialize event: {0}")]
    SerializationError(String),

    /// Deserialization from the envelope failed
    #[error("Failed to deserialize event: {0}")]
    DeserializationError(String),

    /// Event type not recognised by the consumer
    #[error("Unknown event type: {0}")]
    UnknownEventType(String),
}

/// A domain event that can be published on the bus.
///
/// Implementors serialize to the *payload* object (the envelope's `data`),
/// which for enums usually means `#[serde(untagged)]`.
pub trait Event: Serialize + Send + Sync {
    /// Wire name of the event (`USER_CREATED`, `CITA_REMINDER`, ...)
    fn event_type(&self) -> &'static str;

    /// Routing key used for partitioning and consumer-side filtering
    fn routing_key(&self) -> &'static str;

    /// Wrap the event in its envelope.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::SerializationError`] if the payload cannot be
    /// represented as JSON.
    fn to_envelope(&self, timestamp: DateTime<Utc>) -> Result<EventEnvelope, EventError> {
        let data = serde_json::to_value(self)
            .map_err(|e| EventError::SerializationError(e.to_string()))?;
        Ok(EventEnvelope {
            event_type: self.event_type().to_string(),
            timestamp,
            data,
        })
    }

    /// Encode the event for the bus.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::SerializationError`] if encoding fails.
    fn to_serialized(&self, timestamp: DateTime<Utc>) -> Result<SerializedEvent, EventError> {
        self.to_envelope(timestamp)?.to_serialized(self.routing_key())
    }
}

/// The JSON envelope shared by all services.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Event type name
    #[serde(rename = "eventType")]
    pub event_type: String,
    /// When the event was produced
    pub timestamp: DateTime<Utc>,
    /// Event payload
    pub data: serde_json::Value,
}

impl EventEnvelope {
    /// Encode the envelope, attaching the routing key as metadata.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::SerializationError`] if the envelope cannot be encoded.
    pub fn to_serialized(&self, routing_key: &str) -> Result<SerializedEvent, EventError> {
        let data =
            serde_json::to_vec(self).map_err(|e| EventError::SerializationError(e.to_string()))?;
        Ok(SerializedEvent::new(
            self.event_type.clone(),
            data,
            Some(serde_json::json!({ ROUTING_KEY: routing_key })),
        ))
    }

    /// Decode an envelope from a bus message.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::DeserializationError`] if the bytes are not a valid envelope.
    pub fn from_serialized(event: &SerializedEvent) -> Result<Self, EventError> {
        serde_json::from_slice(&event.data)
            .map_err(|e| EventError::DeserializationError(e.to_string()))
    }

    /// Decode the payload into a typed value.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::DeserializationError`] if the payload does not match `T`.
    pub fn data_as<T: DeserializeOwned>(&self) -> Result<T, EventError> {
        serde_json::from_value(self.data.clone())
            .map_err(|e| EventError::DeserializationError(e.to_string()))
    }
}

/// An event as it travels through the bus.
#[derive(Clone, Debug, PartialEq)]
pub struct SerializedEvent {
    /// Event type name (mirrors the envelope's `eventType`)
    pub event_type: String,

    /// Envelope bytes (JSON)
    pub data: Vec<u8>,

    /// Transport metadata (routing key, partition, offset)
    pub metadata: Option<serde_json::Value>,
}

impl SerializedEvent {
    /// Create a new serialized event.
    #[must_use]
    pub const fn new(
        event_type: String,
        data: Vec<u8>,
        metadata: Option<serde_json::Value>,
    ) -> Self {
        Self {
            event_type,
            data,
            metadata,
        }
    }

    /// Routing key carried in the metadata, if any.
    #[must_use]
    pub fn routing_key(&self) -> Option<&str> {
        self.metadata
            .as_ref()
            .and_then(|m| m.get(ROUTING_KEY))
            .and_then(serde_json::Value::as_str)
    }
}

impl fmt::Display for SerializedEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SerializedEvent {{ type: {}, size: {} bytes }}",
            self.event_type,
            self.data.len()
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[derive(Serialize)]
    #[serde(untagged)]
    enum TestEvent {
        Created {
            id: i64,
            email: String,
        },
    }

    impl Event for TestEvent {
        fn event_type(&self) -> &'static str {
            "USER_CREATED"
        }

        fn routing_key(&self) -> &'static str {
            "user.created"
        }
    }

    #[test]
    fn envelope_uses_camel_case_event_type_and_untagged_payload() {
        let at = Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 0).unwrap();
        let event = TestEvent::Created {
            id: 42,
            email: "ana@example.com".to_string(),
        };

        let serialized = event.to_serialized(at).expect("serialize");
        let raw: serde_json::Value = serde_json::from_slice(&serialized.data).unwrap();

        assert_eq!(raw["eventType"], "USER_CREATED");
        assert_eq!(raw["data"]["id"], 42);
        assert_eq!(raw["data"]["email"], "ana@example.com");
        assert_eq!(raw["timestamp"], "2025-06-01T09:00:00Z");
        assert_eq!(serialized.routing_key(), Some("user.created"));
    }

    #[test]
    fn malformed_bytes_are_a_deserialization_error() {
        let event = SerializedEvent::new("USER_CREATED".to_string(), b"not json".to_vec(), None);
        let err = EventEnvelope::from_serialized(&event).unwrap_err();
        assert!(matches!(err, EventError::DeserializationError(_)));
        assert_eq!(event.routing_key(), None);
    }

    #[test]
    fn serialized_event_display() {
        let serialized = SerializedEvent::new("CITA_CREATED".to_string(), vec![1, 2, 3], None);
        let display = format!("{serialized}");
        assert!(display.contains("CITA_CREATED"));
        assert!(display.contains("3 bytes"));
    }
}
