//! Events the profile service consumes and publishes.
//!
//! Consumed from `user.events` and `auth.events`:
//!
//! | `eventType` | payload |
//! |---|---|
//! | `USER_CREATED` | [`UserRecord`] |
//! | `USER_UPDATED` | [`ReplicatedChanges`] |
//! | `USER_DELETED` | [`UserDeleted`] |
//! | `USER_LOGIN` | [`UserLogin`] |
//!
//! Published on `user.events`: [`ProfileEvent`].

use crate::types::{Profile, ReplicatedChanges, UserRecord};
use chrono::{DateTime, Utc};
use dentalbook_core::event::{Event, EventEnvelope, EventError, SerializedEvent};
use serde::{Deserialize, Serialize};

/// Topic for user lifecycle events
pub const USER_TOPIC: &str = "user.events";

/// Payload of `USER_DELETED`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDeleted {
    /// The deactivated user
    #[serde(alias = "id")]
    pub user_id: i64,
}

/// Payload of `USER_LOGIN`
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserLogin {
    /// Who logged in
    pub user_id: i64,
    /// When; falls back to the envelope timestamp
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// A replication event the reconciler acts on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Incoming {
    /// `USER_CREATED`
    Created(UserRecord),
    /// `USER_UPDATED`
    Updated(ReplicatedChanges),
    /// `USER_DELETED`
    Deleted(UserDeleted),
    /// `USER_LOGIN`
    Login {
        /// Who
        user_id: i64,
        /// When
        at: DateTime<Utc>,
    },
}

impl Incoming {
    /// Decode a bus message. `Ok(None)` for event types this service ignores.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::DeserializationError`] if the envelope or the
    /// payload of a handled type is malformed.
    pub fn decode(event: &SerializedEvent) -> Result<Option<Self>, EventError> {
        let envelope = EventEnvelope::from_serialized(event)?;
        let incoming = match envelope.event_type.as_str() {
            "USER_CREATED" => Self::Created(envelope.data_as()?),
            "USER_UPDATED" => Self::Updated(envelope.data_as()?),
            "USER_DELETED" => Self::Deleted(envelope.data_as()?),
            "USER_LOGIN" => {
                let login: UserLogin = envelope.data_as()?;
                Self::Login {
                    user_id: login.user_id,
                    at: login.timestamp.unwrap_or(envelope.timestamp),
                }
            },
            _ => return Ok(None),
        };
        Ok(Some(incoming))
    }

    /// Event type name, for logs and metrics
    #[must_use]
    pub const fn event_type(&self) -> &'static str {
        match self {
            Self::Created(_) => "USER_CREATED",
            Self::Updated(_) => "USER_UPDATED",
            Self::Deleted(_) => "USER_DELETED",
            Self::Login { .. } => "USER_LOGIN",
        }
    }

    /// The user the event is about
    #[must_use]
    pub const fn user_id(&self) -> i64 {
        match self {
            Self::Created(record) => record.id,
            Self::Updated(changes) => changes.id,
            Self::Deleted(deleted) => deleted.user_id,
            Self::Login { user_id, .. } => *user_id,
        }
    }
}

/// Events published by the profile service.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ProfileEvent {
    /// `USER_UPDATED`: full profile after an edit or an active toggle
    Updated(Box<Profile>),
    /// `USER_DELETED`: soft delete
    Deleted(UserDeleted),
    /// `PROFILE_UPDATED`: a client completed their profile
    ProfileCompleted(Box<Profile>),
}

impl Event for ProfileEvent {
    fn event_type(&self) -> &'static str {
        match self {
            Self::Updated(_) => "USER_UPDATED",
            Self::Deleted(_) => "USER_DELETED",
            Self::ProfileCompleted(_) => "PROFILE_UPDATED",
        }
    }

    fn routing_key(&self) -> &'static str {
        match self {
            Self::Updated(_) => "user.updated",
            Self::Deleted(_) => "user.deleted",
            Self::ProfileCompleted(_) => "user.profile.updated",
        }
    }
}
