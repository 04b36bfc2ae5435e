//! Events published by the identity service.
//!
//! | `eventType` | topic | routing key | payload |
//! |---|---|---|---|
//! | `USER_CREATED` | `user.events` | `user.created` | [`UserCreated`] |
//! | `USER_UPDATED` | `user.events` | `user.updated` | [`StatusChanged`] |
//! | `USER_DELETED` | `user.events` | `user.deleted` | [`UserDeleted`] |
//! | `USER_LOGIN` | `auth.events` | `auth.login` | [`UserLogin`] |

use crate::types::Account;
use chrono::{DateTime, Utc};
use dentalbook_auth::Role;
use dentalbook_core::event::Event;
use serde::Serialize;

/// Topic for user lifecycle events
pub const USER_TOPIC: &str = "user.events";
/// Topic for authentication events
pub const AUTH_TOPIC: &str = "auth.events";

/// Payload of `USER_CREATED`
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserCreated {
    /// Global user id
    pub id: i64,
    /// Given name
    pub name: String,
    /// Family name
    pub surname: String,
    /// Email
    pub email: String,
    /// Role
    pub role: Role,
    /// Profile-complete flag
    pub profile_complete: bool,
    /// Active flag
    pub active: bool,
}

impl From<&Account> for UserCreated {
    fn from(account: &Account) -> Self {
        Self {
            id: account.id,
            name: account.name.clone(),
            surname: account.surname.clone(),
            email: account.email.clone(),
            role: account.role,
            profile_complete: account.profile_complete,
            active: account.active,
        }
    }
}

/// Payload of `USER_UPDATED` when an account is reactivated
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusChanged {
    /// Global user id
    pub id: i64,
    /// New active flag
    pub active: bool,
    /// When it changed
    pub updated_at: DateTime<Utc>,
}

/// Payload of `USER_DELETED`
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDeleted {
    /// The deactivated user
    pub user_id: i64,
}

/// Payload of `USER_LOGIN`
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserLogin {
    /// Who logged in
    pub user_id: i64,
    /// Their email
    pub email: String,
    /// Client address
    pub ip: String,
    /// `User-Agent` header
    pub user_agent: String,
    /// When
    pub timestamp: DateTime<Utc>,
}

/// Events published by the identity service.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum AccountEvent {
    /// `USER_CREATED`
    Created(UserCreated),
    /// `USER_UPDATED`
    StatusChanged(StatusChanged),
    /// `USER_DELETED`
    Deleted(UserDeleted),
    /// `USER_LOGIN`
    LoggedIn(UserLogin),
}

impl AccountEvent {
    /// Topic the event belongs on
    #[must_use]
    pub const fn topic(&self) -> &'static str {
        match self {
            Self::LoggedIn(_) => AUTH_TOPIC,
            Self::Created(_) | Self::StatusChanged(_) | Self::Deleted(_) => USER_TOPIC,
        }
    }
}

impl Event for AccountEvent {
    fn event_type(&self) -> &'static str {
        match self {
            Self::Created(_) => "USER_CREATED",
            Self::StatusChanged(_) => "USER_UPDATED",
            Self::Deleted(_) => "USER_DELETED",
            Self::LoggedIn(_) => "USER_LOGIN",
        }
    }

    fn routing_key(&self) -> &'static str {
        match self {
            Self::Created(_) => "user.created",
            Self::StatusChanged(_) => "user.updated",
            Self::Deleted(_) => "user.deleted",
            Self::LoggedIn(_) => "auth.login",
        }
    }
}
