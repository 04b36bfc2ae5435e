//! Account types and request bodies.

use chrono::{DateTime, Utc};
use dentalbook_auth::{AuthenticatedUser, Role};
use serde::{Deserialize, Serialize};

/// A user's credentials and identity-owned fields.
///
/// The password hash never leaves the service: it is skipped when
/// serialising.
#[derive(Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    /// Global user id, minted here
    pub id: i64,
    /// Unique email
    pub email: String,
    /// bcrypt hash
    #[serde(skip_serializing)]
    pub password_hash: String,
    /// Given name
    pub name: String,
    /// Family name
    pub surname: String,
    /// Clinic role
    pub role: Role,
    /// Deactivated accounts cannot log in
    pub active: bool,
    /// Clients start incomplete; staff and practitioners are complete
    pub profile_complete: bool,
    /// Last successful login
    pub last_login: Option<DateTime<Utc>>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last change
    pub updated_at: DateTime<Utc>,
}

impl std::fmt::Debug for Account {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Account")
            .field("id", &self.id)
            .field("email", &self.email)
            .field("role", &self.role)
            .field("active", &self.active)
            .finish_non_exhaustive()
    }
}

impl Account {
    /// The principal a token for this account carries
    #[must_use]
    pub fn principal(&self) -> AuthenticatedUser {
        AuthenticatedUser {
            id: self.id,
            email: self.email.clone(),
            role: self.role,
            name: self.name.clone(),
            surname: self.surname.clone(),
        }
    }
}

/// Body of `POST /api/auth/register`.
#[derive(Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    /// Given name
    pub name: String,
    /// Family name
    pub surname: String,
    /// Email
    pub email: String,
    /// Plain-text password
    pub password: String,
    /// Must equal `password`
    pub confirm_password: String,
}

/// Body of `POST /api/auth/users` (admin).
#[derive(Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewUser {
    /// Given name
    pub name: String,
    /// Family name
    pub surname: String,
    /// Email
    pub email: String,
    /// Plain-text password
    pub password: String,
    /// Role, client when absent
    #[serde(default)]
    pub role: Option<Role>,
}

/// Body of `POST /api/auth/login`.
#[derive(Clone, Deserialize)]
pub struct Credentials {
    /// Email
    #[serde(default)]
    pub email: String,
    /// Plain-text password
    #[serde(default)]
    pub password: String,
}

/// Where a login came from, for the `USER_LOGIN` event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoginContext {
    /// Client address
    pub ip: String,
    /// `User-Agent` header
    pub user_agent: String,
}

/// A signed token and the account it was issued for.
#[derive(Clone, Debug, Serialize)]
pub struct Session {
    /// Bearer token
    pub token: String,
    /// The account
    pub user: Account,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn at(rfc3339: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(rfc3339).unwrap().with_timezone(&Utc)
    }

    /// Active account `id` whose password hash is a placeholder.
    pub(crate) fn account(id: i64, role: Role) -> Account {
        Account {
            id,
            email: format!("user{id}@example.com"),
            password_hash: "not-a-hash".to_string(),
            name: "Ana".to_string(),
            surname: "Ruiz".to_string(),
            role,
            active: true,
            profile_complete: role != Role::Client,
            last_login: None,
            created_at: at("2025-06-01T09:00:00Z"),
            updated_at: at("2025-06-01T09:00:00Z"),
        }
    }

    #[test]
    fn serialised_accounts_hide_the_hash() {
        let json = serde_json::to_value(account(3, Role::Client)).unwrap();
        assert!(json.get("passwordHash").is_none());
        assert_eq!(json["profileComplete"], false);
        assert_eq!(json["role"], "client");
    }

    #[test]
    fn debug_output_hides_the_hash() {
        let output = format!("{:?}", account(3, Role::Admin));
        assert!(!output.contains("not-a-hash"));
    }
}
