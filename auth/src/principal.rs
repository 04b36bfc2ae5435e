//! Roles and the authenticated principal carried by bearer tokens.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Clinic role of an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Full administrative access
    Admin,
    /// Reception staff: books, assigns and reschedules for clients
    FrontDesk,
    /// A patient
    Client,
    /// A dentist
    Practitioner,
}

impl Role {
    /// All roles, in declaration order.
    pub const ALL: [Self; 4] = [Self::Admin, Self::FrontDesk, Self::Client, Self::Practitioner];

    /// Wire representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::FrontDesk => "front_desk",
            Self::Client => "client",
            Self::Practitioner => "practitioner",
        }
    }

    /// Admin or front desk.
    #[must_use]
    pub const fn is_staff(self) -> bool {
        matches!(self, Self::Admin | Self::FrontDesk)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a string is not a known role.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown role: {0}")]
pub struct UnknownRole(pub String);

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|role| role.as_str() == s)
            .ok_or_else(|| UnknownRole(s.to_string()))
    }
}

/// The caller of a request, as established by a validated token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticatedUser {
    /// Global user identifier minted by the identity service
    pub id: i64,
    /// Account email
    pub email: String,
    /// Clinic role
    pub role: Role,
    /// Given name
    pub name: String,
    /// Family name
    pub surname: String,
}

impl AuthenticatedUser {
    /// `true` if the caller holds one of `roles`.
    #[must_use]
    pub fn has_any_role(&self, roles: &[Role]) -> bool {
        roles.contains(&self.role)
    }

    /// `true` if the caller is the user `id` or is staff.
    #[must_use]
    pub const fn is_self_or_staff(&self, id: i64) -> bool {
        self.id == id || self.role.is_staff()
    }
}

/// Body of a successful `POST /api/auth/validate-token`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenValidation {
    /// Always `true` on success
    pub valid: bool,
    /// The principal the token belongs to
    pub user: AuthenticatedUser,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn roles_round_trip_through_their_wire_names() {
        for role in Role::ALL {
            assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
            assert_eq!(
                serde_json::to_value(role).unwrap(),
                serde_json::json!(role.as_str())
            );
        }
        assert!("dentist".parse::<Role>().is_err());
    }

    #[test]
    fn staff_is_admin_and_front_desk() {
        assert!(Role::Admin.is_staff());
        assert!(Role::FrontDesk.is_staff());
        assert!(!Role::Client.is_staff());
        assert!(!Role::Practitioner.is_staff());
    }

    #[test]
    fn self_or_staff() {
        let client = AuthenticatedUser {
            id: 4,
            email: "ana@example.com".to_string(),
            role: Role::Client,
            name: "Ana".to_string(),
            surname: "Ruiz".to_string(),
        };
        assert!(client.is_self_or_staff(4));
        assert!(!client.is_self_or_staff(5));

        let desk = AuthenticatedUser {
            role: Role::FrontDesk,
            ..client
        };
        assert!(desk.is_self_or_staff(5));
    }
}
