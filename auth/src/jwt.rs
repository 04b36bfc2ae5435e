//! HS256 bearer tokens.

use crate::config::AuthConfig;
use crate::error::{AuthError, Result};
use crate::principal::{AuthenticatedUser, Role};
use chrono::{DateTime, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

/// Claims carried by every token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// User identifier
    pub id: i64,
    /// Account email
    pub email: String,
    /// Clinic role
    pub role: Role,
    /// Given name
    pub name: String,
    /// Family name
    pub surname: String,
    /// Issuer
    pub iss: String,
    /// Audience
    pub aud: String,
    /// Issued at (seconds since epoch)
    pub iat: i64,
    /// Expiry (seconds since epoch)
    pub exp: i64,
}

impl From<Claims> for AuthenticatedUser {
    fn from(claims: Claims) -> Self {
        Self {
            id: claims.id,
            email: claims.email,
            role: claims.role,
            name: claims.name,
            surname: claims.surname,
        }
    }
}

/// Signs and verifies tokens with a shared secret.
#[derive(Clone)]
pub struct JwtService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    issuer: String,
    audience: String,
    ttl: chrono::Duration,
}

impl std::fmt::Debug for JwtService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtService")
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .finish_non_exhaustive()
    }
}

impl JwtService {
    /// Build from configuration.
    #[must_use]
    pub fn new(config: &AuthConfig) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[config.issuer.as_str()]);
        validation.set_audience(&[config.audience.as_str()]);

        Self {
            encoding: EncodingKey::from_secret(config.jwt_secret.as_bytes()),
            decoding: DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            validation,
            issuer: config.issuer.clone(),
            audience: config.audience.clone(),
            ttl: config.token_ttl,
        }
    }

    /// Issue a token for `user`, valid from `now` for the configured TTL.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Signing`] if encoding fails.
    pub fn issue(&self, user: &AuthenticatedUser, now: DateTime<Utc>) -> Result<String> {
        let claims = Claims {
            id: user.id,
            email: user.email.clone(),
            role: user.role,
            name: user.name.clone(),
            surname: user.surname.clone(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            iat: now.timestamp(),
            exp: (now + self.ttl).timestamp(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| AuthError::Signing(e.to_string()))
    }

    /// Verify signature, issuer, audience and expiry.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::TokenExpired`] for expired tokens and
    /// [`AuthError::InvalidToken`] for anything else that fails validation.
    pub fn verify(&self, token: &str) -> Result<Claims> {
        decode::<Claims>(token, &self.decoding, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                _ => AuthError::InvalidToken(e.to_string()),
            })
    }
}

/// Extract the token from an `Authorization: Bearer <token>` header value.
#[must_use]
pub fn bearer_token(header: &str) -> Option<&str> {
    header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}
