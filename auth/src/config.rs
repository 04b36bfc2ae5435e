//! Authentication configuration.
//!
//! All services read the same variables so that tokens minted by identity
//! verify everywhere and the internal-service credential matches.

use std::env;
use std::time::Duration;

/// Default issuer claim.
pub const DEFAULT_ISSUER: &str = "dentalbook-identity";

/// Default audience claim.
pub const DEFAULT_AUDIENCE: &str = "dentalbook-app";

/// Header carrying the shared internal-service credential.
pub const INTERNAL_SERVICE_HEADER: &str = "x-internal-service";

/// Token, password and service-to-service settings.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// HS256 signing secret
    pub jwt_secret: String,
    /// `iss` claim
    pub issuer: String,
    /// `aud` claim
    pub audience: String,
    /// Token lifetime (default 24 hours)
    pub token_ttl: chrono::Duration,
    /// bcrypt cost factor (default 12)
    pub bcrypt_cost: u32,
    /// Expected value of the `x-internal-service` header
    pub internal_service_key: String,
    /// Base URL of the identity service
    pub identity_url: String,
    /// Timeout for calls to the identity service (default 5 seconds)
    pub request_timeout: Duration,
}

impl AuthConfig {
    /// Load from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            jwt_secret: env::var("JWT_SECRET")
                .unwrap_or_else(|_| "dentalbook-development-secret-change-me".to_string()),
            issuer: env::var("JWT_ISSUER").unwrap_or_else(|_| DEFAULT_ISSUER.to_string()),
            audience: env::var("JWT_AUDIENCE").unwrap_or_else(|_| DEFAULT_AUDIENCE.to_string()),
            token_ttl: chrono::Duration::hours(
                env::var("JWT_TTL_HOURS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(24),
            ),
            bcrypt_cost: env::var("BCRYPT_COST")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(12),
            internal_service_key: env::var("INTERNAL_SERVICE_KEY")
                .unwrap_or_else(|_| "dentalbook-internal".to_string()),
            identity_url: env::var("IDENTITY_SERVICE_URL")
                .unwrap_or_else(|_| "http://localhost:3001".to_string()),
            request_timeout: Duration::from_millis(
                env::var("AUTH_REQUEST_TIMEOUT_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(5_000),
            ),
        }
    }

    /// Fixed secrets and the cheapest bcrypt cost, for tests.
    #[must_use]
    pub fn for_tests() -> Self {
        Self {
            jwt_secret: "test-secret".to_string(),
            issuer: DEFAULT_ISSUER.to_string(),
            audience: DEFAULT_AUDIENCE.to_string(),
            token_ttl: chrono::Duration::hours(24),
            bcrypt_cost: 4,
            internal_service_key: "internal-test-key".to_string(),
            identity_url: "http://127.0.0.1:9".to_string(),
            request_timeout: Duration::from_secs(1),
        }
    }
}
