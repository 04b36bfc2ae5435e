//! Token validation seam.
//!
//! The identity service checks tokens against its own accounts. Profile and
//! scheduling forward the bearer token to identity's `validate-token` endpoint so that a
//! deactivated account is rejected everywhere at once.

use crate::config::AuthConfig;
use crate::error::{AuthError, Result};
use crate::principal::{AuthenticatedUser, TokenValidation};
use async_trait::async_trait;
use reqwest::StatusCode;

/// Turns a bearer token into the caller it belongs to.
#[async_trait]
pub trait TokenValidator: Send + Sync {
    /// Validate `token`.
    ///
    /// # Errors
    ///
    /// Returns an unauthenticated [`AuthError`] for bad or expired tokens,
    /// [`AuthError::AccountDisabled`] for deactivated accounts and
    /// [`AuthError::Unavailable`] if validation could not be performed.
    async fn validate(&self, token: &str) -> Result<AuthenticatedUser>;
}

/// Asks the identity service.
#[derive(Debug, Clone)]
pub struct RemoteTokenValidator {
    client: reqwest::Client,
    url: String,
}

impl RemoteTokenValidator {
    /// Validator for the identity service at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Unavailable`] if the HTTP client cannot be built.
    pub fn new(base_url: &str, timeout: std::time::Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AuthError::Unavailable(e.to_string()))?;

        Ok(Self {
            client,
            url: format!("{}/api/auth/validate-token", base_url.trim_end_matches('/')),
        })
    }

    /// Validator configured from [`AuthConfig`].
    ///
    /// # Errors
    ///
    /// See [`Self::new`].
    pub fn from_config(config: &AuthConfig) -> Result<Self> {
        Self::new(&config.identity_url, config.request_timeout)
    }
}

#[async_trait]
impl TokenValidator for RemoteTokenValidator {
    async fn validate(&self, token: &str) -> Result<AuthenticatedUser> {
        let response = self
            .client
            .post(&self.url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(error = %e, "Identity service unreachable for token validation");
                AuthError::Unavailable(e.to_string())
            })?;

        match response.status() {
            StatusCode::OK => {
                let body: TokenValidation = response
                    .json()
                    .await
                    .map_err(|e| AuthError::Upstream(e.to_string()))?;
                Ok(body.user)
            },
            StatusCode::UNAUTHORIZED => Err(AuthError::InvalidToken(
                "rejected by identity service".to_string(),
            )),
            StatusCode::FORBIDDEN => Err(AuthError::AccountDisabled),
            status if status.is_server_error() => {
                Err(AuthError::Unavailable(format!("identity service returned {status}")))
            },
            status => Err(AuthError::Upstream(format!("unexpected status {status}"))),
        }
    }
}
