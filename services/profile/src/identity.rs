//! Client for the identity service's internal user listing.
//!
//! Used by `POST /api/users/sync/{id}` to materialise a user whose
//! `USER_CREATED` has not been replicated yet.

use crate::types::UserRecord;
use async_trait::async_trait;
use dentalbook_auth::INTERNAL_SERVICE_HEADER;
use reqwest::StatusCode;
use std::time::Duration;
use thiserror::Error;

/// Errors talking to the identity service.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IdentityError {
    /// Timed out, refused, or answered 5xx
    #[error("Identity service unavailable: {0}")]
    Unavailable(String),

    /// Answered something this client does not understand
    #[error("Unexpected identity service response: {0}")]
    Upstream(String),
}

/// Source of authoritative user records.
#[async_trait]
pub trait AccountSource: Send + Sync {
    /// The identity record for `id`, or `None` if identity does not know it.
    async fn find_account(&self, id: i64) -> Result<Option<UserRecord>, IdentityError>;
}

/// [`AccountSource`] over `GET /api/auth/internal/users`.
#[derive(Debug, Clone)]
pub struct HttpAccountSource {
    client: reqwest::Client,
    url: String,
    internal_key: String,
}

impl HttpAccountSource {
    /// Client for the identity service at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::Unavailable`] if the HTTP client cannot be built.
    pub fn new(base_url: &str, internal_key: impl Into<String>, timeout: Duration) -> Result<Self, IdentityError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| IdentityError::Unavailable(e.to_string()))?;
        Ok(Self {
            client,
            url: format!("{}/api/auth/internal/users", base_url.trim_end_matches('/')),
            internal_key: internal_key.into(),
        })
    }
}

#[async_trait]
impl AccountSource for HttpAccountSource {
    async fn find_account(&self, id: i64) -> Result<Option<UserRecord>, IdentityError> {
        let response = self
            .client
            .get(&self.url)
            .header(INTERNAL_SERVICE_HEADER, &self.internal_key)
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(error = %e, "Identity service unreachable");
                IdentityError::Unavailable(e.to_string())
            })?;

        match response.status() {
            StatusCode::OK => {
                let accounts: Vec<UserRecord> =
                    response.json().await.map_err(|e| IdentityError::Upstream(e.to_string()))?;
                Ok(accounts.into_iter().find(|account| account.id == id))
            },
            status if status.is_server_error() => Err(IdentityError::Unavailable(format!(
                "identity service returned {status}"
            ))),
            status => Err(IdentityError::Upstream(format!("unexpected status {status}"))),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::types::tests::record;
    use axum::http::{HeaderMap, StatusCode as AxumStatus};
    use axum::routing::get;
    use axum::{Json, Router};
    use dentalbook_auth::Role;

    async fn fake_identity() -> String {
        async fn list(headers: HeaderMap) -> Result<Json<Vec<UserRecord>>, AxumStatus> {
            if headers.get(INTERNAL_SERVICE_HEADER).and_then(|v| v.to_str().ok()) != Some("key") {
                return Err(AxumStatus::FORBIDDEN);
            }
            Ok(Json(vec![record(1, Role::Client), record(2, Role::Practitioner)]))
        }

        let app = Router::new().route("/api/auth/internal/users", get(list));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn finds_accounts_in_the_listing() {
        let url = fake_identity().await;
        let source = HttpAccountSource::new(&url, "key", Duration::from_secs(2)).unwrap();

        assert_eq!(source.find_account(2).await.unwrap(), Some(record(2, Role::Practitioner)));
        assert_eq!(source.find_account(3).await.unwrap(), None);

        let wrong_key = HttpAccountSource::new(&url, "nope", Duration::from_secs(2)).unwrap();
        assert!(matches!(wrong_key.find_account(1).await, Err(IdentityError::Upstream(_))));
    }

    #[tokio::test]
    async fn unreachable_identity_is_unavailable() {
        let source = HttpAccountSource::new("http://127.0.0.1:9", "key", Duration::from_millis(300)).unwrap();
        assert!(matches!(source.find_account(1).await, Err(IdentityError::Unavailable(_))));
    }
}
