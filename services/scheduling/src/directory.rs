//! Client for the profile service's user directory.
//!
//! Appointments reference users owned by another service. Before booking or
//! assigning, the scheduler looks the user up over HTTP. If the profile
//! service has not replicated the user yet (404), it asks the profile
//! service to pull the record from the identity service (`sync/{id}`) and
//! retries once.

use async_trait::async_trait;
use dentalbook_auth::{INTERNAL_SERVICE_HEADER, Role};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// A user as the profile service reports it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryUser {
    /// Global user id
    pub id: i64,
    /// Email
    pub email: String,
    /// Given name
    pub name: String,
    /// Family name
    pub surname: String,
    /// Role
    pub role: Role,
    /// Account active
    pub active: bool,
    /// Client has completed their profile
    #[serde(default)]
    pub profile_complete: bool,
    /// Contact phone
    #[serde(default)]
    pub phone: Option<String>,
}

/// Errors talking to the profile service.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DirectoryError {
    /// Timed out, refused, or answered 5xx
    #[error("Profile service unavailable: {0}")]
    Unavailable(String),

    /// Answered something this client does not understand
    #[error("Unexpected profile service response: {0}")]
    Upstream(String),
}

/// Lookup of users by global id.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// `Ok(None)` when neither the profile nor the identity service knows the user.
    async fn find_user(&self, id: i64) -> Result<Option<DirectoryUser>, DirectoryError>;
}

/// [`UserDirectory`] over the profile service's HTTP API.
#[derive(Debug, Clone)]
pub struct HttpUserDirectory {
    client: reqwest::Client,
    base_url: String,
    internal_key: String,
}

impl HttpUserDirectory {
    /// Create a client with a per-request `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`DirectoryError::Unavailable`] if the HTTP client cannot be built.
    pub fn new(
        base_url: &str,
        internal_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, DirectoryError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DirectoryError::Unavailable(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            internal_key: internal_key.into(),
        })
    }

    async fn read(response: reqwest::Response) -> Result<Option<DirectoryUser>, DirectoryError> {
        match response.status() {
            StatusCode::OK | StatusCode::CREATED => response
                .json()
                .await
                .map(Some)
                .map_err(|e| DirectoryError::Upstream(e.to_string())),
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_server_error() => Err(DirectoryError::Unavailable(format!(
                "profile service returned {status}"
            ))),
            status => Err(DirectoryError::Upstream(format!("unexpected status {status}"))),
        }
    }

    fn unreachable(error: &reqwest::Error) -> DirectoryError {
        tracing::warn!(error = %error, "Profile service unreachable");
        DirectoryError::Unavailable(error.to_string())
    }
}

#[async_trait]
impl UserDirectory for HttpUserDirectory {
    async fn find_user(&self, id: i64) -> Result<Option<DirectoryUser>, DirectoryError> {
        let response = self
            .client
            .get(format!("{}/api/users/{id}", self.base_url))
            .header(INTERNAL_SERVICE_HEADER, &self.internal_key)
            .send()
            .await
            .map_err(|e| Self::unreachable(&e))?;

        if let Some(user) = Self::read(response).await? {
            return Ok(Some(user));
        }

        tracing::info!(user_id = id, "User not replicated yet, requesting on-demand sync");
        let response = self
            .client
            .post(format!("{}/api/users/sync/{id}", self.base_url))
            .header(INTERNAL_SERVICE_HEADER, &self.internal_key)
            .send()
            .await
            .map_err(|e| Self::unreachable(&e))?;

        Self::read(response).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::extract::Path;
    use axum::http::{HeaderMap, StatusCode as AxumStatus};
    use axum::routing::{get, post};
    use axum::{Json, Router};

    fn user(id: i64) -> DirectoryUser {
        DirectoryUser {
            id,
            email: format!("user{id}@example.com"),
            name: "Ana".to_string(),
            surname: "Ruiz".to_string(),
            role: Role::Client,
            active: true,
            profile_complete: true,
            phone: None,
        }
    }

    fn internal(headers: &HeaderMap) -> bool {
        headers.get(INTERNAL_SERVICE_HEADER).and_then(|v| v.to_str().ok()) == Some("key")
    }

    // 1 is replicated, 2 only exists upstream (sync creates it), 3 is unknown, 4 breaks.
    async fn fake_profile_service() -> String {
        async fn get_user(
            Path(id): Path<i64>,
            headers: HeaderMap,
        ) -> Result<Json<DirectoryUser>, AxumStatus> {
            if !internal(&headers) {
                return Err(AxumStatus::FORBIDDEN);
            }
            match id {
                1 => Ok(Json(user(1))),
                4 => Err(AxumStatus::INTERNAL_SERVER_ERROR),
                _ => Err(AxumStatus::NOT_FOUND),
            }
        }

        async fn sync_user(
            Path(id): Path<i64>,
            headers: HeaderMap,
        ) -> Result<(AxumStatus, Json<DirectoryUser>), AxumStatus> {
            if !internal(&headers) {
                return Err(AxumStatus::FORBIDDEN);
            }
            match id {
                2 => Ok((AxumStatus::CREATED, Json(user(2)))),
                _ => Err(AxumStatus::NOT_FOUND),
            }
        }

        let app = Router::new()
            .route("/api/users/:id", get(get_user))
            .route("/api/users/sync/:id", post(sync_user));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn looks_up_then_falls_back_to_sync() {
        let url = fake_profile_service().await;
        let directory = HttpUserDirectory::new(&url, "key", Duration::from_secs(2)).unwrap();

        assert_eq!(directory.find_user(1).await.unwrap(), Some(user(1)));
        assert_eq!(directory.find_user(2).await.unwrap(), Some(user(2)));
        assert_eq!(directory.find_user(3).await.unwrap(), None);
        assert!(matches!(
            directory.find_user(4).await,
            Err(DirectoryError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn unreachable_profile_service_is_unavailable() {
        let directory =
            HttpUserDirectory::new("http://127.0.0.1:9", "key", Duration::from_millis(300)).unwrap();
        assert!(matches!(
            directory.find_user(1).await,
            Err(DirectoryError::Unavailable(_))
        ));
    }
}
