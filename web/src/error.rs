//! Error type for web handlers.
//!
//! Bridges domain errors and HTTP responses. Every response body has the
//! shape `{ "code": "...", "message": "...", "details": ... }`; `details` is
//! present only for validation errors that name a field.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use dentalbook_auth::AuthError;
use serde::Serialize;
use std::fmt;

/// Application error type for web handlers.
///
/// # Examples
///
/// ```ignore
/// async fn handler() -> Result<Json<Appointment>, AppError> {
///     let appointment = repo.find(id).await?
///         .ok_or_else(|| AppError::not_found("Appointment", id))?;
///     Ok(Json(appointment))
/// }
/// ```
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    message: String,
    code: String,
    details: Option<serde_json::Value>,
    source: Option<anyhow::Error>,
}

impl AppError {
    /// Create a new application error.
    #[must_use]
    pub const fn new(status: StatusCode, message: String, code: String) -> Self {
        Self {
            status,
            message,
            code,
            details: None,
            source: None,
        }
    }

    /// Attach the underlying error (logged for 5xx, never sent to clients).
    #[must_use]
    pub fn with_source(mut self, source: anyhow::Error) -> Self {
        self.source = Some(source);
        self
    }

    /// Attach structured detail for the client.
    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// HTTP status of this error.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Machine-readable code.
    #[must_use]
    pub fn code(&self) -> &str {
        &self.code
    }

    /// 400 Bad Request.
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message.into(), "BAD_REQUEST".to_string())
    }

    /// 400 for a single invalid field, with `{ "field": ... }` detail.
    #[must_use]
    pub fn invalid_field(field: &str, message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            message.into(),
            "VALIDATION_ERROR".to_string(),
        )
        .with_details(serde_json::json!({ "field": field }))
    }

    /// 401 Unauthorized.
    #[must_use]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message.into(), "UNAUTHORIZED".to_string())
    }

    /// 403 Forbidden.
    #[must_use]
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message.into(), "FORBIDDEN".to_string())
    }

    /// 404 Not Found.
    #[must_use]
    pub fn not_found(resource: impl fmt::Display, id: impl fmt::Display) -> Self {
        Self::new(
            StatusCode::NOT_FOUND,
            format!("{resource} with id {id} not found"),
            "NOT_FOUND".to_string(),
        )
    }

    /// 409 Conflict.
    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message.into(), "CONFLICT".to_string())
    }

    /// 500 Internal Server Error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            message.into(),
            "INTERNAL_SERVER_ERROR".to_string(),
        )
    }

    /// 503 Service Unavailable.
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::SERVICE_UNAVAILABLE,
            message.into(),
            "SERVICE_UNAVAILABLE".to_string(),
        )
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    code: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            match &self.source {
                Some(source) => tracing::error!(
                    status = %self.status,
                    code = %self.code,
                    message = %self.message,
                    error = %source,
                    "Request failed"
                ),
                None => tracing::error!(
                    status = %self.status,
                    code = %self.code,
                    message = %self.message,
                    "Request failed"
                ),
            }
        }

        let body = ErrorResponse {
            code: self.code,
            message: self.message,
            details: self.details,
        };

        (self.status, Json(body)).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal("An internal error occurred").with_source(err)
    }
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::MissingToken
            | AuthError::InvalidToken(_)
            | AuthError::TokenExpired
            | AuthError::InvalidCredentials => Self::unauthorized(err.to_string()),
            AuthError::AccountDisabled | AuthError::Forbidden(_) => Self::forbidden(err.to_string()),
            AuthError::Unavailable(_) => {
                Self::unavailable("Authentication service unavailable").with_source(err.into())
            },
            AuthError::PasswordHash(_) | AuthError::Signing(_) | AuthError::Upstream(_) => {
                Self::internal("An internal error occurred").with_source(err.into())
            },
        }
    }
}
