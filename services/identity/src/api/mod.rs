//! HTTP API for the identity service.

pub mod auth;

use crate::aggregates::AccountRejection;
use crate::service::AccountError;
use axum::http::StatusCode;
use dentalbook_web::AppError;

impl From<AccountError> for AppError {
    fn from(error: AccountError) -> Self {
        match error {
            AccountError::Rejected(AccountRejection::NotFound) => {
                Self::new(StatusCode::NOT_FOUND, "User not found".to_string(), "NOT_FOUND".to_string())
            },
            AccountError::Rejected(rejection @ AccountRejection::EmailTaken(_)) => {
                Self::new(StatusCode::CONFLICT, rejection.to_string(), "DUPLICATE".to_string())
                    .with_details(serde_json::json!({ "field": "email" }))
            },
            AccountError::Rejected(rejection @ AccountRejection::Inactive) => Self::forbidden(rejection.to_string()),
            AccountError::Rejected(AccountRejection::Invalid { field, message }) => {
                Self::invalid_field(field, message)
            },
            AccountError::Auth(error) => error.into(),
            AccountError::Storage(error) => Self::internal("An internal error occurred").with_source(error.into()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use dentalbook_auth::AuthError;
    use dentalbook_postgres::RepositoryError;

    #[test]
    fn errors_map_to_http_statuses() {
        let cases = [
            (AccountError::Rejected(AccountRejection::NotFound), StatusCode::NOT_FOUND),
            (
                AccountError::Rejected(AccountRejection::EmailTaken("a@b.co".to_string())),
                StatusCode::CONFLICT,
            ),
            (AccountError::Rejected(AccountRejection::Inactive), StatusCode::FORBIDDEN),
            (AccountError::Auth(AuthError::InvalidCredentials), StatusCode::UNAUTHORIZED),
            (
                AccountError::Storage(RepositoryError::Database("down".to_string())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (error, status) in cases {
            assert_eq!(AppError::from(error).status(), status);
        }
    }
}
