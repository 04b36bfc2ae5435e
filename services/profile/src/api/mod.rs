//! HTTP API for the profile service.

pub mod users;

use crate::aggregates::ProfileRejection;
use crate::identity::IdentityError;
use crate::service::ProfileError;
use axum::http::StatusCode;
use dentalbook_web::AppError;

impl From<ProfileError> for AppError {
    fn from(error: ProfileError) -> Self {
        match error {
            ProfileError::Rejected(ProfileRejection::NotFound) => {
                Self::new(StatusCode::NOT_FOUND, "User not found".to_string(), "NOT_FOUND".to_string())
            },
            ProfileError::Rejected(ProfileRejection::Invalid { field, message }) => {
                Self::invalid_field(field, message)
            },
            ProfileError::Rejected(rejection @ ProfileRejection::AlreadyReplicated { .. }) => {
                Self::conflict(rejection.to_string())
            },
            ProfileError::Rejected(rejection) => Self::new(
                StatusCode::BAD_REQUEST,
                rejection.to_string(),
                rejection.code().to_string(),
            ),
            ProfileError::Duplicate { field } => Self::new(
                StatusCode::CONFLICT,
                format!("{field} is already registered"),
                "DUPLICATE".to_string(),
            )
            .with_details(serde_json::json!({ "field": field })),
            ProfileError::Inactive(_) => Self::forbidden("User account is inactive"),
            ProfileError::Identity(IdentityError::Unavailable(reason)) => {
                Self::unavailable("Identity service unavailable").with_source(anyhow::anyhow!(reason))
            },
            ProfileError::Identity(error @ IdentityError::Upstream(_)) => {
                Self::internal("Unexpected identity service response").with_source(error.into())
            },
            ProfileError::Contention(_) => Self::conflict(error.to_string()),
            ProfileError::Storage(error) => Self::internal("An internal error occurred").with_source(error.into()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use dentalbook_postgres::RepositoryError;

    #[test]
    fn errors_map_to_http_statuses() {
        let cases = [
            (ProfileError::Rejected(ProfileRejection::NotFound), StatusCode::NOT_FOUND),
            (ProfileError::Rejected(ProfileRejection::NotAClient), StatusCode::BAD_REQUEST),
            (
                ProfileError::Rejected(ProfileRejection::Invalid {
                    field: "phone",
                    message: "too short".to_string(),
                }),
                StatusCode::BAD_REQUEST,
            ),
            (ProfileError::Duplicate { field: "nationalId" }, StatusCode::CONFLICT),
            (ProfileError::Inactive(3), StatusCode::FORBIDDEN),
            (
                ProfileError::Identity(IdentityError::Unavailable("timeout".to_string())),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                ProfileError::Storage(RepositoryError::Database("down".to_string())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (error, status) in cases {
            assert_eq!(AppError::from(error).status(), status);
        }
    }
}
