//! HTTP API for the scheduling service.

pub mod appointments;

use crate::aggregates::BookingRejection;
use crate::directory::DirectoryError;
use crate::engine::SchedulingError;
use axum::http::StatusCode;
use dentalbook_web::AppError;

impl From<SchedulingError> for AppError {
    fn from(error: SchedulingError) -> Self {
        match error {
            SchedulingError::Rejected(BookingRejection::NotFound) => {
                Self::new(StatusCode::NOT_FOUND, "Appointment not found".to_string(), "NOT_FOUND".to_string())
            },
            SchedulingError::Rejected(rejection) => {
                let status = if rejection.is_conflict() {
                    StatusCode::CONFLICT
                } else {
                    StatusCode::BAD_REQUEST
                };
                let details = match &rejection {
                    BookingRejection::SlotTaken { conflicting }
                    | BookingRejection::PractitionerBusy { conflicting } => {
                        Some(serde_json::json!({ "conflictingAppointmentId": conflicting }))
                    },
                    BookingRejection::InvalidCategory { category, consultation_type } => Some(serde_json::json!({
                        "field": "category",
                        "category": category,
                        "consultationType": consultation_type,
                    })),
                    _ => None,
                };
                let error = Self::new(status, rejection.to_string(), rejection.code().to_string());
                match details {
                    Some(details) => error.with_details(details),
                    None => error,
                }
            },
            SchedulingError::UnknownUser { kind, id } => Self::not_found(kind, id),
            SchedulingError::Directory(DirectoryError::Unavailable(reason)) => {
                Self::unavailable("Profile service unavailable")
                    .with_source(anyhow::anyhow!(reason))
            },
            SchedulingError::Directory(error @ DirectoryError::Upstream(_)) => {
                Self::internal("Unexpected profile service response").with_source(error.into())
            },
            SchedulingError::Contention(_) => Self::conflict(error.to_string()),
            SchedulingError::Storage(error) => {
                Self::internal("An internal error occurred").with_source(error.into())
            },
        }
    }
}
