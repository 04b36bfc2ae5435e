//! Appointment endpoints.
//!
//! - `POST   /api/appointments` - book (client for self, or staff for a client)
//! - `GET    /api/appointments` - filtered listing
//! - `GET    /api/appointments/:id`
//! - `PUT    /api/appointments/:id/assign` - staff binds a practitioner
//! - `PUT    /api/appointments/:id/reschedule`
//! - `PUT    /api/appointments/:id/cancel`
//! - `PATCH  /api/appointments/:id/status`
//! - `GET    /api/appointments/client/:id`
//! - `GET    /api/appointments/practitioner/:id`
//! - `GET    /api/appointments/availability/:date`

use crate::aggregates::NewAppointment;
use crate::availability::Slot;
use crate::repository::{AppointmentFilter, SortOrder};
use crate::server::AppState;
use crate::types::{Appointment, AppointmentId, AppointmentStatus, ConsultationType, Page};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use chrono::{DateTime, NaiveDate, Utc};
use dentalbook_auth::Role;
use dentalbook_web::{AppError, AuthUser};
use serde::{Deserialize, Serialize};

const STAFF: [Role; 2] = [Role::Admin, Role::FrontDesk];

/// Largest accepted page size
const MAX_PAGE_SIZE: u32 = 100;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Query parameters for listings.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    /// Filter by client
    pub client_id: Option<i64>,
    /// Filter by practitioner
    pub practitioner_id: Option<i64>,
    /// Filter by status
    pub status: Option<AppointmentStatus>,
    /// Filter by consultation type
    pub consultation_type: Option<ConsultationType>,
    /// Earliest start (inclusive)
    pub from: Option<DateTime<Utc>>,
    /// Latest start (exclusive)
    pub to: Option<DateTime<Utc>>,
    /// 1-based page (default 1)
    pub page: Option<u32>,
    /// Page size (default 10, max 100)
    pub limit: Option<u32>,
    /// `asc` (default) or `desc` on start time
    pub sort: Option<SortOrder>,
}

impl ListQuery {
    fn into_filter(self) -> AppointmentFilter {
        let defaults = AppointmentFilter::default();
        AppointmentFilter {
            client_id: self.client_id,
            practitioner_id: self.practitioner_id,
            status: self.status,
            consultation_type: self.consultation_type,
            from: self.from,
            to: self.to,
            page: self.page.unwrap_or(defaults.page).max(1),
            limit: self.limit.unwrap_or(defaults.limit).clamp(1, MAX_PAGE_SIZE),
            sort: self.sort.unwrap_or_default(),
        }
    }
}

/// Body of `PUT /:id/assign`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignRequest {
    /// Practitioner to bind
    pub practitioner_id: i64,
    /// Front-desk notes
    #[serde(default)]
    pub observations: Option<String>,
}

/// Body of `PUT /:id/reschedule`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RescheduleRequest {
    /// New start time
    pub scheduled_at: DateTime<Utc>,
    /// Why
    #[serde(default)]
    pub reason: Option<String>,
}

/// Body of `PUT /:id/cancel`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelRequest {
    /// Why
    #[serde(default)]
    pub reason: Option<String>,
}

/// Body of `PATCH /:id/status`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusRequest {
    /// Target status
    pub status: AppointmentStatus,
    /// Practitioner notes
    #[serde(default)]
    pub notes: Option<String>,
}

/// Free slots of one day.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityResponse {
    /// `YYYY-MM-DD`
    pub date: String,
    /// Bookable start times
    pub available_slots: Vec<Slot>,
}

// ============================================================================
// Access rules
// ============================================================================

/// Staff, the owning client, or the assigned practitioner may read.
fn can_view(auth: &AuthUser, appointment: &Appointment) -> bool {
    match auth.user.role {
        Role::Admin | Role::FrontDesk => true,
        Role::Client => appointment.client_id == auth.user.id,
        Role::Practitioner => appointment.practitioner_id == Some(auth.user.id),
    }
}

/// Staff, or the owning client; returns whether the client lead time applies.
fn require_owner_or_staff(auth: &AuthUser, appointment: &Appointment) -> Result<bool, AppError> {
    auth.require_role(&[Role::Admin, Role::FrontDesk, Role::Client])?;
    if auth.user.role == Role::Client {
        if appointment.client_id != auth.user.id {
            return Err(AppError::forbidden("You can only change your own appointments"));
        }
        return Ok(true);
    }
    Ok(false)
}

// ============================================================================
// Handlers
// ============================================================================

/// Book an appointment.
///
/// Clients always book for themselves; staff must name `clientId`.
pub async fn create_appointment(
    auth: AuthUser,
    State(state): State<AppState>,
    Json(request): Json<NewAppointment>,
) -> Result<(StatusCode, Json<Appointment>), AppError> {
    auth.require_role(&[Role::Client, Role::FrontDesk, Role::Admin])?;

    let client_id = if auth.user.role == Role::Client {
        auth.user.id
    } else {
        request
            .client_id
            .ok_or_else(|| AppError::invalid_field("clientId", "Staff bookings must name the client"))?
    };

    let appointment = state.scheduler.create(request, client_id).await?;
    Ok((StatusCode::CREATED, Json(appointment)))
}

/// List appointments.
///
/// Staff see everything; clients and practitioners only their own.
pub async fn list_appointments(
    auth: AuthUser,
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Page<Appointment>>, AppError> {
    let mut filter = query.into_filter();
    match auth.user.role {
        Role::Admin | Role::FrontDesk => {},
        Role::Client => filter.client_id = Some(auth.user.id),
        Role::Practitioner => filter.practitioner_id = Some(auth.user.id),
    }
    Ok(Json(state.scheduler.list(&filter).await?))
}

/// One appointment.
pub async fn get_appointment(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Appointment>, AppError> {
    let appointment = state.scheduler.find(AppointmentId(id)).await?;
    if !can_view(&auth, &appointment) {
        return Err(AppError::forbidden("You cannot view this appointment"));
    }
    Ok(Json(appointment))
}

/// Assign a practitioner (staff only).
pub async fn assign_practitioner(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<AssignRequest>,
) -> Result<Json<Appointment>, AppError> {
    auth.require_role(&STAFF)?;
    let appointment = state
        .scheduler
        .assign(AppointmentId(id), request.practitioner_id, request.observations)
        .await?;
    Ok(Json(appointment))
}

/// Reschedule (owning client or staff).
pub async fn reschedule_appointment(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<RescheduleRequest>,
) -> Result<Json<Appointment>, AppError> {
    let id = AppointmentId(id);
    let current = state.scheduler.find(id).await?;
    let by_client = require_owner_or_staff(&auth, &current)?;

    let appointment = state
        .scheduler
        .reschedule(id, request.scheduled_at, request.reason, by_client)
        .await?;
    Ok(Json(appointment))
}

/// Cancel (owning client or staff).
pub async fn cancel_appointment(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<i64>,
    body: Option<Json<CancelRequest>>,
) -> Result<Json<Appointment>, AppError> {
    let id = AppointmentId(id);
    let current = state.scheduler.find(id).await?;
    let by_client = require_owner_or_staff(&auth, &current)?;

    let Json(request) = body.unwrap_or_default();
    let appointment = state.scheduler.cancel(id, request.reason, by_client).await?;
    Ok(Json(appointment))
}

/// Move along the transition table (staff, or the assigned practitioner).
pub async fn update_status(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<StatusRequest>,
) -> Result<Json<Appointment>, AppError> {
    auth.require_role(&[Role::Practitioner, Role::FrontDesk, Role::Admin])?;
    let id = AppointmentId(id);
    if auth.user.role == Role::Practitioner {
        let current = state.scheduler.find(id).await?;
        if current.practitioner_id != Some(auth.user.id) {
            return Err(AppError::forbidden("Only the assigned practitioner can update this appointment"));
        }
    }

    let appointment = state.scheduler.update_status(id, request.status, request.notes).await?;
    Ok(Json(appointment))
}

/// A client's appointments (the client or staff).
pub async fn client_appointments(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(client_id): Path<i64>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Page<Appointment>>, AppError> {
    auth.require_self_or_staff(client_id)?;
    let filter = AppointmentFilter {
        client_id: Some(client_id),
        ..query.into_filter()
    };
    Ok(Json(state.scheduler.list(&filter).await?))
}

/// A practitioner's appointments (the practitioner or staff).
pub async fn practitioner_appointments(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(practitioner_id): Path<i64>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Page<Appointment>>, AppError> {
    auth.require_self_or_staff(practitioner_id)?;
    let filter = AppointmentFilter {
        practitioner_id: Some(practitioner_id),
        ..query.into_filter()
    };
    Ok(Json(state.scheduler.list(&filter).await?))
}

/// Free half-hour slots on a clinic-local date (`YYYY-MM-DD`).
pub async fn availability(
    _auth: AuthUser,
    State(state): State<AppState>,
    Path(date): Path<String>,
) -> Result<Json<AvailabilityResponse>, AppError> {
    let day = NaiveDate::parse_from_str(&date, "%Y-%m-%d")
        .map_err(|_| AppError::invalid_field("date", "Expected a date as YYYY-MM-DD"))?;
    let available_slots = state.scheduler.availability(day).await?;
    Ok(Json(AvailabilityResponse {
        date: day.format("%Y-%m-%d").to_string(),
        available_slots,
    }))
}
