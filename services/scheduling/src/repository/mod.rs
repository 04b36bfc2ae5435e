//! Appointment storage.
//!
//! Reads go through [`AppointmentRepository`] directly. Every write goes
//! through a [`BookingTx`]: a transaction that first takes advisory locks on
//! the calendar scopes it will check, so the overlap test and the write it
//! guards cannot interleave with another booking.

mod memory;
mod postgres;

pub use memory::InMemoryAppointmentRepository;
pub use postgres::PostgresAppointmentRepository;

use crate::types::{Appointment, AppointmentId, AppointmentStatus, ConsultationType, Page, ReminderWindow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dentalbook_core::event::SerializedEvent;
use dentalbook_postgres::{LockScope, RepositoryError};
use serde::Deserialize;

/// Result alias for storage operations
pub type Result<T> = std::result::Result<T, RepositoryError>;

/// Sort order on `scheduled_at`
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    /// Earliest first
    #[default]
    Asc,
    /// Latest first
    Desc,
}

/// Listing criteria; `None` fields do not filter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AppointmentFilter {
    /// Owning client
    pub client_id: Option<i64>,
    /// Assigned practitioner
    pub practitioner_id: Option<i64>,
    /// Status
    pub status: Option<AppointmentStatus>,
    /// Consultation type
    pub consultation_type: Option<ConsultationType>,
    /// `scheduled_at >= from`
    pub from: Option<DateTime<Utc>>,
    /// `scheduled_at < to`
    pub to: Option<DateTime<Utc>>,
    /// 1-based page
    pub page: u32,
    /// Page size
    pub limit: u32,
    /// Order on `scheduled_at`
    pub sort: SortOrder,
}

impl Default for AppointmentFilter {
    fn default() -> Self {
        Self {
            client_id: None,
            practitioner_id: None,
            status: None,
            consultation_type: None,
            from: None,
            to: None,
            page: 1,
            limit: 10,
            sort: SortOrder::Asc,
        }
    }
}

impl AppointmentFilter {
    /// Rows to skip for the requested page
    #[must_use]
    pub fn offset(&self) -> u64 {
        u64::from(self.page.max(1) - 1) * u64::from(self.limit.max(1))
    }

    pub(crate) fn matches(&self, appointment: &Appointment) -> bool {
        self.client_id.is_none_or(|id| appointment.client_id == id)
            && self
                .practitioner_id
                .is_none_or(|id| appointment.practitioner_id == Some(id))
            && self.status.is_none_or(|status| appointment.status == status)
            && self
                .consultation_type
                .is_none_or(|kind| appointment.consultation_type == kind)
            && self.from.is_none_or(|from| appointment.scheduled_at >= from)
            && self.to.is_none_or(|to| appointment.scheduled_at < to)
    }
}

/// Which appointments a reminder sweep should look at.
///
/// Active appointments starting in `(now, now + window.lead()]`; the
/// day-before window also requires `reminder_sent = false`.
#[must_use]
pub fn due_for_reminder(appointment: &Appointment, window: ReminderWindow, now: DateTime<Utc>) -> bool {
    appointment.status.is_active()
        && appointment.scheduled_at > now
        && appointment.scheduled_at <= now + window.lead()
        && (window == ReminderWindow::Imminent || !appointment.reminder_sent)
}

/// Read side and transaction factory for appointments.
#[async_trait]
pub trait AppointmentRepository: Send + Sync {
    /// Open a write transaction holding locks on `scopes`.
    async fn begin(&self, scopes: &[LockScope]) -> Result<Box<dyn BookingTx>>;

    /// One appointment by id
    async fn find(&self, id: AppointmentId) -> Result<Option<Appointment>>;

    /// Filtered, paginated listing
    async fn list(&self, filter: &AppointmentFilter) -> Result<Page<Appointment>>;

    /// Active appointments starting in `[from, to)`, by start time
    async fn active_between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<Appointment>>;

    /// Ids of appointments the reminder sweep should process
    async fn due_for_reminder(&self, window: ReminderWindow, now: DateTime<Utc>) -> Result<Vec<AppointmentId>>;

    /// Ids of active appointments that started before `before`
    async fn overdue(&self, before: DateTime<Utc>) -> Result<Vec<AppointmentId>>;

    /// Hard-delete cancelled appointments created before `before`; returns the count
    async fn purge_cancelled(&self, before: DateTime<Utc>) -> Result<u64>;

    /// Storage is reachable
    async fn ping(&self) -> bool;
}

/// A locked write transaction. Dropping it without [`BookingTx::commit`] rolls back.
#[async_trait]
pub trait BookingTx: Send {
    /// Allocate an id for a new appointment
    async fn next_id(&mut self) -> Result<AppointmentId>;

    /// Load an appointment for update
    async fn load(&mut self, id: AppointmentId) -> Result<Option<Appointment>>;

    /// Active appointments starting in `[from, to)`, optionally for one practitioner
    async fn active_between(
        &mut self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        practitioner_id: Option<i64>,
    ) -> Result<Vec<Appointment>>;

    /// Insert a new appointment
    async fn insert(&mut self, appointment: &Appointment) -> Result<()>;

    /// Overwrite an existing appointment
    async fn update(&mut self, appointment: &Appointment) -> Result<()>;

    /// Write an event to the outbox in this transaction
    async fn enqueue(&mut self, topic: &str, event: &SerializedEvent) -> Result<()>;

    /// Make everything durable and release the locks
    async fn commit(self: Box<Self>) -> Result<()>;
}
