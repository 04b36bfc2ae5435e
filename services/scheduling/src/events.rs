//! Appointment domain events published on the bus.

use crate::types::{Appointment, AppointmentId, AppointmentStatus, Category, ConsultationType, Priority, ReminderWindow};
use chrono::{DateTime, Utc};
use dentalbook_core::event::Event;
use serde::Serialize;

/// Topic for appointment lifecycle events
pub const APPOINTMENT_TOPIC: &str = "cita.events";

/// Topic for reminders
pub const NOTIFICATION_TOPIC: &str = "notification.events";

/// Summary published when an appointment is booked.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppointmentCreated {
    /// Appointment ID
    pub id: AppointmentId,
    /// Client
    pub client_id: i64,
    /// Consultation type
    pub consultation_type: ConsultationType,
    /// Category
    pub category: Category,
    /// Start time
    pub scheduled_at: DateTime<Utc>,
    /// Status (always pending)
    pub status: AppointmentStatus,
    /// Priority
    pub priority: Priority,
}

impl From<&Appointment> for AppointmentCreated {
    fn from(appointment: &Appointment) -> Self {
        Self {
            id: appointment.id,
            client_id: appointment.client_id,
            consultation_type: appointment.consultation_type,
            category: appointment.category,
            scheduled_at: appointment.scheduled_at,
            status: appointment.status,
            priority: appointment.priority,
        }
    }
}

/// Reminder sent ahead of an appointment.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppointmentReminder {
    /// `24h` or `2h`
    pub reminder_type: ReminderWindow,
    /// Appointment ID
    pub appointment_id: AppointmentId,
    /// Client
    pub client_id: i64,
    /// Practitioner, if assigned
    pub practitioner_id: Option<i64>,
    /// Start time
    pub scheduled_at: DateTime<Utc>,
    /// Consultation type
    pub consultation_type: ConsultationType,
    /// Category
    pub category: Category,
}

impl AppointmentReminder {
    /// Reminder of `window` for `appointment`
    #[must_use]
    pub fn new(window: ReminderWindow, appointment: &Appointment) -> Self {
        Self {
            reminder_type: window,
            appointment_id: appointment.id,
            client_id: appointment.client_id,
            practitioner_id: appointment.practitioner_id,
            scheduled_at: appointment.scheduled_at,
            consultation_type: appointment.consultation_type,
            category: appointment.category,
        }
    }
}

/// Events published by the scheduling service.
///
/// The payload is the envelope's `data`; lifecycle events after creation
/// carry the full appointment (a reschedule includes `previousScheduledAt`).
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AppointmentEvent {
    /// `CITA_CREATED`
    Created(AppointmentCreated),
    /// `CITA_UPDATED`
    Updated(Box<Appointment>),
    /// `CITA_CANCELLED`
    Cancelled(Box<Appointment>),
    /// `CITA_RESCHEDULED`
    Rescheduled(Box<Appointment>),
    /// `CITA_REMINDER`
    Reminder(AppointmentReminder),
}

impl AppointmentEvent {
    /// Topic this event goes to
    #[must_use]
    pub const fn topic(&self) -> &'static str {
        match self {
            Self::Reminder(_) => NOTIFICATION_TOPIC,
            _ => APPOINTMENT_TOPIC,
        }
    }
}

impl Event for AppointmentEvent {
    fn event_type(&self) -> &'static str {
        match self {
            Self::Created(_) => "CITA_CREATED",
            Self::Updated(_) => "CITA_UPDATED",
            Self::Cancelled(_) => "CITA_CANCELLED",
            Self::Rescheduled(_) => "CITA_RESCHEDULED",
            Self::Reminder(_) => "CITA_REMINDER",
        }
    }

    fn routing_key(&self) -> &'static str {
        match self {
            Self::Created(_) => "cita.created",
            Self::Updated(_) => "cita.updated",
            Self::Cancelled(_) => "cita.cancelled",
            Self::Rescheduled(_) => "cita.rescheduled",
            Self::Reminder(_) => "cita.reminder",
        }
    }
}
