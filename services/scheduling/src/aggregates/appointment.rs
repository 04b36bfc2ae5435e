//! Appointment aggregate for the dental clinic.
//!
//! The reducer owns every booking rule: the category whitelist, the future
//! start requirement, the client lead time, the occupancy overlap test and
//! the status transition table. It never touches storage. The engine loads
//! the appointment and the relevant part of the calendar into
//! [`BookingState`] under an advisory lock, reduces one action, persists the
//! result, and only then runs the returned effects.
//!
//! ## Calendar scope per action
//!
//! | Action | `calendar` holds |
//! |---|---|
//! | `Create`, `Reschedule` | active appointments on the target clinic day |
//! | `AssignPractitioner` | the practitioner's active appointments on that day |
//! | others | nothing |

use crate::availability::{Window, clinic_day, find_conflict};
use crate::config::{ClinicConfig, LeadTimePolicy};
use crate::directory::DirectoryUser;
use crate::events::{AppointmentCreated, AppointmentEvent, AppointmentReminder};
use crate::types::{
    Appointment, AppointmentId, AppointmentStatus, Category, ConsultationType, Money, Priority,
    ReminderWindow,
};
use chrono::{DateTime, Utc};
use dentalbook_auth::Role;
use dentalbook_core::event::Event;
use dentalbook_core::event_bus::EventBus;
use dentalbook_core::{
    SmallVec, async_effect, effect::Effect, environment::Clock, publish_event, reducer::Reducer,
    smallvec,
};
use dentalbook_web::{Room, RoomBroadcaster};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use thiserror::Error;

/// Default appointment length in minutes
pub const DEFAULT_DURATION_MINUTES: i32 = 60;

/// Accepted appointment lengths in minutes
const DURATION_RANGE: std::ops::RangeInclusive<i32> = 15..=480;

// ============================================================================
// State
// ============================================================================

/// Everything one booking decision looks at.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BookingState {
    /// The appointment being acted on (`None` before `Create`)
    pub appointment: Option<Appointment>,
    /// Other appointments that may conflict (see module docs)
    pub calendar: Vec<Appointment>,
    /// Why the last action was refused
    pub rejection: Option<BookingRejection>,
}

impl BookingState {
    /// State for an action on an existing appointment.
    #[must_use]
    pub const fn existing(appointment: Appointment, calendar: Vec<Appointment>) -> Self {
        Self {
            appointment: Some(appointment),
            calendar,
            rejection: None,
        }
    }

    /// State for a new booking against `calendar`.
    #[must_use]
    pub const fn new_booking(calendar: Vec<Appointment>) -> Self {
        Self {
            appointment: None,
            calendar,
            rejection: None,
        }
    }
}

/// Reasons a booking action is refused.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum BookingRejection {
    /// No such appointment
    #[error("Appointment not found")]
    NotFound,

    /// Start time is now or in the past
    #[error("The appointment time must be in the future")]
    NotInFuture,

    /// Category is not offered under the consultation type
    #[error("Category '{category}' is not valid for consultation type '{consultation_type}'")]
    InvalidCategory {
        /// Requested category
        category: Category,
        /// Requested consultation type
        consultation_type: ConsultationType,
    },

    /// Client has not completed their profile
    #[error("The client must complete their profile before booking")]
    ProfileIncomplete,

    /// Referenced user is not a client
    #[error("User {0} is not a client")]
    NotAClient(i64),

    /// Referenced user is deactivated
    #[error("User {0} is inactive")]
    AccountInactive(i64),

    /// Another appointment already occupies the window
    #[error("The selected time slot is not available")]
    SlotTaken {
        /// The conflicting appointment
        conflicting: AppointmentId,
    },

    /// The practitioner is booked in an overlapping window
    #[error("The practitioner already has an appointment at that time")]
    PractitionerBusy {
        /// The conflicting appointment
        conflicting: AppointmentId,
    },

    /// Referenced user is not an active practitioner
    #[error("User {0} is not an active practitioner")]
    NotAPractitioner(i64),

    /// Operation not allowed in the current status
    #[error("Cannot {operation} an appointment that is {status}")]
    InvalidState {
        /// Attempted operation
        operation: &'static str,
        /// Current status
        status: AppointmentStatus,
    },

    /// Status change outside the transition table
    #[error("Invalid status transition from {from} to {to}")]
    InvalidTransition {
        /// Current status
        from: AppointmentStatus,
        /// Requested status
        to: AppointmentStatus,
    },

    /// Client acted inside the lead time
    #[error("Appointments can only be {operation} at least {hours} hours in advance")]
    TooLate {
        /// `rescheduled` or `cancelled`
        operation: &'static str,
        /// Required notice in hours
        hours: i64,
    },

    /// Duration outside the accepted range
    #[error("Duration must be between 15 and 480 minutes, got {0}")]
    InvalidDuration(i32),
}

impl BookingRejection {
    /// Machine-readable reason, used as error code and metric label.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::NotFound => "NOT_FOUND",
            Self::NotInFuture => "NOT_IN_FUTURE",
            Self::InvalidCategory { .. } => "INVALID_CATEGORY",
            Self::ProfileIncomplete => "PROFILE_INCOMPLETE",
            Self::NotAClient(_) => "NOT_A_CLIENT",
            Self::AccountInactive(_) => "ACCOUNT_INACTIVE",
            Self::SlotTaken { .. } => "SLOT_TAKEN",
            Self::PractitionerBusy { .. } => "PRACTITIONER_BUSY",
            Self::NotAPractitioner(_) => "NOT_A_PRACTITIONER",
            Self::InvalidState { .. } => "INVALID_STATE",
            Self::InvalidTransition { .. } => "INVALID_TRANSITION",
            Self::TooLate { .. } => "TOO_LATE",
            Self::InvalidDuration(_) => "INVALID_DURATION",
        }
    }

    /// Whether the refusal is an occupancy conflict
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::SlotTaken { .. } | Self::PractitionerBusy { .. })
    }
}

// ============================================================================
// Actions
// ============================================================================

/// Booking request as accepted from the API.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAppointment {
    /// Client to book for; staff only, clients always book for themselves
    #[serde(default)]
    pub client_id: Option<i64>,
    /// Consultation type
    pub consultation_type: ConsultationType,
    /// Category, must belong to the consultation type
    pub category: Category,
    /// Requested start
    pub scheduled_at: DateTime<Utc>,
    /// Free text
    #[serde(default)]
    pub details: Option<String>,
    /// Length in minutes (default 60)
    #[serde(default)]
    pub duration_minutes: Option<i32>,
    /// Priority (default medium)
    #[serde(default)]
    pub priority: Option<Priority>,
    /// Estimated cost
    #[serde(default)]
    pub estimated_cost: Option<Money>,
}

/// Inputs to the appointment reducer.
#[derive(Clone, Debug)]
pub enum AppointmentAction {
    /// Book a new appointment
    Create {
        /// Pre-allocated id
        id: AppointmentId,
        /// What was asked for
        request: NewAppointment,
        /// The resolved client
        client: DirectoryUser,
    },

    /// Bind a practitioner and confirm
    AssignPractitioner {
        /// The resolved practitioner
        practitioner: DirectoryUser,
        /// Front-desk notes
        observations: Option<String>,
    },

    /// Move to a new start time
    Reschedule {
        /// Requested start
        new_time: DateTime<Utc>,
        /// Why
        reason: Option<String>,
        /// Requested by the owning client (lead time applies)
        by_client: bool,
    },

    /// Cancel
    Cancel {
        /// Why
        reason: Option<String>,
        /// Requested by the owning client (lead time applies)
        by_client: bool,
        /// Client contact details for the staff notice, if known
        client: Option<DirectoryUser>,
    },

    /// Move along the transition table
    UpdateStatus {
        /// Requested status
        status: AppointmentStatus,
        /// Practitioner notes
        notes: Option<String>,
    },

    /// Overdue sweep: the client never came
    MarkNoShow,

    /// Reminder sweep
    SendReminder {
        /// Which reminder
        window: ReminderWindow,
    },

    /// Feedback from a failed publish; the state change stands
    PublishFailed {
        /// Event that was lost
        event_type: String,
        /// Bus error
        reason: String,
    },
}

// ============================================================================
// Environment
// ============================================================================

/// Dependencies of the appointment reducer
#[derive(Clone)]
pub struct AppointmentEnvironment {
    /// Clock for timestamps and lead-time checks
    pub clock: Arc<dyn Clock>,
    /// Bus for domain events
    pub event_bus: Arc<dyn EventBus>,
    /// Real-time rooms
    pub rooms: RoomBroadcaster,
    /// Booking rules
    pub clinic: ClinicConfig,
}

impl AppointmentEnvironment {
    /// Creates a new `AppointmentEnvironment`
    #[must_use]
    pub const fn new(
        clock: Arc<dyn Clock>,
        event_bus: Arc<dyn EventBus>,
        rooms: RoomBroadcaster,
        clinic: ClinicConfig,
    ) -> Self {
        Self {
            clock,
            event_bus,
            rooms,
            clinic,
        }
    }
}

// ============================================================================
// Reducer
// ============================================================================

type Effects = SmallVec<[Effect<AppointmentAction>; 4]>;

/// Real-time notice: room, event name, payload
type Notice = (Room, &'static str, Value);

/// Reducer for the appointment aggregate
#[derive(Clone, Debug)]
pub struct AppointmentReducer;

impl AppointmentReducer {
    /// Creates a new `AppointmentReducer`
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn reject(state: &mut BookingState, rejection: BookingRejection) -> Effects {
        state.rejection = Some(rejection);
        SmallVec::new()
    }

    fn require_active(
        appointment: &Appointment,
        operation: &'static str,
    ) -> Result<(), BookingRejection> {
        if appointment.status.is_active() {
            Ok(())
        } else {
            Err(BookingRejection::InvalidState {
                operation,
                status: appointment.status,
            })
        }
    }

    /// `reference - now >= lead_time`
    fn check_lead_time(
        reference: DateTime<Utc>,
        now: DateTime<Utc>,
        clinic: &ClinicConfig,
        operation: &'static str,
    ) -> Result<(), BookingRejection> {
        if reference - now >= clinic.lead_time {
            Ok(())
        } else {
            Err(BookingRejection::TooLate {
                operation,
                hours: clinic.lead_time.num_hours(),
            })
        }
    }

    fn validate_create(
        state: &BookingState,
        request: &NewAppointment,
        client: &DirectoryUser,
        env: &AppointmentEnvironment,
    ) -> Result<i32, BookingRejection> {
        if client.role != Role::Client {
            return Err(BookingRejection::NotAClient(client.id));
        }
        if !client.active {
            return Err(BookingRejection::AccountInactive(client.id));
        }
        if !client.profile_complete {
            return Err(BookingRejection::ProfileIncomplete);
        }
        if !request.category.is_allowed_for(request.consultation_type) {
            return Err(BookingRejection::InvalidCategory {
                category: request.category,
                consultation_type: request.consultation_type,
            });
        }
        if request.scheduled_at <= env.clock.now() {
            return Err(BookingRejection::NotInFuture);
        }

        let duration = request.duration_minutes.unwrap_or(DEFAULT_DURATION_MINUTES);
        if !DURATION_RANGE.contains(&duration) {
            return Err(BookingRejection::InvalidDuration(duration));
        }

        let window = Window::occupied(request.scheduled_at, duration, &env.clinic);
        if let Some(existing) = find_conflict(&window, &state.calendar, None, &env.clinic) {
            return Err(BookingRejection::SlotTaken {
                conflicting: existing.id,
            });
        }
        Ok(duration)
    }

    fn validate_reschedule(
        calendar: &[Appointment],
        appointment: &Appointment,
        new_time: DateTime<Utc>,
        by_client: bool,
        env: &AppointmentEnvironment,
    ) -> Result<(), BookingRejection> {
        Self::require_active(appointment, "reschedule")?;

        let now = env.clock.now();
        if new_time <= now {
            return Err(BookingRejection::NotInFuture);
        }

        if by_client {
            let clinic = &env.clinic;
            match clinic.lead_time_policy {
                LeadTimePolicy::OriginalTime => {
                    Self::check_lead_time(appointment.scheduled_at, now, clinic, "rescheduled")?;
                },
                LeadTimePolicy::TargetTime => {
                    Self::check_lead_time(new_time, now, clinic, "rescheduled")?;
                },
                LeadTimePolicy::Both => {
                    Self::check_lead_time(appointment.scheduled_at, now, clinic, "rescheduled")?;
                    Self::check_lead_time(new_time, now, clinic, "rescheduled")?;
                },
            }
        }

        let window = Window::occupied(new_time, appointment.duration_minutes, &env.clinic);
        if let Some(existing) =
            find_conflict(&window, calendar, Some(appointment.id), &env.clinic)
        {
            return Err(BookingRejection::SlotTaken {
                conflicting: existing.id,
            });
        }
        Ok(())
    }

    fn publish(event: &AppointmentEvent, env: &AppointmentEnvironment) -> Effect<AppointmentAction> {
        match event.to_serialized(env.clock.now()) {
            Ok(serialized) => {
                let event_type = serialized.event_type.clone();
                publish_event! {
                    bus: env.event_bus,
                    topic: event.topic(),
                    event: serialized,
                    on_success: || None,
                    on_error: |error| Some(AppointmentAction::PublishFailed {
                        event_type,
                        reason: error.to_string(),
                    })
                }
            },
            Err(error) => {
                tracing::error!(event_type = event.event_type(), error = %error, "Failed to encode event");
                Effect::None
            },
        }
    }

    fn broadcast(notices: Vec<Notice>, env: &AppointmentEnvironment) -> Effect<AppointmentAction> {
        let rooms = env.rooms.clone();
        let now = env.clock.now();
        async_effect! {
            for (room, event, payload) in notices {
                rooms.emit(&room, event, payload, now).await;
            }
            None
        }
    }

    fn day_room(at: DateTime<Utc>, clinic: &ClinicConfig) -> Room {
        Room::Date(clinic_day(at, clinic))
    }

    fn snapshot(appointment: &Appointment) -> Value {
        serde_json::to_value(appointment).unwrap_or(Value::Null)
    }

    /// Client, staff and (if assigned) practitioner rooms, all with `event`.
    fn audience(appointment: &Appointment, event: &'static str, payload: &Value) -> Vec<Notice> {
        let mut notices = vec![
            (Room::Client(appointment.client_id), event, payload.clone()),
            (Room::Staff, event, payload.clone()),
        ];
        if let Some(practitioner) = appointment.practitioner_id {
            notices.push((Room::Practitioner(practitioner), event, payload.clone()));
        }
        notices
    }

    fn availability_changed(at: DateTime<Utc>, clinic: &ClinicConfig) -> Notice {
        let date = clinic_day(at, clinic);
        (
            Room::Date(date),
            "horarios_updated",
            json!({ "date": date.format("%Y-%m-%d").to_string() }),
        )
    }

    #[allow(clippy::too_many_lines)]
    fn apply(
        state: &mut BookingState,
        action: AppointmentAction,
        env: &AppointmentEnvironment,
    ) -> Result<Effects, BookingRejection> {
        let now = env.clock.now();

        if let AppointmentAction::Create { id, request, client } = action {
            let duration_minutes = Self::validate_create(state, &request, &client, env)?;
            let appointment = Appointment {
                id,
                client_id: client.id,
                practitioner_id: None,
                consultation_type: request.consultation_type,
                category: request.category,
                scheduled_at: request.scheduled_at,
                duration_minutes,
                details: request.details,
                status: AppointmentStatus::Pending,
                priority: request.priority.unwrap_or_default(),
                cancellation_reason: None,
                cancelled_at: None,
                previous_scheduled_at: None,
                reschedule_reason: None,
                rescheduled_at: None,
                observations: None,
                assigned_at: None,
                practitioner_notes: None,
                reminder_sent: false,
                reminder_sent_at: None,
                estimated_cost: request.estimated_cost,
                created_at: now,
                updated_at: now,
            };

            let payload = Self::snapshot(&appointment);
            let effects = smallvec![
                Self::publish(&AppointmentEvent::Created(AppointmentCreated::from(&appointment)), env),
                Self::broadcast(
                    vec![
                        Self::availability_changed(appointment.scheduled_at, &env.clinic),
                        (Room::Staff, "nueva_cita", payload),
                    ],
                    env,
                ),
            ];
            state.calendar.push(appointment.clone());
            state.appointment = Some(appointment);
            return Ok(effects);
        }

        if let AppointmentAction::PublishFailed { event_type, reason } = action {
            tracing::warn!(event_type = %event_type, reason = %reason, "Appointment event was not published");
            return Ok(SmallVec::new());
        }

        let Some(appointment) = state.appointment.as_mut() else {
            return Err(BookingRejection::NotFound);
        };

        match action {
            AppointmentAction::AssignPractitioner {
                practitioner,
                observations,
            } => {
                if appointment.status != AppointmentStatus::Pending {
                    return Err(BookingRejection::InvalidState {
                        operation: "assign",
                        status: appointment.status,
                    });
                }
                if practitioner.role != Role::Practitioner || !practitioner.active {
                    return Err(BookingRejection::NotAPractitioner(practitioner.id));
                }
                let window = Window::of(appointment, &env.clinic);
                if let Some(existing) =
                    find_conflict(&window, &state.calendar, Some(appointment.id), &env.clinic)
                {
                    return Err(BookingRejection::PractitionerBusy {
                        conflicting: existing.id,
                    });
                }

                appointment.practitioner_id = Some(practitioner.id);
                appointment.status = AppointmentStatus::Confirmed;
                appointment.assigned_at = Some(now);
                appointment.observations = observations;
                appointment.updated_at = now;

                let payload = Self::snapshot(appointment);
                Ok(smallvec![
                    Self::publish(&AppointmentEvent::Updated(Box::new(appointment.clone())), env),
                    Self::broadcast(Self::audience(appointment, "cita_asignada", &payload), env),
                ])
            },

            AppointmentAction::Reschedule {
                new_time,
                reason,
                by_client,
            } => {
                Self::validate_reschedule(&state.calendar, appointment, new_time, by_client, env)?;

                let vacated = appointment.scheduled_at;
                appointment.previous_scheduled_at = Some(vacated);
                appointment.scheduled_at = new_time;
                appointment.reschedule_reason = reason;
                appointment.rescheduled_at = Some(now);
                appointment.reminder_sent = false;
                appointment.reminder_sent_at = None;
                appointment.updated_at = now;

                let payload = Self::snapshot(appointment);
                let mut notices = vec![Self::availability_changed(vacated, &env.clinic)];
                if Self::day_room(vacated, &env.clinic) != Self::day_room(new_time, &env.clinic) {
                    notices.push(Self::availability_changed(new_time, &env.clinic));
                }
                notices.extend(Self::audience(appointment, "cita_actualizada", &payload));

                Ok(smallvec![
                    Self::publish(&AppointmentEvent::Rescheduled(Box::new(appointment.clone())), env),
                    Self::broadcast(notices, env),
                ])
            },

            AppointmentAction::Cancel {
                reason,
                by_client,
                client,
            } => {
                Self::require_active(appointment, "cancel")?;
                if by_client {
                    Self::check_lead_time(appointment.scheduled_at, now, &env.clinic, "cancelled")?;
                }

                appointment.status = AppointmentStatus::Cancelled;
                appointment.cancellation_reason = reason;
                appointment.cancelled_at = Some(now);
                appointment.updated_at = now;

                let contact = client.map_or(Value::Null, |client| {
                    json!({
                        "id": client.id,
                        "name": client.name,
                        "surname": client.surname,
                        "email": client.email,
                        "phone": client.phone,
                    })
                });
                let payload = json!({ "appointment": Self::snapshot(appointment), "client": contact });

                let mut notices = vec![Self::availability_changed(appointment.scheduled_at, &env.clinic)];
                notices.extend(Self::audience(appointment, "cita_cancelada", &payload));

                Ok(smallvec![
                    Self::publish(&AppointmentEvent::Cancelled(Box::new(appointment.clone())), env),
                    Self::broadcast(notices, env),
                ])
            },

            AppointmentAction::UpdateStatus { status, notes } => {
                if !appointment.status.can_transition_to(status) {
                    return Err(BookingRejection::InvalidTransition {
                        from: appointment.status,
                        to: status,
                    });
                }

                appointment.status = status;
                if status == AppointmentStatus::Cancelled {
                    appointment.cancelled_at = Some(now);
                }
                if notes.is_some() {
                    appointment.practitioner_notes = notes;
                }
                appointment.updated_at = now;

                let payload = Self::snapshot(appointment);
                let mut notices = Self::audience(appointment, "cita_actualizada", &payload);
                if status.is_terminal() {
                    notices.push(Self::availability_changed(appointment.scheduled_at, &env.clinic));
                }

                let event = if status == AppointmentStatus::Cancelled {
                    AppointmentEvent::Cancelled(Box::new(appointment.clone()))
                } else {
                    AppointmentEvent::Updated(Box::new(appointment.clone()))
                };
                Ok(smallvec![Self::publish(&event, env), Self::broadcast(notices, env)])
            },

            AppointmentAction::MarkNoShow => {
                Self::require_active(appointment, "mark as no-show")?;

                appointment.status = AppointmentStatus::NoShow;
                appointment.updated_at = now;

                let payload = Self::snapshot(appointment);
                Ok(smallvec![
                    Self::publish(&AppointmentEvent::Updated(Box::new(appointment.clone())), env),
                    Self::broadcast(
                        vec![
                            (Room::Staff, "cita_actualizada", payload),
                            Self::availability_changed(appointment.scheduled_at, &env.clinic),
                        ],
                        env,
                    ),
                ])
            },

            AppointmentAction::SendReminder { window } => {
                Self::require_active(appointment, "remind")?;

                if window == ReminderWindow::DayBefore {
                    if appointment.reminder_sent {
                        return Ok(SmallVec::new());
                    }
                    appointment.reminder_sent = true;
                    appointment.reminder_sent_at = Some(now);
                    appointment.updated_at = now;
                }

                let reminder = AppointmentReminder::new(window, appointment);
                let payload = json!({
                    "type": "reminder",
                    "reminderType": window.as_str(),
                    "appointment": Self::snapshot(appointment),
                });
                Ok(smallvec![
                    Self::publish(&AppointmentEvent::Reminder(reminder), env),
                    Self::broadcast(
                        vec![(Room::Client(appointment.client_id), "notification", payload)],
                        env,
                    ),
                ])
            },

            AppointmentAction::Create { .. } | AppointmentAction::PublishFailed { .. } => {
                Ok(SmallVec::new())
            },
        }
    }
}

impl Default for AppointmentReducer {
    fn default() -> Self {
        Self::new()
    }
}

impl Reducer for AppointmentReducer {
    type State = BookingState;
    type Action = AppointmentAction;
    type Environment = AppointmentEnvironment;

    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> SmallVec<[Effect<Self::Action>; 4]> {
        state.rejection = None;
        match Self::apply(state, action, env) {
            Ok(effects) => effects,
            Err(rejection) => Self::reject(state, rejection),
        }
    }
}
