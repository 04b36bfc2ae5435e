//! The scheduling engine: the imperative shell around [`AppointmentReducer`].
//!
//! One command runs as:
//!
//! 1. resolve remote users through the [`UserDirectory`] (outside any lock)
//! 2. open a [`BookingTx`] holding advisory locks on the calendar scopes
//! 3. load the appointment and the calendar slice the reducer checks
//! 4. reduce; a rejection drops the transaction
//! 5. persist, and in outbox mode write the published events in the same
//!    transaction
//! 6. commit, then run the remaining effects (publish, broadcast)
//!
//! Lock scopes are derived from a pre-read of the appointment. If the row
//! moved to another day or practitioner between the pre-read and the lock,
//! the command is retried with fresh scopes.

use crate::aggregates::{
    AppointmentAction, AppointmentEnvironment, AppointmentReducer, BookingRejection, BookingState,
    NewAppointment,
};
use crate::availability::{Slot, clinic_day, day_bounds, free_slots};
use crate::config::DeliveryMode;
use crate::directory::{DirectoryError, DirectoryUser, UserDirectory};
use crate::repository::{AppointmentFilter, AppointmentRepository, BookingTx};
use crate::types::{Appointment, AppointmentId, AppointmentStatus, Page, ReminderWindow};
use chrono::{DateTime, Months, NaiveDate, Utc};
use dentalbook_core::SmallVec;
use dentalbook_core::effect::Effect;
use dentalbook_core::event::SerializedEvent;
use dentalbook_core::reducer::Reducer;
use dentalbook_postgres::{LockScope, RepositoryError};
use dentalbook_runtime::EffectExecutor;
use std::sync::Arc;
use thiserror::Error;

/// Attempts before giving up on a row that keeps moving under us
const MAX_SCOPE_ATTEMPTS: usize = 3;

/// Errors from scheduling commands and queries.
#[derive(Debug, Error)]
pub enum SchedulingError {
    /// A booking rule refused the command
    #[error(transparent)]
    Rejected(#[from] BookingRejection),

    /// The referenced user exists in neither directory
    #[error("{kind} {id} not found")]
    UnknownUser {
        /// `Client` or `Practitioner`
        kind: &'static str,
        /// Global user id
        id: i64,
    },

    /// The profile service could not answer
    #[error(transparent)]
    Directory(#[from] DirectoryError),

    /// Storage failed
    #[error(transparent)]
    Storage(#[from] RepositoryError),

    /// The appointment kept changing while the command tried to lock it
    #[error("Appointment {0} changed concurrently, retry the request")]
    Contention(AppointmentId),
}

/// Result alias for scheduling operations
pub type Result<T> = std::result::Result<T, SchedulingError>;

/// Which slice of the calendar the reducer needs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum CalendarScope {
    None,
    Day(NaiveDate),
    PractitionerDay(NaiveDate, i64),
}

/// Everything needed to run one command against an existing appointment.
struct Plan {
    locks: Vec<LockScope>,
    calendar: CalendarScope,
    /// Row fields the locks were derived from
    expected: (DateTime<Utc>, Option<i64>),
}

/// Appointment commands, queries and sweeps.
#[derive(Clone)]
pub struct Scheduler {
    repository: Arc<dyn AppointmentRepository>,
    directory: Arc<dyn UserDirectory>,
    env: AppointmentEnvironment,
    reducer: AppointmentReducer,
    delivery: DeliveryMode,
    executor: EffectExecutor<AppointmentAction>,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("delivery", &self.delivery)
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    /// Wire the engine. Publish failures reported by the executor are fed
    /// back through the reducer, which logs them.
    #[must_use]
    pub fn new(
        repository: Arc<dyn AppointmentRepository>,
        directory: Arc<dyn UserDirectory>,
        env: AppointmentEnvironment,
        delivery: DeliveryMode,
    ) -> Self {
        let reducer = AppointmentReducer::new();
        let feedback_env = env.clone();
        let executor = EffectExecutor::new(move |action| {
            feed_back(action, &feedback_env);
        });
        Self {
            repository,
            directory,
            env,
            reducer,
            delivery,
            executor,
        }
    }

    /// Booking rules in force
    #[must_use]
    pub const fn clinic(&self) -> &crate::config::ClinicConfig {
        &self.env.clinic
    }

    /// Storage is reachable
    pub async fn storage_ready(&self) -> bool {
        self.repository.ping().await
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// One appointment.
    ///
    /// # Errors
    ///
    /// [`BookingRejection::NotFound`] if it does not exist, or a storage error.
    pub async fn find(&self, id: AppointmentId) -> Result<Appointment> {
        self.repository
            .find(id)
            .await?
            .ok_or(SchedulingError::Rejected(BookingRejection::NotFound))
    }

    /// Filtered listing.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub async fn list(&self, filter: &AppointmentFilter) -> Result<Page<Appointment>> {
        Ok(self.repository.list(filter).await?)
    }

    /// Free slots of the grid on a clinic-local `date`.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub async fn availability(&self, date: NaiveDate) -> Result<Vec<Slot>> {
        let (from, to) = day_bounds(date, &self.env.clinic);
        let booked = self.repository.active_between(from, to).await?;
        Ok(free_slots(date, &booked, &self.env.clinic))
    }

    // ========================================================================
    // Commands
    // ========================================================================

    /// Book a new appointment for `client_id`.
    ///
    /// # Errors
    ///
    /// A rejection, an unknown client, an unavailable directory or a storage error.
    pub async fn create(&self, request: NewAppointment, client_id: i64) -> Result<Appointment> {
        let client = self.resolve(client_id, "Client").await?;

        let date = clinic_day(request.scheduled_at, &self.env.clinic);
        let mut tx = self.repository.begin(&[LockScope::Day(date)]).await?;
        let calendar = Self::load_calendar(tx.as_mut(), CalendarScope::Day(date), &self.env).await?;
        let id = tx.next_id().await?;

        let mut state = BookingState::new_booking(calendar);
        let effects = self.decide(&mut state, AppointmentAction::Create { id, request, client })?;
        let appointment = state.appointment.ok_or(BookingRejection::NotFound)?;

        tx.insert(&appointment).await?;
        self.finish(tx, effects).await?;

        metrics::counter!("appointments_created_total").increment(1);
        tracing::info!(
            appointment_id = %appointment.id,
            client_id = appointment.client_id,
            scheduled_at = %appointment.scheduled_at,
            "Appointment booked"
        );
        Ok(appointment)
    }

    /// Bind a practitioner and confirm.
    ///
    /// # Errors
    ///
    /// A rejection, an unknown practitioner, an unavailable directory or a storage error.
    pub async fn assign(
        &self,
        id: AppointmentId,
        practitioner_id: i64,
        observations: Option<String>,
    ) -> Result<Appointment> {
        let practitioner = self.resolve(practitioner_id, "Practitioner").await?;
        let clinic = self.env.clinic.clone();
        self.command(
            id,
            |current| {
                let date = clinic_day(current.scheduled_at, &clinic);
                Plan {
                    locks: vec![LockScope::PractitionerDay(date, practitioner_id)],
                    calendar: CalendarScope::PractitionerDay(date, practitioner_id),
                    expected: (current.scheduled_at, current.practitioner_id),
                }
            },
            || AppointmentAction::AssignPractitioner {
                practitioner: practitioner.clone(),
                observations: observations.clone(),
            },
        )
        .await
    }

    /// Move an appointment to `new_time`.
    ///
    /// # Errors
    ///
    /// A rejection or a storage error.
    pub async fn reschedule(
        &self,
        id: AppointmentId,
        new_time: DateTime<Utc>,
        reason: Option<String>,
        by_client: bool,
    ) -> Result<Appointment> {
        let date = clinic_day(new_time, &self.env.clinic);
        self.command(
            id,
            |current| {
                let mut locks = vec![LockScope::Day(date)];
                if let Some(practitioner) = current.practitioner_id {
                    locks.push(LockScope::PractitionerDay(date, practitioner));
                }
                Plan {
                    locks,
                    calendar: CalendarScope::Day(date),
                    expected: (current.scheduled_at, current.practitioner_id),
                }
            },
            || AppointmentAction::Reschedule {
                new_time,
                reason: reason.clone(),
                by_client,
            },
        )
        .await
    }

    /// Cancel an appointment. Client contact details for the staff notice
    /// are looked up best-effort.
    ///
    /// # Errors
    ///
    /// A rejection or a storage error.
    pub async fn cancel(
        &self,
        id: AppointmentId,
        reason: Option<String>,
        by_client: bool,
    ) -> Result<Appointment> {
        let current = self.find(id).await?;
        let client = match self.directory.find_user(current.client_id).await {
            Ok(client) => client,
            Err(error) => {
                tracing::warn!(client_id = current.client_id, error = %error, "Cancelling without client contact details");
                None
            },
        };

        self.command(id, Self::row_only, || AppointmentAction::Cancel {
            reason: reason.clone(),
            by_client,
            client: client.clone(),
        })
        .await
    }

    /// Move along the transition table.
    ///
    /// # Errors
    ///
    /// A rejection or a storage error.
    pub async fn update_status(
        &self,
        id: AppointmentId,
        status: AppointmentStatus,
        notes: Option<String>,
    ) -> Result<Appointment> {
        self.command(id, Self::row_only, || AppointmentAction::UpdateStatus {
            status,
            notes: notes.clone(),
        })
        .await
    }

    /// Mark an overdue appointment as a no-show.
    ///
    /// # Errors
    ///
    /// A rejection or a storage error.
    pub async fn mark_no_show(&self, id: AppointmentId) -> Result<Appointment> {
        self.command(id, Self::row_only, || AppointmentAction::MarkNoShow).await
    }

    /// Send one reminder. Returns the appointment as stored afterwards.
    ///
    /// # Errors
    ///
    /// A rejection or a storage error.
    pub async fn send_reminder(&self, id: AppointmentId, window: ReminderWindow) -> Result<Appointment> {
        self.command(id, Self::row_only, || AppointmentAction::SendReminder { window }).await
    }

    // ========================================================================
    // Sweeps
    // ========================================================================

    /// Send every reminder due in `window`; returns how many went out.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the due list cannot be read. Failures on
    /// single appointments are logged and skipped.
    pub async fn send_due_reminders(&self, window: ReminderWindow) -> Result<usize> {
        let now = self.env.clock.now();
        let due = self.repository.due_for_reminder(window, now).await?;

        let mut sent = 0;
        for id in due {
            match self.send_reminder(id, window).await {
                Ok(_) => {
                    sent += 1;
                    metrics::counter!("reminders_published_total", "window" => window.as_str())
                        .increment(1);
                },
                Err(error) => {
                    tracing::warn!(appointment_id = %id, window = window.as_str(), error = %error, "Reminder skipped");
                },
            }
        }
        Ok(sent)
    }

    /// Mark active appointments that started more than `overdue_after` ago
    /// as no-shows; returns how many changed.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the overdue list cannot be read.
    pub async fn expire_overdue(&self, overdue_after: chrono::Duration) -> Result<usize> {
        let cutoff = self.env.clock.now() - overdue_after;
        let overdue = self.repository.overdue(cutoff).await?;

        let mut expired = 0;
        for id in overdue {
            match self.mark_no_show(id).await {
                Ok(_) => {
                    expired += 1;
                    metrics::counter!("appointments_expired_total").increment(1);
                    tracing::info!(appointment_id = %id, "Overdue appointment marked no-show");
                },
                Err(error) => {
                    tracing::warn!(appointment_id = %id, error = %error, "Could not expire appointment");
                },
            }
        }
        Ok(expired)
    }

    /// Hard-delete cancelled appointments created more than
    /// `retention_months` calendar months ago.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub async fn purge_cancelled(&self, retention_months: u32) -> Result<u64> {
        let now = self.env.clock.now();
        let cutoff = now.checked_sub_months(Months::new(retention_months)).unwrap_or(now);
        let purged = self.repository.purge_cancelled(cutoff).await?;
        metrics::counter!("appointments_purged_total").increment(purged);
        if purged > 0 {
            tracing::info!(purged, cutoff = %cutoff, "Old cancelled appointments deleted");
        }
        Ok(purged)
    }

    // ========================================================================
    // Pipeline
    // ========================================================================

    fn row_only(current: &Appointment) -> Plan {
        Plan {
            locks: Vec::new(),
            calendar: CalendarScope::None,
            expected: (current.scheduled_at, current.practitioner_id),
        }
    }

    async fn resolve(&self, id: i64, kind: &'static str) -> Result<DirectoryUser> {
        self.directory
            .find_user(id)
            .await?
            .ok_or(SchedulingError::UnknownUser { kind, id })
    }

    async fn command(
        &self,
        id: AppointmentId,
        plan_for: impl Fn(&Appointment) -> Plan + Send + Sync,
        action: impl Fn() -> AppointmentAction + Send + Sync,
    ) -> Result<Appointment> {
        for attempt in 1..=MAX_SCOPE_ATTEMPTS {
            let current = self.find(id).await?;
            let plan = plan_for(&current);

            let mut tx = self.repository.begin(&plan.locks).await?;
            let Some(locked) = tx.load(id).await? else {
                return Err(BookingRejection::NotFound.into());
            };
            if (locked.scheduled_at, locked.practitioner_id) != plan.expected {
                tracing::debug!(appointment_id = %id, attempt, "Appointment moved before lock, retrying");
                continue;
            }

            let calendar = Self::load_calendar(tx.as_mut(), plan.calendar, &self.env).await?;
            let before = locked.clone();
            let mut state = BookingState::existing(locked, calendar);
            let effects = self.decide(&mut state, action())?;
            let after = state.appointment.ok_or(BookingRejection::NotFound)?;

            if after != before {
                tx.update(&after).await?;
            }
            self.finish(tx, effects).await?;

            if after.status != before.status {
                metrics::counter!("appointment_transitions_total", "to" => after.status.as_str())
                    .increment(1);
                tracing::info!(
                    appointment_id = %id,
                    from = before.status.as_str(),
                    to = after.status.as_str(),
                    "Appointment status changed"
                );
            }
            return Ok(after);
        }
        Err(SchedulingError::Contention(id))
    }

    async fn load_calendar(
        tx: &mut dyn BookingTx,
        scope: CalendarScope,
        env: &AppointmentEnvironment,
    ) -> Result<Vec<Appointment>> {
        let calendar = match scope {
            CalendarScope::None => Vec::new(),
            CalendarScope::Day(date) => {
                let (from, to) = day_bounds(date, &env.clinic);
                tx.active_between(from, to, None).await?
            },
            CalendarScope::PractitionerDay(date, practitioner) => {
                let (from, to) = day_bounds(date, &env.clinic);
                tx.active_between(from, to, Some(practitioner)).await?
            },
        };
        Ok(calendar)
    }

    fn decide(
        &self,
        state: &mut BookingState,
        action: AppointmentAction,
    ) -> Result<SmallVec<[Effect<AppointmentAction>; 4]>> {
        let effects = self.reducer.reduce(state, action, &self.env);
        match state.rejection.take() {
            Some(rejection) => {
                metrics::counter!("appointments_rejected_total", "reason" => rejection.code())
                    .increment(1);
                if rejection.is_conflict() {
                    metrics::counter!("appointment_conflicts_total").increment(1);
                }
                tracing::debug!(reason = rejection.code(), "Booking command rejected");
                Err(rejection.into())
            },
            None => Ok(effects),
        }
    }

    /// Commit, then run what is left of `effects`.
    async fn finish(
        &self,
        mut tx: Box<dyn BookingTx>,
        effects: SmallVec<[Effect<AppointmentAction>; 4]>,
    ) -> Result<()> {
        let effects: Vec<Effect<AppointmentAction>> = match self.delivery {
            DeliveryMode::Direct => effects.into_iter().collect(),
            DeliveryMode::Outbox => {
                let events: Vec<(String, SerializedEvent)> = effects
                    .iter()
                    .flat_map(Effect::published_events)
                    .map(|(topic, event)| (topic.to_string(), event.clone()))
                    .collect();
                for (topic, event) in &events {
                    tx.enqueue(topic, event).await?;
                }
                effects.into_iter().map(without_publishes).collect()
            },
        };

        tx.commit().await?;
        self.executor.run(effects).await;
        Ok(())
    }
}

/// Replace every publish in the tree with a no-op; the outbox owns them.
fn without_publishes<A>(effect: Effect<A>) -> Effect<A> {
    match effect {
        Effect::PublishEvent(_) => Effect::None,
        Effect::Parallel(effects) => Effect::Parallel(effects.into_iter().map(without_publishes).collect()),
        Effect::Sequential(effects) => {
            Effect::Sequential(effects.into_iter().map(without_publishes).collect())
        },
        other => other,
    }
}

/// Settle an action the executor fed back. Returns the rejection, if the
/// reducer refused it, after logging it.
fn feed_back(action: AppointmentAction, env: &AppointmentEnvironment) -> Option<BookingRejection> {
    let mut state = BookingState::default();
    let effects = AppointmentReducer::new().reduce(&mut state, action, env);
    if !effects.is_empty() {
        tracing::warn!(count = effects.len(), "Dropping effects of a fed-back appointment action");
    }
    if let Some(rejection) = &state.rejection {
        tracing::warn!(reason = rejection.code(), "Fed-back appointment action was rejected");
    }
    state.rejection
}
