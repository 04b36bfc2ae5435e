//! In-memory appointment store for tests and local runs.
//!
//! A single mutex stands in for the advisory locks: a transaction holds it
//! from `begin` until commit or drop, and works on a copy that replaces the
//! shared map on commit.

use super::{AppointmentFilter, AppointmentRepository, BookingTx, Result, SortOrder, due_for_reminder};
use crate::types::{Appointment, AppointmentId, Page, Pagination, ReminderWindow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dentalbook_core::event::SerializedEvent;
use dentalbook_postgres::{LockScope, RepositoryError};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Clone, Debug, Default)]
struct Store {
    appointments: BTreeMap<AppointmentId, Appointment>,
    last_id: i64,
    outbox: Vec<(String, SerializedEvent)>,
}

impl Store {
    fn active_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        practitioner_id: Option<i64>,
    ) -> Vec<Appointment> {
        let mut found: Vec<Appointment> = self
            .appointments
            .values()
            .filter(|a| a.status.is_active() && a.scheduled_at >= from && a.scheduled_at < to)
            .filter(|a| practitioner_id.is_none_or(|id| a.practitioner_id == Some(id)))
            .cloned()
            .collect();
        found.sort_by_key(|a| a.scheduled_at);
        found
    }
}

/// [`AppointmentRepository`] backed by a `BTreeMap`.
#[derive(Clone, Debug, Default)]
pub struct InMemoryAppointmentRepository {
    store: Arc<Mutex<Store>>,
}

impl InMemoryAppointmentRepository {
    /// Empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an appointment directly, bypassing the engine.
    pub async fn seed(&self, appointment: Appointment) {
        let mut store = self.store.lock().await;
        store.last_id = store.last_id.max(appointment.id.get());
        store.appointments.insert(appointment.id, appointment);
    }

    /// Events written to the outbox, in order
    pub async fn outbox(&self) -> Vec<(String, SerializedEvent)> {
        self.store.lock().await.outbox.clone()
    }

    /// Every stored appointment
    pub async fn all(&self) -> Vec<Appointment> {
        self.store.lock().await.appointments.values().cloned().collect()
    }
}

#[async_trait]
impl AppointmentRepository for InMemoryAppointmentRepository {
    async fn begin(&self, scopes: &[LockScope]) -> Result<Box<dyn BookingTx>> {
        let guard = Arc::clone(&self.store).lock_owned().await;
        tracing::trace!(scopes = ?scopes, "In-memory booking transaction started");
        let working = (*guard).clone();
        Ok(Box::new(MemoryTx { guard, working }))
    }

    async fn find(&self, id: AppointmentId) -> Result<Option<Appointment>> {
        Ok(self.store.lock().await.appointments.get(&id).cloned())
    }

    async fn list(&self, filter: &AppointmentFilter) -> Result<Page<Appointment>> {
        let store = self.store.lock().await;
        let mut matching: Vec<Appointment> = store
            .appointments
            .values()
            .filter(|a| filter.matches(a))
            .cloned()
            .collect();
        matching.sort_by_key(|a| (a.scheduled_at, a.id));
        if filter.sort == SortOrder::Desc {
            matching.reverse();
        }

        let total = matching.len() as u64;
        let items = matching
            .into_iter()
            .skip(usize::try_from(filter.offset()).unwrap_or(usize::MAX))
            .take(filter.limit.max(1) as usize)
            .collect();
        Ok(Page {
            items,
            pagination: Pagination::new(filter.page, filter.limit, total),
        })
    }

    async fn active_between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<Appointment>> {
        Ok(self.store.lock().await.active_between(from, to, None))
    }

    async fn due_for_reminder(&self, window: ReminderWindow, now: DateTime<Utc>) -> Result<Vec<AppointmentId>> {
        let store = self.store.lock().await;
        Ok(store
            .appointments
            .values()
            .filter(|a| due_for_reminder(a, window, now))
            .map(|a| a.id)
            .collect())
    }

    async fn overdue(&self, before: DateTime<Utc>) -> Result<Vec<AppointmentId>> {
        let store = self.store.lock().await;
        Ok(store
            .appointments
            .values()
            .filter(|a| a.status.is_active() && a.scheduled_at < before)
            .map(|a| a.id)
            .collect())
    }

    async fn purge_cancelled(&self, before: DateTime<Utc>) -> Result<u64> {
        let mut store = self.store.lock().await;
        let count = store.appointments.len();
        store.appointments.retain(|_, a| {
            a.status != crate::types::AppointmentStatus::Cancelled || a.created_at >= before
        });
        Ok((count - store.appointments.len()) as u64)
    }

    async fn ping(&self) -> bool {
        true
    }
}

struct MemoryTx {
    guard: OwnedMutexGuard<Store>,
    working: Store,
}

#[async_trait]
impl BookingTx for MemoryTx {
    async fn next_id(&mut self) -> Result<AppointmentId> {
        self.working.last_id += 1;
        Ok(AppointmentId(self.working.last_id))
    }

    async fn load(&mut self, id: AppointmentId) -> Result<Option<Appointment>> {
        Ok(self.working.appointments.get(&id).cloned())
    }

    async fn active_between(
        &mut self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        practitioner_id: Option<i64>,
    ) -> Result<Vec<Appointment>> {
        Ok(self.working.active_between(from, to, practitioner_id))
    }

    async fn insert(&mut self, appointment: &Appointment) -> Result<()> {
        if self.working.appointments.contains_key(&appointment.id) {
            return Err(RepositoryError::UniqueViolation(format!(
                "appointment {} already exists",
                appointment.id
            )));
        }
        self.working.appointments.insert(appointment.id, appointment.clone());
        Ok(())
    }

    async fn update(&mut self, appointment: &Appointment) -> Result<()> {
        match self.working.appointments.get_mut(&appointment.id) {
            Some(stored) => {
                *stored = appointment.clone();
                Ok(())
            },
            None => Err(RepositoryError::Database(format!(
                "appointment {} does not exist",
                appointment.id
            ))),
        }
    }

    async fn enqueue(&mut self, topic: &str, event: &SerializedEvent) -> Result<()> {
        self.working.outbox.push((topic.to_string(), event.clone()));
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let Self { mut guard, working } = *self;
        *guard = working;
        Ok(())
    }
}
