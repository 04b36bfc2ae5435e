//! `PostgreSQL` appointment repository.

use super::{AppointmentFilter, AppointmentRepository, BookingTx, Result, SortOrder};
use crate::types::{Appointment, AppointmentId, Money, Page, Pagination, ReminderWindow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dentalbook_core::event::SerializedEvent;
use dentalbook_postgres::{LockScope, Outbox, RepositoryError, advisory_xact_lock};
use sqlx::{PgPool, Postgres, QueryBuilder, Transaction};

const COLUMNS: &str = "id, client_id, practitioner_id, consultation_type, category, scheduled_at, \
     duration_minutes, details, status, priority, cancellation_reason, cancelled_at, \
     previous_scheduled_at, reschedule_reason, rescheduled_at, observations, assigned_at, \
     practitioner_notes, reminder_sent, reminder_sent_at, estimated_cost_cents, created_at, updated_at";

#[derive(sqlx::FromRow)]
struct AppointmentRow {
    id: i64,
    client_id: i64,
    practitioner_id: Option<i64>,
    consultation_type: String,
    category: String,
    scheduled_at: DateTime<Utc>,
    duration_minutes: i32,
    details: Option<String>,
    status: String,
    priority: String,
    cancellation_reason: Option<String>,
    cancelled_at: Option<DateTime<Utc>>,
    previous_scheduled_at: Option<DateTime<Utc>>,
    reschedule_reason: Option<String>,
    rescheduled_at: Option<DateTime<Utc>>,
    observations: Option<String>,
    assigned_at: Option<DateTime<Utc>>,
    practitioner_notes: Option<String>,
    reminder_sent: bool,
    reminder_sent_at: Option<DateTime<Utc>>,
    estimated_cost_cents: Option<i64>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<AppointmentRow> for Appointment {
    type Error = RepositoryError;

    fn try_from(row: AppointmentRow) -> std::result::Result<Self, Self::Error> {
        let corrupt = |e: crate::types::ParseEnumError| {
            RepositoryError::Corrupt(format!("appointment {}: {e}", row.id))
        };
        Ok(Self {
            id: AppointmentId(row.id),
            client_id: row.client_id,
            practitioner_id: row.practitioner_id,
            consultation_type: row.consultation_type.parse().map_err(corrupt)?,
            category: row.category.parse().map_err(corrupt)?,
            scheduled_at: row.scheduled_at,
            duration_minutes: row.duration_minutes,
            details: row.details,
            status: row.status.parse().map_err(corrupt)?,
            priority: row.priority.parse().map_err(corrupt)?,
            cancellation_reason: row.cancellation_reason,
            cancelled_at: row.cancelled_at,
            previous_scheduled_at: row.previous_scheduled_at,
            reschedule_reason: row.reschedule_reason,
            rescheduled_at: row.rescheduled_at,
            observations: row.observations,
            assigned_at: row.assigned_at,
            practitioner_notes: row.practitioner_notes,
            reminder_sent: row.reminder_sent,
            reminder_sent_at: row.reminder_sent_at,
            estimated_cost: row.estimated_cost_cents.map(Money::from_cents),
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn into_appointments(rows: Vec<AppointmentRow>) -> Result<Vec<Appointment>> {
    rows.into_iter().map(Appointment::try_from).collect()
}

fn push_filters(builder: &mut QueryBuilder<'_, Postgres>, filter: &AppointmentFilter) {
    builder.push(" WHERE TRUE");
    if let Some(client_id) = filter.client_id {
        builder.push(" AND client_id = ").push_bind(client_id);
    }
    if let Some(practitioner_id) = filter.practitioner_id {
        builder.push(" AND practitioner_id = ").push_bind(practitioner_id);
    }
    if let Some(status) = filter.status {
        builder.push(" AND status = ").push_bind(status.as_str());
    }
    if let Some(kind) = filter.consultation_type {
        builder.push(" AND consultation_type = ").push_bind(kind.as_str());
    }
    if let Some(from) = filter.from {
        builder.push(" AND scheduled_at >= ").push_bind(from);
    }
    if let Some(to) = filter.to {
        builder.push(" AND scheduled_at < ").push_bind(to);
    }
}

/// Appointments in `PostgreSQL`.
#[derive(Clone, Debug)]
pub struct PostgresAppointmentRepository {
    pool: PgPool,
}

impl PostgresAppointmentRepository {
    /// Create a repository over `pool`.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run the service migrations.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Database`] if a migration fails.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| RepositoryError::Database(format!("Migration failed: {e}")))
    }
}

#[async_trait]
impl AppointmentRepository for PostgresAppointmentRepository {
    async fn begin(&self, scopes: &[LockScope]) -> Result<Box<dyn BookingTx>> {
        let mut tx = self.pool.begin().await?;
        advisory_xact_lock(&mut tx, scopes).await?;
        Ok(Box::new(PostgresBookingTx { tx }))
    }

    async fn find(&self, id: AppointmentId) -> Result<Option<Appointment>> {
        let row: Option<AppointmentRow> =
            sqlx::query_as(&format!("SELECT {COLUMNS} FROM appointments WHERE id = $1"))
                .bind(id.get())
                .fetch_optional(&self.pool)
                .await?;
        row.map(Appointment::try_from).transpose()
    }

    async fn list(&self, filter: &AppointmentFilter) -> Result<Page<Appointment>> {
        let mut count = QueryBuilder::new("SELECT COUNT(*) FROM appointments");
        push_filters(&mut count, filter);
        let (total,): (i64,) = count.build_query_as().fetch_one(&self.pool).await?;

        let mut select = QueryBuilder::new(format!("SELECT {COLUMNS} FROM appointments"));
        push_filters(&mut select, filter);
        select.push(match filter.sort {
            SortOrder::Asc => " ORDER BY scheduled_at ASC, id ASC",
            SortOrder::Desc => " ORDER BY scheduled_at DESC, id DESC",
        });
        select
            .push(" LIMIT ")
            .push_bind(i64::from(filter.limit.max(1)))
            .push(" OFFSET ")
            .push_bind(i64::try_from(filter.offset()).unwrap_or(i64::MAX));
        let rows: Vec<AppointmentRow> = select.build_query_as().fetch_all(&self.pool).await?;

        Ok(Page {
            items: into_appointments(rows)?,
            pagination: Pagination::new(
                filter.page,
                filter.limit,
                u64::try_from(total).unwrap_or_default(),
            ),
        })
    }

    async fn active_between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<Appointment>> {
        let rows: Vec<AppointmentRow> = sqlx::query_as(&format!(
            "SELECT {COLUMNS} FROM appointments
             WHERE status IN ('pending', 'confirmed') AND scheduled_at >= $1 AND scheduled_at < $2
             ORDER BY scheduled_at"
        ))
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;
        into_appointments(rows)
    }

    async fn due_for_reminder(&self, window: ReminderWindow, now: DateTime<Utc>) -> Result<Vec<AppointmentId>> {
        let only_unreminded = window == ReminderWindow::DayBefore;
        let ids: Vec<(i64,)> = sqlx::query_as(
            r"
            SELECT id FROM appointments
            WHERE status IN ('pending', 'confirmed')
              AND scheduled_at > $1 AND scheduled_at <= $2
              AND (NOT $3 OR reminder_sent = FALSE)
            ORDER BY scheduled_at
            ",
        )
        .bind(now)
        .bind(now + window.lead())
        .bind(only_unreminded)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids.into_iter().map(|(id,)| AppointmentId(id)).collect())
    }

    async fn overdue(&self, before: DateTime<Utc>) -> Result<Vec<AppointmentId>> {
        let ids: Vec<(i64,)> = sqlx::query_as(
            r"
            SELECT id FROM appointments
            WHERE status IN ('pending', 'confirmed') AND scheduled_at < $1
            ORDER BY scheduled_at
            ",
        )
        .bind(before)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids.into_iter().map(|(id,)| AppointmentId(id)).collect())
    }

    async fn purge_cancelled(&self, before: DateTime<Utc>) -> Result<u64> {
        let result =
            sqlx::query("DELETE FROM appointments WHERE status = 'cancelled' AND created_at < $1")
                .bind(before)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }

    async fn ping(&self) -> bool {
        dentalbook_postgres::ping(&self.pool).await
    }
}

struct PostgresBookingTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl BookingTx for PostgresBookingTx {
    async fn next_id(&mut self) -> Result<AppointmentId> {
        let (id,): (i64,) = sqlx::query_as("SELECT nextval('appointments_id_seq')")
            .fetch_one(&mut *self.tx)
            .await?;
        Ok(AppointmentId(id))
    }

    async fn load(&mut self, id: AppointmentId) -> Result<Option<Appointment>> {
        let row: Option<AppointmentRow> = sqlx::query_as(&format!(
            "SELECT {COLUMNS} FROM appointments WHERE id = $1 FOR UPDATE"
        ))
        .bind(id.get())
        .fetch_optional(&mut *self.tx)
        .await?;
        row.map(Appointment::try_from).transpose()
    }

    async fn active_between(
        &mut self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        practitioner_id: Option<i64>,
    ) -> Result<Vec<Appointment>> {
        let rows: Vec<AppointmentRow> = sqlx::query_as(&format!(
            "SELECT {COLUMNS} FROM appointments
             WHERE status IN ('pending', 'confirmed') AND scheduled_at >= $1 AND scheduled_at < $2
               AND ($3::BIGINT IS NULL OR practitioner_id = $3)
             ORDER BY scheduled_at"
        ))
        .bind(from)
        .bind(to)
        .bind(practitioner_id)
        .fetch_all(&mut *self.tx)
        .await?;
        into_appointments(rows)
    }

    async fn insert(&mut self, a: &Appointment) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO appointments ({COLUMNS})
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17,
                     $18, $19, $20, $21, $22, $23)"
        ))
        .bind(a.id.get())
        .bind(a.client_id)
        .bind(a.practitioner_id)
        .bind(a.consultation_type.as_str())
        .bind(a.category.as_str())
        .bind(a.scheduled_at)
        .bind(a.duration_minutes)
        .bind(&a.details)
        .bind(a.status.as_str())
        .bind(a.priority.as_str())
        .bind(&a.cancellation_reason)
        .bind(a.cancelled_at)
        .bind(a.previous_scheduled_at)
        .bind(&a.reschedule_reason)
        .bind(a.rescheduled_at)
        .bind(&a.observations)
        .bind(a.assigned_at)
        .bind(&a.practitioner_notes)
        .bind(a.reminder_sent)
        .bind(a.reminder_sent_at)
        .bind(a.estimated_cost.map(Money::cents))
        .bind(a.created_at)
        .bind(a.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn update(&mut self, a: &Appointment) -> Result<()> {
        let result = sqlx::query(
            r"
            UPDATE appointments SET
                practitioner_id = $2, scheduled_at = $3, duration_minutes = $4, details = $5,
                status = $6, priority = $7, cancellation_reason = $8, cancelled_at = $9,
                previous_scheduled_at = $10, reschedule_reason = $11, rescheduled_at = $12,
                observations = $13, assigned_at = $14, practitioner_notes = $15,
                reminder_sent = $16, reminder_sent_at = $17, estimated_cost_cents = $18,
                updated_at = $19
            WHERE id = $1
            ",
        )
        .bind(a.id.get())
        .bind(a.practitioner_id)
        .bind(a.scheduled_at)
        .bind(a.duration_minutes)
        .bind(&a.details)
        .bind(a.status.as_str())
        .bind(a.priority.as_str())
        .bind(&a.cancellation_reason)
        .bind(a.cancelled_at)
        .bind(a.previous_scheduled_at)
        .bind(&a.reschedule_reason)
        .bind(a.rescheduled_at)
        .bind(&a.observations)
        .bind(a.assigned_at)
        .bind(&a.practitioner_notes)
        .bind(a.reminder_sent)
        .bind(a.reminder_sent_at)
        .bind(a.estimated_cost.map(Money::cents))
        .bind(a.updated_at)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::Database(format!("appointment {} does not exist", a.id)));
        }
        Ok(())
    }

    async fn enqueue(&mut self, topic: &str, event: &SerializedEvent) -> Result<()> {
        Outbox::enqueue(&mut self.tx, topic, event)
            .await
            .map_err(|e| RepositoryError::Database(e.to_string()))?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }
}
