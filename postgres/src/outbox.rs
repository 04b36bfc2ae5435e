//! Transactional outbox.
//!
//! In outbox delivery mode a service writes the events a state change
//! produces into the `outbox` table inside the same transaction as the state
//! change. [`OutboxRelay`] then publishes pending rows and marks them, so an
//! event exists if and only if its state change committed.
//!
//! Expected table (each service ships it in its own migrations):
//!
//! ```sql
//! CREATE TABLE outbox (
//!     id BIGSERIAL PRIMARY KEY,
//!     topic TEXT NOT NULL,
//!     event_type TEXT NOT NULL,
//!     payload BYTEA NOT NULL,
//!     metadata JSONB,
//!     status TEXT NOT NULL DEFAULT 'pending',
//!     attempts INTEGER NOT NULL DEFAULT 0,
//!     last_error TEXT,
//!     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
//!     published_at TIMESTAMPTZ
//! );
//! ```

use chrono::{DateTime, Utc};
use dentalbook_core::event::SerializedEvent;
use dentalbook_core::event_bus::EventBus;
use sqlx::{PgConnection, PgPool, Row};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;

/// Errors from outbox operations.
#[derive(Error, Debug)]
pub enum OutboxError {
    /// Database failure
    #[error("Outbox database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Row carried an unknown status
    #[error("Invalid outbox status: {0}")]
    InvalidStatus(String),
}

/// Status of an outbox row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboxStatus {
    /// Waiting to be published
    Pending,
    /// Published to the bus
    Published,
    /// Gave up after `max_attempts`
    Failed,
}

impl OutboxStatus {
    /// Database representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Published => "published",
            Self::Failed => "failed",
        }
    }

    /// Parse the database representation.
    ///
    /// # Errors
    ///
    /// Returns [`OutboxError::InvalidStatus`] for unknown values.
    pub fn parse(s: &str) -> Result<Self, OutboxError> {
        match s {
            "pending" => Ok(Self::Pending),
            "published" => Ok(Self::Published),
            "failed" => Ok(Self::Failed),
            _ => Err(OutboxError::InvalidStatus(s.to_string())),
        }
    }
}

/// One row of the outbox.
#[derive(Debug, Clone)]
pub struct OutboxEntry {
    /// Row id (publish order)
    pub id: i64,
    /// Destination topic
    pub topic: String,
    /// The event to publish
    pub event: SerializedEvent,
    /// Current status
    pub status: OutboxStatus,
    /// Failed publish attempts so far
    pub attempts: i32,
    /// Last publish error, if any
    pub last_error: Option<String>,
    /// When the row was written
    pub created_at: DateTime<Utc>,
}

/// Access to the `outbox` table.
#[derive(Clone, Debug)]
pub struct Outbox {
    pool: PgPool,
}

impl Outbox {
    /// Create an outbox over `pool`.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Write an event inside the caller's transaction.
    ///
    /// # Errors
    ///
    /// Returns [`OutboxError::Database`] if the insert fails; the caller's
    /// transaction should then be rolled back.
    pub async fn enqueue(
        conn: &mut PgConnection,
        topic: &str,
        event: &SerializedEvent,
    ) -> Result<i64, OutboxError> {
        let (id,): (i64,) = sqlx::query_as(
            r"
            INSERT INTO outbox (topic, event_type, payload, metadata)
            VALUES ($1, $2, $3, $4)
            RETURNING id
            ",
        )
        .bind(topic)
        .bind(&event.event_type)
        .bind(&event.data)
        .bind(&event.metadata)
        .fetch_one(&mut *conn)
        .await?;

        tracing::debug!(outbox_id = id, topic, event_type = %event.event_type, "Event enqueued in outbox");
        Ok(id)
    }

    /// Number of rows waiting to be published.
    ///
    /// # Errors
    ///
    /// Returns [`OutboxError::Database`] if the query fails.
    pub async fn count_pending(&self) -> Result<i64, OutboxError> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM outbox WHERE status = 'pending'")
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    /// Publish up to `batch` pending rows, oldest first.
    ///
    /// Rows are claimed with `FOR UPDATE SKIP LOCKED`, so several relays can
    /// run against the same table. Returns the number of rows published.
    ///
    /// # Errors
    ///
    /// Returns [`OutboxError::Database`] if claiming or marking rows fails.
    /// Publish failures are recorded on the row, not returned.
    pub async fn relay_batch(
        &self,
        bus: &dyn EventBus,
        batch: i64,
        max_attempts: i32,
    ) -> Result<usize, OutboxError> {
        let mut tx = self.pool.begin().await?;

        let rows = sqlx::query(
            r"
            SELECT id, topic, event_type, payload, metadata, status, attempts, last_error, created_at
            FROM outbox
            WHERE status = 'pending'
            ORDER BY id
            LIMIT $1
            FOR UPDATE SKIP LOCKED
            ",
        )
        .bind(batch)
        .fetch_all(&mut *tx)
        .await?;

        let entries = rows
            .iter()
            .map(Self::row_to_entry)
            .collect::<Result<Vec<_>, _>>()?;

        let mut published = 0;
        for entry in entries {
            match bus.publish(&entry.topic, &entry.event).await {
                Ok(()) => {
                    sqlx::query(
                        "UPDATE outbox SET status = 'published', published_at = NOW() WHERE id = $1",
                    )
                    .bind(entry.id)
                    .execute(&mut *tx)
                    .await?;
                    published += 1;
                    metrics::counter!("outbox_relayed_total").increment(1);
                },
                Err(error) => {
                    let attempts = entry.attempts.saturating_add(1);
                    let status = if attempts >= max_attempts {
                        OutboxStatus::Failed
                    } else {
                        OutboxStatus::Pending
                    };
                    sqlx::query(
                        "UPDATE outbox SET attempts = $1, last_error = $2, status = $3 WHERE id = $4",
                    )
                    .bind(attempts)
                    .bind(error.to_string())
                    .bind(status.as_str())
                    .bind(entry.id)
                    .execute(&mut *tx)
                    .await?;

                    metrics::counter!("outbox_failed_total").increment(1);
                    tracing::warn!(
                        outbox_id = entry.id,
                        topic = %entry.topic,
                        attempts,
                        status = status.as_str(),
                        error = %error,
                        "Outbox publish failed"
                    );
                    // Keep per-topic order: stop at the first failure.
                    break;
                },
            }
        }

        tx.commit().await?;
        Ok(published)
    }

    fn row_to_entry(row: &sqlx::postgres::PgRow) -> Result<OutboxEntry, OutboxError> {
        let status: String = row.try_get("status")?;
        Ok(OutboxEntry {
            id: row.try_get("id")?,
            topic: row.try_get("topic")?,
            event: SerializedEvent::new(
                row.try_get("event_type")?,
                row.try_get("payload")?,
                row.try_get("metadata")?,
            ),
            status: OutboxStatus::parse(&status)?,
            attempts: row.try_get("attempts")?,
            last_error: row.try_get("last_error")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

/// Background task that drains the outbox onto the event bus.
pub struct OutboxRelay {
    outbox: Outbox,
    event_bus: Arc<dyn EventBus>,
    interval: Duration,
    batch: i64,
    max_attempts: i32,
    shutdown: broadcast::Receiver<()>,
}

impl OutboxRelay {
    /// Create a relay polling every `interval`.
    #[must_use]
    pub fn new(
        outbox: Outbox,
        event_bus: Arc<dyn EventBus>,
        interval: Duration,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            outbox,
            event_bus,
            interval,
            batch: 100,
            max_attempts: 20,
            shutdown,
        }
    }

    /// Spawn the relay loop; it stops on the shutdown signal.
    #[must_use]
    pub fn spawn(mut self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!(interval_ms = u64::try_from(self.interval.as_millis()).unwrap_or(u64::MAX), "Outbox relay started");
            let mut ticker = tokio::time::interval(self.interval);

            loop {
                tokio::select! {
                    _ = self.shutdown.recv() => break,
                    _ = ticker.tick() => {
                        match self.outbox.relay_batch(self.event_bus.as_ref(), self.batch, self.max_attempts).await {
                            Ok(0) => {},
                            Ok(count) => tracing::debug!(count, "Outbox rows relayed"),
                            Err(e) => tracing::error!(error = %e, "Outbox relay pass failed"),
                        }
                        if let Ok(pending) = self.outbox.count_pending().await {
                            #[allow(clippy::cast_precision_loss)]
                            metrics::gauge!("outbox_pending").set(pending as f64);
                        }
                    }
                }
            }

            tracing::info!("Outbox relay stopped");
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn outbox_status_parses_its_own_representation() {
        for status in [OutboxStatus::Pending, OutboxStatus::Published, OutboxStatus::Failed] {
            assert_eq!(OutboxStatus::parse(status.as_str()).unwrap(), status);
        }
        assert!(matches!(
            OutboxStatus::parse("sent"),
            Err(OutboxError::InvalidStatus(_))
        ));
    }
}
