//! Prometheus metrics for observability and monitoring.
//!
//! Each service installs one [`MetricsExporter`] at startup and serves
//! [`MetricsExporter::render`] on `GET /metrics`.
//!
//! # Example
//!
//! ```rust,no_run
//! use dentalbook_runtime::metrics::MetricsExporter;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let exporter = MetricsExporter::install()?;
//! let text = exporter.render();
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;
use thiserror::Error;

pub use metrics::{counter, gauge, histogram};

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Installed Prometheus recorder.
///
/// Cheap to clone; every clone renders the same registry.
#[derive(Clone)]
pub struct MetricsExporter {
    handle: PrometheusHandle,
}

impl std::fmt::Debug for MetricsExporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsExporter").finish_non_exhaustive()
    }
}

impl MetricsExporter {
    /// Install the global Prometheus recorder and describe all metrics.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError::Install`] if a recorder is already installed
    /// in this process.
    pub fn install() -> Result<Self, MetricsError> {
        let handle = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?
            .install_recorder()
            .map_err(|e| MetricsError::Install(e.to_string()))?;

        register_metrics();
        tracing::info!("Prometheus recorder installed");

        Ok(Self { handle })
    }

    /// Render current metrics in the Prometheus text format.
    #[must_use]
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

/// Register all metric descriptions.
fn register_metrics() {
    // Event bus
    describe_counter!(
        "event_bus_messages_published_total",
        "Total number of messages published to the event bus"
    );
    describe_counter!(
        "event_bus_messages_consumed_total",
        "Total number of messages consumed from the event bus"
    );
    describe_counter!("event_bus_publish_errors_total", "Total number of publish errors");
    describe_counter!("event_bus_consume_errors_total", "Total number of consume errors");
    describe_counter!(
        "event_bus_settlements_total",
        "Deliveries settled, labelled by outcome (ack, requeue, drop)"
    );
    describe_histogram!(
        "event_bus_publish_duration_seconds",
        "Time taken to publish messages"
    );

    // Effects
    describe_counter!("effects_executed_total", "Total number of effects executed");

    // Outbox
    describe_gauge!("outbox_pending", "Outbox rows waiting to be relayed");
    describe_counter!("outbox_relayed_total", "Outbox rows published by the relay");
    describe_counter!("outbox_failed_total", "Outbox rows that failed to publish");

    // Retry
    describe_counter!("retry_attempts_total", "Total number of retry attempts");
    describe_counter!("retry_successes_total", "Operations that succeeded after retrying");
    describe_counter!("retry_exhausted_total", "Operations that exhausted their retries");

    // Domain
    describe_counter!("appointments_created_total", "Appointments booked");
    describe_counter!(
        "appointment_conflicts_total",
        "Booking commands rejected because the slot overlaps"
    );
    describe_counter!("appointments_rejected_total", "Booking commands rejected, by reason");
    describe_counter!("appointment_transitions_total", "Appointment status transitions, by target");
    describe_counter!("reminders_published_total", "Reminder notifications published, by window");
    describe_counter!("appointments_expired_total", "Overdue appointments marked no-show");
    describe_counter!("appointments_purged_total", "Old cancelled appointments deleted");
    describe_counter!(
        "replication_events_total",
        "Remote user events processed by the reconciler, by outcome"
    );
    describe_counter!("profiles_created_total", "Profile replicas created");
    describe_counter!("profile_writes_total", "Profile commands applied, by action");
    describe_counter!("profile_syncs_total", "On-demand syncs from identity");
    describe_counter!("accounts_created_total", "Accounts opened, by role");
    describe_counter!("logins_total", "Login attempts, by outcome");
    describe_gauge!("realtime_connections", "Open real-time sockets");
    describe_counter!("realtime_messages_total", "Real-time messages broadcast");
}

/// Event bus metrics recorder.
pub struct EventBusMetrics;

impl EventBusMetrics {
    /// Record a message publish.
    pub fn record_publish(duration: Duration) {
        counter!("event_bus_messages_published_total").increment(1);
        histogram!("event_bus_publish_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record a message consumption.
    pub fn record_consume() {
        counter!("event_bus_messages_consumed_total").increment(1);
    }

    /// Record a publish error.
    pub fn record_publish_error() {
        counter!("event_bus_publish_errors_total").increment(1);
    }

    /// Record a consume error.
    pub fn record_consume_error() {
        counter!("event_bus_consume_errors_total").increment(1);
    }

    /// Record how a delivery was settled (`ack`, `requeue`, `drop`).
    pub fn record_settlement(outcome: &'static str) {
        counter!("event_bus_settlements_total", "outcome" => outcome).increment(1);
    }
}

/// Retry metrics recorder.
pub struct RetryMetrics;

impl RetryMetrics {
    /// Record a retry attempt.
    pub fn record_attempt() {
        counter!("retry_attempts_total").increment(1);
    }

    /// Record a successful retry.
    pub fn record_success() {
        counter!("retry_successes_total").increment(1);
    }

    /// Record exhausted retries.
    pub fn record_exhausted() {
        counter!("retry_exhausted_total").increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Without an installed recorder the macros are no-ops; these only check
    // that recording never panics.
    #[test]
    fn recorders_are_safe_without_an_exporter() {
        EventBusMetrics::record_publish(Duration::from_millis(3));
        EventBusMetrics::record_consume();
        EventBusMetrics::record_settlement("ack");
        RetryMetrics::record_attempt();
        register_metrics();
    }
}
