//! # Dentalbook Runtime
//!
//! Runtime support for the dentalbook services.
//!
//! Reducers only *describe* effects. This crate executes them, once the
//! state change they accompany has been committed:
//!
//! ```text
//!  HTTP / sweep / consumer
//!          │
//!          ▼
//!      Reducer ──► state ──► commit (Postgres)
//!          │
//!          ▼
//!   EffectExecutor ──► event bus publish, real-time broadcast
//!          │
//!          ▼
//!   feedback actions (publish failures) ──► log + metrics
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use dentalbook_runtime::EffectExecutor;
//!
//! let executor = EffectExecutor::new(|action: AppointmentAction| {
//!     tracing::warn!(?action, "effect feedback");
//! });
//! executor.run(effects).await;
//! ```

use dentalbook_core::effect::{Effect, EventBusOperation};
use serde::Serialize;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

/// Retry logic with exponential backoff
pub mod retry;

/// Prometheus metrics for observability
pub mod metrics;

/// Event bus consumer loop
pub mod consumer;

/// OS signals and background-task draining
pub mod shutdown;

use crate::metrics::EventBusMetrics;

type Feedback<A> = Arc<dyn Fn(A) + Send + Sync>;

/// Executes effect descriptions produced by reducers.
///
/// Actions produced by effects (for instance an `on_error` callback of a
/// publish) are handed to the feedback sink given at construction. The
/// executor never fails: effect failures are reported through feedback,
/// logs and metrics, and never propagated to the caller.
pub struct EffectExecutor<A> {
    feedback: Feedback<A>,
}

impl<A> Clone for EffectExecutor<A> {
    fn clone(&self) -> Self {
        Self {
            feedback: Arc::clone(&self.feedback),
        }
    }
}

impl<A> std::fmt::Debug for EffectExecutor<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EffectExecutor").finish_non_exhaustive()
    }
}

impl<A> EffectExecutor<A>
where
    A: Send + 'static,
{
    /// Create an executor that hands feedback actions to `feedback`.
    #[must_use]
    pub fn new(feedback: impl Fn(A) + Send + Sync + 'static) -> Self {
        Self {
            feedback: Arc::new(feedback),
        }
    }

    /// Create an executor that drops feedback actions.
    #[must_use]
    pub fn discarding() -> Self {
        Self::new(|_| {})
    }

    /// Run all effects to completion.
    ///
    /// Top-level effects run concurrently, like an implicit `Effect::Parallel`.
    pub async fn run<I>(&self, effects: I)
    where
        I: IntoIterator<Item = Effect<A>>,
    {
        let effects: Vec<_> = effects.into_iter().collect();
        tracing::trace!(count = effects.len(), "Executing effects");
        futures::future::join_all(effects.into_iter().map(|effect| self.execute(effect))).await;
    }

    fn execute(&self, effect: Effect<A>) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            match effect {
                Effect::None => {
                    ::metrics::counter!("effects_executed_total", "type" => "none").increment(1);
                },
                Effect::Future(fut) => {
                    ::metrics::counter!("effects_executed_total", "type" => "future").increment(1);
                    if let Some(action) = fut.await {
                        (self.feedback)(action);
                    }
                },
                Effect::Parallel(effects) => {
                    ::metrics::counter!("effects_executed_total", "type" => "parallel")
                        .increment(1);
                    futures::future::join_all(effects.into_iter().map(|e| self.execute(e))).await;
                },
                Effect::Sequential(effects) => {
                    ::metrics::counter!("effects_executed_total", "type" => "sequential")
                        .increment(1);
                    for effect in effects {
                        self.execute(effect).await;
                    }
                },
                Effect::PublishEvent(operation) => {
                    ::metrics::counter!("effects_executed_total", "type" => "publish")
                        .increment(1);
                    if let Some(action) = Self::publish(operation).await {
                        (self.feedback)(action);
                    }
                },
            }
        })
    }

    async fn publish(operation: EventBusOperation<A>) -> Option<A> {
        let EventBusOperation::Publish {
            event_bus,
            topic,
            event,
            on_success,
            on_error,
        } = operation;

        let start = Instant::now();
        match event_bus.publish(&topic, &event).await {
            Ok(()) => {
                EventBusMetrics::record_publish(start.elapsed());
                tracing::debug!(topic = %topic, event_type = %event.event_type, "Event published");
                on_success(())
            },
            Err(error) => {
                EventBusMetrics::record_publish_error();
                tracing::error!(
                    topic = %topic,
                    event_type = %event.event_type,
                    error = %error,
                    "Event publish failed; state change stands"
                );
                on_error(error)
            },
        }
    }
}

/// Health check status levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Component is fully operational
    Healthy,

    /// Component works with reduced capability
    Degraded,

    /// Component is not operational
    Unhealthy,
}

impl HealthStatus {
    /// Returns the worse of two statuses
    #[must_use]
    pub const fn worst(self, other: Self) -> Self {
        match (self, other) {
            (Self::Unhealthy, _) | (_, Self::Unhealthy) => Self::Unhealthy,
            (Self::Degraded, _) | (_, Self::Degraded) => Self::Degraded,
            _ => Self::Healthy,
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
            Self::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Health of a single component (database, event bus, upstream service)
#[derive(Debug, Clone, Serialize)]
pub struct HealthCheck {
    /// Component name
    pub component: String,

    /// Current status
    pub status: HealthStatus,

    /// Optional detail, present when not healthy
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl HealthCheck {
    /// A healthy component
    #[must_use]
    pub fn healthy(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            status: HealthStatus::Healthy,
            message: None,
        }
    }

    /// A degraded component
    #[must_use]
    pub fn degraded(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            status: HealthStatus::Degraded,
            message: Some(message.into()),
        }
    }

    /// An unhealthy component
    #[must_use]
    pub fn unhealthy(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            status: HealthStatus::Unhealthy,
            message: Some(message.into()),
        }
    }
}

/// Aggregated health of a service
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// Service name
    pub service: String,

    /// Worst status among the checks
    pub status: HealthStatus,

    /// Individual checks
    pub checks: Vec<HealthCheck>,

    /// When the report was produced
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl HealthReport {
    /// Aggregate component checks into a report
    #[must_use]
    pub fn new(service: impl Into<String>, checks: Vec<HealthCheck>) -> Self {
        let status = checks
            .iter()
            .map(|c| c.status)
            .fold(HealthStatus::Healthy, HealthStatus::worst);

        Self {
            service: service.into(),
            status,
            checks,
            timestamp: chrono::Utc::now(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use dentalbook_core::event::SerializedEvent;
    use dentalbook_core::event_bus::EventBus;
    use dentalbook_core::{async_effect, publish_event};
    use dentalbook_testing::mocks::InMemoryEventBus;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    enum TestAction {
        Produced(u32),
        PublishFailed,
    }

    fn recording_executor() -> (EffectExecutor<TestAction>, Arc<Mutex<Vec<TestAction>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let executor = EffectExecutor::new(move |action| sink.lock().unwrap().push(action));
        (executor, seen)
    }

    #[tokio::test]
    async fn future_effects_feed_back_their_actions() {
        let (executor, seen) = recording_executor();

        executor
            .run(vec![
                async_effect! { Some(TestAction::Produced(1)) },
                Effect::chain(vec![
                    async_effect! { Some(TestAction::Produced(2)) },
                    async_effect! { None },
                ]),
            ])
            .await;

        let mut seen = seen.lock().unwrap().clone();
        seen.sort_by_key(|a| match a {
            TestAction::Produced(n) => *n,
            TestAction::PublishFailed => 0,
        });
        assert_eq!(seen, vec![TestAction::Produced(1), TestAction::Produced(2)]);
    }

    #[tokio::test]
    async fn publish_effects_reach_the_bus() {
        let (executor, seen) = recording_executor();
        let bus = Arc::new(InMemoryEventBus::new());
        let dyn_bus: Arc<dyn EventBus> = bus.clone();
        let event = SerializedEvent::new("CITA_CREATED".to_string(), b"{}".to_vec(), None);

        executor
            .run(vec![publish_event! {
                bus: dyn_bus,
                topic: "cita.events",
                event: event,
                on_success: || None,
                on_error: |_e| Some(TestAction::PublishFailed)
            }])
            .await;

        assert_eq!(bus.published("cita.events").len(), 1);
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn publish_failure_is_reported_as_feedback_not_error() {
        let (executor, seen) = recording_executor();
        let bus = Arc::new(InMemoryEventBus::new());
        bus.fail_publishes(true);
        let dyn_bus: Arc<dyn EventBus> = bus.clone();
        let event = SerializedEvent::new("CITA_CREATED".to_string(), b"{}".to_vec(), None);

        executor
            .run(vec![publish_event! {
                bus: dyn_bus,
                topic: "cita.events",
                event: event,
                on_success: || None,
                on_error: |_e| Some(TestAction::PublishFailed)
            }])
            .await;

        assert_eq!(*seen.lock().unwrap(), vec![TestAction::PublishFailed]);
        assert!(bus.published("cita.events").is_empty());
    }

    #[test]
    fn health_report_takes_the_worst_status() {
        let report = HealthReport::new(
            "scheduling-service",
            vec![
                HealthCheck::healthy("postgres"),
                HealthCheck::degraded("event-bus", "slow"),
            ],
        );
        assert_eq!(report.status, HealthStatus::Degraded);

        let report = HealthReport::new(
            "scheduling-service",
            vec![
                HealthCheck::degraded("event-bus", "slow"),
                HealthCheck::unhealthy("postgres", "down"),
            ],
        );
        assert_eq!(report.status, HealthStatus::Unhealthy);
        assert_eq!(report.status.to_string(), "unhealthy");
    }
}
