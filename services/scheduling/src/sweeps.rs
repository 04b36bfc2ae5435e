//! Background sweeps: reminders, overdue no-shows, retention cleanup.
//!
//! Each sweep is its own tokio interval task. The first tick fires
//! immediately, so a restarted instance catches up without waiting a full
//! period. All tasks stop on the shutdown broadcast.

use crate::config::SweepConfig;
use crate::engine::Scheduler;
use crate::types::ReminderWindow;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Which periodic job a task runs
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Sweep {
    /// Day-before and imminent reminders
    Reminders,
    /// Active appointments long past their start become no-shows
    Overdue,
    /// Old cancellations are deleted
    Cleanup,
}

impl Sweep {
    /// Name used in logs
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Reminders => "reminders",
            Self::Overdue => "overdue",
            Self::Cleanup => "cleanup",
        }
    }

    const fn interval(self, config: &SweepConfig) -> Duration {
        match self {
            Self::Reminders => config.reminder_interval,
            Self::Overdue => config.overdue_interval,
            Self::Cleanup => config.cleanup_interval,
        }
    }

    /// Run one pass.
    pub async fn run_once(self, scheduler: &Scheduler, config: &SweepConfig) {
        match self {
            Self::Reminders => {
                for window in [ReminderWindow::DayBefore, ReminderWindow::Imminent] {
                    match scheduler.send_due_reminders(window).await {
                        Ok(0) => {},
                        Ok(sent) => tracing::info!(window = window.as_str(), sent, "Reminders sent"),
                        Err(e) => tracing::error!(window = window.as_str(), error = %e, "Reminder sweep failed"),
                    }
                }
            },
            Self::Overdue => {
                if let Err(e) = scheduler.expire_overdue(config.overdue_after).await {
                    tracing::error!(error = %e, "Overdue sweep failed");
                }
            },
            Self::Cleanup => {
                if let Err(e) = scheduler.purge_cancelled(config.retention_months).await {
                    tracing::error!(error = %e, "Cleanup sweep failed");
                }
            },
        }
    }

    /// Spawn the periodic task.
    #[must_use]
    pub fn spawn(
        self,
        scheduler: Scheduler,
        config: SweepConfig,
        mut shutdown: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let period = self.interval(&config).max(Duration::from_secs(1));
            tracing::info!(sweep = self.name(), period_secs = period.as_secs(), "Sweep started");
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown.recv() => break,
                    _ = ticker.tick() => self.run_once(&scheduler, &config).await,
                }
            }

            tracing::info!(sweep = self.name(), "Sweep stopped");
        })
    }
}

/// Spawn all three sweeps.
#[must_use]
pub fn spawn_all(
    scheduler: &Scheduler,
    config: &SweepConfig,
    shutdown: &broadcast::Sender<()>,
) -> Vec<JoinHandle<()>> {
    [Sweep::Reminders, Sweep::Overdue, Sweep::Cleanup]
        .into_iter()
        .map(|sweep| sweep.spawn(scheduler.clone(), config.clone(), shutdown.subscribe()))
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::availability::tests::appointment;
    use crate::engine::tests::harness;
    use crate::events::NOTIFICATION_TOPIC;
    use crate::types::{AppointmentId, AppointmentStatus};

    #[tokio::test]
    async fn appointment_twenty_hours_out_is_reminded_once() {
        let h = harness("2025-05-31T13:00:00Z");
        h.repository.seed(appointment(1, "2025-06-01T09:00:00Z")).await;
        let config = SweepConfig::default();

        Sweep::Reminders.run_once(&h.scheduler, &config).await;
        h.clock.advance(chrono::Duration::minutes(30));
        Sweep::Reminders.run_once(&h.scheduler, &config).await;

        let reminders = h.bus.published(NOTIFICATION_TOPIC);
        assert_eq!(reminders.len(), 1);
        assert!(h.scheduler.find(AppointmentId(1)).await.unwrap().reminder_sent);
    }

    #[tokio::test]
    async fn overdue_pass_uses_the_configured_grace() {
        let h = harness("2025-06-01T12:00:00Z");
        h.repository.seed(appointment(1, "2025-06-01T09:00:00Z")).await;

        Sweep::Overdue.run_once(&h.scheduler, &SweepConfig::default()).await;

        assert_eq!(
            h.scheduler.find(AppointmentId(1)).await.unwrap().status,
            AppointmentStatus::NoShow
        );
    }

    #[tokio::test]
    async fn sweeps_stop_on_shutdown() {
        let h = harness("2025-06-01T12:00:00Z");
        let (shutdown, _) = broadcast::channel(1);
        let handles = spawn_all(&h.scheduler, &SweepConfig::default(), &shutdown);

        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.send(()).unwrap();
        for handle in handles {
            tokio::time::timeout(Duration::from_secs(2), handle).await.unwrap().unwrap();
        }
    }
}
