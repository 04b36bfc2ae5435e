//! Configuration management for the scheduling service.
//!
//! Loads configuration from environment variables with sensible defaults.

use chrono::{Duration as ChronoDuration, FixedOffset, NaiveTime, Offset, Utc};
use dentalbook_auth::AuthConfig;
use dentalbook_postgres::DatabaseConfig;
use std::env;
use std::time::Duration;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// `PostgreSQL` configuration
    pub database: DatabaseConfig,
    /// RedPanda/Kafka configuration
    pub redpanda: RedpandaConfig,
    /// HTTP server configuration
    pub server: ServerConfig,
    /// Token validation configuration
    pub auth: AuthConfig,
    /// Profile-service client configuration
    pub directory: DirectoryConfig,
    /// Booking rules
    pub clinic: ClinicConfig,
    /// Background sweep cadences
    pub sweeps: SweepConfig,
    /// How domain events leave the service
    pub delivery: DeliveryMode,
}

/// RedPanda/Kafka configuration
#[derive(Debug, Clone)]
pub struct RedpandaConfig {
    /// Broker addresses (comma-separated)
    pub brokers: String,
    /// Consumer group
    pub consumer_group: String,
}

impl RedpandaConfig {
    /// Read `REDPANDA_BROKERS` and `REDPANDA_CONSUMER_GROUP`.
    #[must_use]
    pub fn from_env(default_group: &str) -> Self {
        Self {
            brokers: env::var("REDPANDA_BROKERS").unwrap_or_else(|_| "localhost:9092".to_string()),
            consumer_group: env::var("REDPANDA_CONSUMER_GROUP")
                .unwrap_or_else(|_| default_group.to_string()),
        }
    }
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to bind to
    pub port: u16,
    /// Graceful shutdown timeout
    pub shutdown_timeout: Duration,
}

impl ServerConfig {
    /// Read `HOST`, `PORT` and `SHUTDOWN_TIMEOUT_SECS`.
    #[must_use]
    pub fn from_env(default_port: u16) -> Self {
        Self {
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env::var("PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(default_port),
            shutdown_timeout: Duration::from_secs(
                env::var("SHUTDOWN_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
        }
    }

    /// `host:port`
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Profile-service client configuration
#[derive(Debug, Clone)]
pub struct DirectoryConfig {
    /// Base URL of the profile service
    pub profile_url: String,
    /// Per-request timeout
    pub timeout: Duration,
}

/// Which timestamp the client lead-time rule is measured against on reschedule.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LeadTimePolicy {
    /// The appointment's current time
    #[default]
    OriginalTime,
    /// The requested new time
    TargetTime,
    /// Both must be far enough out
    Both,
}

impl LeadTimePolicy {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "original" => Some(Self::OriginalTime),
            "target" => Some(Self::TargetTime),
            "both" => Some(Self::Both),
            _ => None,
        }
    }
}

/// Booking rules
#[derive(Debug, Clone)]
pub struct ClinicConfig {
    /// First bookable slot of the day (local time)
    pub opens_at: NaiveTime,
    /// Slots start strictly before this (local time)
    pub closes_at: NaiveTime,
    /// Offset of clinic local time from UTC
    pub utc_offset: FixedOffset,
    /// Availability grid step
    pub slot_length: ChronoDuration,
    /// Minimum time an appointment blocks for conflict checks
    pub occupancy: ChronoDuration,
    /// Minimum notice a client must give to reschedule or cancel
    pub lead_time: ChronoDuration,
    /// What the lead time is measured against on reschedule
    pub lead_time_policy: LeadTimePolicy,
}

impl Default for ClinicConfig {
    fn default() -> Self {
        Self {
            opens_at: NaiveTime::from_hms_opt(8, 0, 0).unwrap_or(NaiveTime::MIN),
            closes_at: NaiveTime::from_hms_opt(18, 0, 0).unwrap_or(NaiveTime::MIN),
            utc_offset: Utc.fix(),
            slot_length: ChronoDuration::minutes(30),
            occupancy: ChronoDuration::minutes(60),
            lead_time: ChronoDuration::hours(24),
            lead_time_policy: LeadTimePolicy::OriginalTime,
        }
    }
}

impl ClinicConfig {
    /// Read `CLINIC_*` variables over the defaults.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            opens_at: env::var("CLINIC_OPENS_AT")
                .ok()
                .and_then(|s| NaiveTime::parse_from_str(&s, "%H:%M").ok())
                .unwrap_or(defaults.opens_at),
            closes_at: env::var("CLINIC_CLOSES_AT")
                .ok()
                .and_then(|s| NaiveTime::parse_from_str(&s, "%H:%M").ok())
                .unwrap_or(defaults.closes_at),
            utc_offset: env::var("CLINIC_UTC_OFFSET_MINUTES")
                .ok()
                .and_then(|s| s.parse::<i32>().ok())
                .and_then(|minutes| FixedOffset::east_opt(minutes.saturating_mul(60)))
                .unwrap_or(defaults.utc_offset),
            slot_length: env::var("CLINIC_SLOT_MINUTES")
                .ok()
                .and_then(|s| s.parse().ok())
                .map_or(defaults.slot_length, ChronoDuration::minutes),
            occupancy: env::var("CLINIC_OCCUPANCY_MINUTES")
                .ok()
                .and_then(|s| s.parse().ok())
                .map_or(defaults.occupancy, ChronoDuration::minutes),
            lead_time: env::var("CLINIC_LEAD_TIME_HOURS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map_or(defaults.lead_time, ChronoDuration::hours),
            lead_time_policy: env::var("CLINIC_LEAD_TIME_POLICY")
                .ok()
                .and_then(|s| LeadTimePolicy::parse(&s))
                .unwrap_or(defaults.lead_time_policy),
        }
    }
}

/// Background sweep cadences and windows
#[derive(Debug, Clone)]
pub struct SweepConfig {
    /// How often reminders are sent
    pub reminder_interval: Duration,
    /// How often overdue appointments are marked no-show
    pub overdue_interval: Duration,
    /// How often old cancellations are purged
    pub cleanup_interval: Duration,
    /// How long past its start an active appointment becomes a no-show
    pub overdue_after: ChronoDuration,
    /// How many calendar months cancelled appointments are kept
    pub retention_months: u32,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            reminder_interval: Duration::from_secs(30 * 60),
            overdue_interval: Duration::from_secs(60 * 60),
            cleanup_interval: Duration::from_secs(7 * 24 * 60 * 60),
            overdue_after: ChronoDuration::hours(2),
            retention_months: 6,
        }
    }
}

impl SweepConfig {
    /// Read `SWEEP_*` variables over the defaults.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            reminder_interval: env::var("SWEEP_REMINDER_INTERVAL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map_or(defaults.reminder_interval, Duration::from_secs),
            overdue_interval: env::var("SWEEP_OVERDUE_INTERVAL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map_or(defaults.overdue_interval, Duration::from_secs),
            cleanup_interval: env::var("SWEEP_CLEANUP_INTERVAL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map_or(defaults.cleanup_interval, Duration::from_secs),
            overdue_after: env::var("SWEEP_OVERDUE_AFTER_MINUTES")
                .ok()
                .and_then(|s| s.parse().ok())
                .map_or(defaults.overdue_after, ChronoDuration::minutes),
            retention_months: env::var("SWEEP_RETENTION_MONTHS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.retention_months),
        }
    }
}

/// How published events leave the service
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DeliveryMode {
    /// Publish after commit; failures are logged only
    #[default]
    Direct,
    /// Write to the outbox table in the same transaction; a relay publishes
    Outbox,
}

impl DeliveryMode {
    /// Read `EVENT_DELIVERY` (`direct` or `outbox`).
    #[must_use]
    pub fn from_env() -> Self {
        match env::var("EVENT_DELIVERY").as_deref() {
            Ok("outbox") => Self::Outbox,
            _ => Self::Direct,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            database: DatabaseConfig::from_env("SCHEDULING_DATABASE_URL"),
            redpanda: RedpandaConfig::from_env("scheduling-service"),
            server: ServerConfig::from_env(3003),
            auth: AuthConfig::from_env(),
            directory: DirectoryConfig {
                profile_url: env::var("PROFILE_SERVICE_URL")
                    .unwrap_or_else(|_| "http://localhost:3002".to_string()),
                timeout: Duration::from_millis(
                    env::var("PROFILE_SERVICE_TIMEOUT_MS")
                        .ok()
                        .and_then(|s| s.parse().ok())
                        .unwrap_or(5000),
                ),
            },
            clinic: ClinicConfig::from_env(),
            sweeps: SweepConfig::from_env(),
            delivery: DeliveryMode::from_env(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn clinic_defaults() {
        let clinic = ClinicConfig::default();
        assert_eq!(clinic.opens_at, NaiveTime::from_hms_opt(8, 0, 0).unwrap());
        assert_eq!(clinic.closes_at, NaiveTime::from_hms_opt(18, 0, 0).unwrap());
        assert_eq!(clinic.utc_offset.local_minus_utc(), 0);
        assert_eq!(clinic.lead_time, ChronoDuration::hours(24));
        assert_eq!(clinic.lead_time_policy, LeadTimePolicy::OriginalTime);
    }

    #[test]
    fn lead_time_policy_names() {
        assert_eq!(LeadTimePolicy::parse("target"), Some(LeadTimePolicy::TargetTime));
        assert_eq!(LeadTimePolicy::parse("both"), Some(LeadTimePolicy::Both));
        assert_eq!(LeadTimePolicy::parse("later"), None);
    }
}
