//! Configuration for the profile service, read from the environment.

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
    /// Token validation and identity-service access
    pub auth: AuthConfig,
    /// Replication consumer settings
    pub replication: ReplicationConfig,
}

/// RedPanda/Kafka configuration
#[derive(Debug, Clone)]
pub struct RedpandaConfig {
    /// Broker addresses (comma-separated)
    pub brokers: String,
    /// Consumer group
    pub consumer_group: String,
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
    /// `host:port`
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Replication consumer settings
#[derive(Debug, Clone)]
pub struct ReplicationConfig {
    /// Topics the reconciler subscribes to
    pub topics: Vec<String>,
    /// Pause before resubscribing after the stream fails
    pub retry_delay: Duration,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            topics: vec!["user.events".to_string(), "auth.events".to_string()],
            retry_delay: Duration::from_secs(5),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        let replication = ReplicationConfig::default();
        Self {
            database: DatabaseConfig::from_env("PROFILE_DATABASE_URL"),
            redpanda: RedpandaConfig {
                brokers: env::var("REDPANDA_BROKERS").unwrap_or_else(|_| "localhost:9092".to_string()),
                consumer_group: env::var("REDPANDA_CONSUMER_GROUP")
                    .unwrap_or_else(|_| "profile-service".to_string()),
            },
            server: ServerConfig {
                host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env::var("PORT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(3002),
                shutdown_timeout: Duration::from_secs(
                    env::var("SHUTDOWN_TIMEOUT_SECS")
                        .ok()
                        .and_then(|s| s.parse().ok())
                        .unwrap_or(30),
                ),
            },
            auth: AuthConfig::from_env(),
            replication: ReplicationConfig {
                topics: env::var("REPLICATION_TOPICS")
                    .ok()
                    .map(|s| s.split(',').map(|t| t.trim().to_string()).filter(|t| !t.is_empty()).collect::<Vec<_>>())
                    .filter(|topics| !topics.is_empty())
                    .unwrap_or(replication.topics),
                retry_delay: env::var("REPLICATION_RETRY_DELAY_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .map_or(replication.retry_delay, Duration::from_secs),
            },
        }
    }
}
