//! Configuration for the identity service, read from the environment.

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
    /// Token signing, bcrypt cost and the internal-service credential
    pub auth: AuthConfig,
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

impl Config {
    /// Load configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            database: DatabaseConfig::from_env("IDENTITY_DATABASE_URL"),
            redpanda: RedpandaConfig {
                brokers: env::var("REDPANDA_BROKERS").unwrap_or_else(|_| "localhost:9092".to_string()),
                consumer_group: env::var("REDPANDA_CONSUMER_GROUP")
                    .unwrap_or_else(|_| "identity-service".to_string()),
            },
            server: ServerConfig {
                host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env::var("PORT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(3001),
                shutdown_timeout: Duration::from_secs(
                    env::var("SHUTDOWN_TIMEOUT_SECS")
                        .ok()
                        .and_then(|s| s.parse().ok())
                        .unwrap_or(30),
                ),
            },
            auth: AuthConfig::from_env(),
        }
    }
}
