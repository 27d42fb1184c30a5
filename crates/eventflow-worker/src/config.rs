//! Worker configuration.

use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Result};
use serde::Deserialize;
use sqlx::postgres::PgConnectOptions;

/// Event log implementation to consume from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventLogBackend {
    Redis,
    Nats,
    Memory,
}

impl FromStr for EventLogBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "redis" => Ok(EventLogBackend::Redis),
            "nats" => Ok(EventLogBackend::Nats),
            "memory" => Ok(EventLogBackend::Memory),
            other => Err(anyhow!("Unknown event log backend: {}", other)),
        }
    }
}

/// Workflow store implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(StoreBackend::Postgres),
            "memory" => Ok(StoreBackend::Memory),
            other => Err(anyhow!("Unknown store backend: {}", other)),
        }
    }
}

/// What to do with a message whose event cannot be decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MalformedPolicy {
    /// Leave it unacknowledged; it is redelivered on every poll.
    #[default]
    Leave,
    /// Acknowledge and drop it.
    Acknowledge,
    /// Copy it to the dead-letter stream, then acknowledge it.
    DeadLetter,
}

impl FromStr for MalformedPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "leave" => Ok(MalformedPolicy::Leave),
            "ack" | "acknowledge" => Ok(MalformedPolicy::Acknowledge),
            "dead_letter" | "dead-letter" => Ok(MalformedPolicy::DeadLetter),
            other => Err(anyhow!("Unknown malformed message policy: {}", other)),
        }
    }
}

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Event log backend.
    pub event_log: EventLogBackend,

    /// Redis connection URL.
    pub redis_url: String,

    /// NATS server URL.
    pub nats_url: String,

    /// Event stream name.
    pub stream: String,

    /// Approximate cap on retained stream entries.
    pub stream_maxlen: usize,

    /// Consumer group name.
    pub group: String,

    /// Consumer name within the group.
    pub consumer: String,

    /// Maximum entries per read.
    pub batch_size: usize,

    /// Blocking read timeout.
    pub block: Duration,

    /// Sleep after an empty poll.
    pub idle: Duration,

    /// Malformed message handling.
    pub malformed_policy: MalformedPolicy,

    /// Stream receiving dead-lettered messages.
    pub dead_letter_stream: String,

    /// Workflow store backend.
    pub store: StoreBackend,
}

impl WorkerConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let event_log = env_or("EVENT_LOG_BACKEND", "redis").parse()?;

        let redis_url = env_or("REDIS_URL", "redis://127.0.0.1:6379/0");

        let nats_url = env_or("NATS_URL", "nats://localhost:4222");

        let stream = env_or("EVENT_STREAM", "workflow_events");

        let stream_maxlen = env_parse("EVENT_STREAM_MAXLEN", 10_000);

        let group = env_or("CONSUMER_GROUP", "workflow_workers");

        let consumer = env_or("CONSUMER_NAME", "worker_1");

        let batch_size: usize = env_parse("CONSUMER_BATCH_SIZE", 10);

        let block_ms: u64 = env_parse("CONSUMER_BLOCK_MS", 1000);

        let idle_ms: u64 = env_parse("CONSUMER_IDLE_MS", 1000);

        let malformed_policy = match std::env::var("MALFORMED_POLICY") {
            Ok(value) => value.parse()?,
            Err(_) => MalformedPolicy::default(),
        };

        let dead_letter_stream =
            std::env::var("DEAD_LETTER_STREAM").unwrap_or_else(|_| format!("{}.dead", stream));

        let store = env_or("STORE_BACKEND", "postgres").parse()?;

        Ok(Self {
            event_log,
            redis_url,
            nats_url,
            stream,
            stream_maxlen,
            group,
            consumer,
            batch_size: batch_size.max(1),
            block: Duration::from_millis(block_ms),
            idle: Duration::from_millis(idle_ms),
            malformed_policy,
            dead_letter_stream,
            store,
        })
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            event_log: EventLogBackend::Redis,
            redis_url: "redis://127.0.0.1:6379/0".to_string(),
            nats_url: "nats://localhost:4222".to_string(),
            stream: "workflow_events".to_string(),
            stream_maxlen: 10_000,
            group: "workflow_workers".to_string(),
            consumer: "worker_1".to_string(),
            batch_size: 10,
            block: Duration::from_millis(1000),
            idle: Duration::from_millis(1000),
            malformed_policy: MalformedPolicy::Leave,
            dead_letter_stream: "workflow_events.dead".to_string(),
            store: StoreBackend::Postgres,
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// Database configuration loaded from environment variables.
///
/// Environment variables are prefixed with `POSTGRES_`:
/// - `POSTGRES_HOST`: Database host (default: "localhost")
/// - `POSTGRES_PORT`: Database port (default: "5432")
/// - `POSTGRES_USER`: Database user (default: "eventflow")
/// - `POSTGRES_PASSWORD`: Database password
/// - `POSTGRES_DATABASE`: Database name (default: "eventflow")
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: String,

    #[serde(default = "default_user")]
    pub user: String,

    #[serde(default)]
    pub password: String,

    #[serde(default = "default_database")]
    pub database: String,

    /// Maximum connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Connection acquire timeout in seconds
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout: u64,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> String {
    "5432".to_string()
}

fn default_user() -> String {
    "eventflow".to_string()
}

fn default_database() -> String {
    "eventflow".to_string()
}

fn default_max_connections() -> u32 {
    5
}

fn default_acquire_timeout() -> u64 {
    30
}

impl DatabaseConfig {
    /// Load configuration from `POSTGRES_*` environment variables.
    pub fn from_env() -> Result<Self, envy::Error> {
        envy::prefixed("POSTGRES_").from_env::<DatabaseConfig>()
    }

    /// PostgreSQL connection options.
    pub fn connect_options(&self) -> PgConnectOptions {
        let port: u16 = self.port.parse().unwrap_or(5432);

        PgConnectOptions::new()
            .host(&self.host)
            .port(port)
            .username(&self.user)
            .password(&self.password)
            .database(&self.database)
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            user: default_user(),
            password: String::new(),
            database: default_database(),
            max_connections: default_max_connections(),
            acquire_timeout: default_acquire_timeout(),
        }
    }
}

/// Outbound mail configuration.
#[derive(Debug, Clone)]
pub struct MailConfig {
    /// HTTP mail relay endpoint. Mail is only logged when unset.
    pub relay_url: Option<String>,

    /// Bearer token for the relay.
    pub relay_token: Option<String>,

    /// Sender address.
    pub from: String,

    /// Relay request timeout.
    pub timeout: Duration,
}

impl MailConfig {
    /// Load configuration from `MAIL_*` environment variables.
    pub fn from_env() -> Self {
        Self {
            relay_url: std::env::var("MAIL_RELAY_URL").ok().filter(|s| !s.is_empty()),
            relay_token: std::env::var("MAIL_RELAY_TOKEN").ok().filter(|s| !s.is_empty()),
            from: env_or("MAIL_FROM", "noreply@localhost"),
            timeout: Duration::from_secs(env_parse("MAIL_TIMEOUT_SECS", 10)),
        }
    }
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            relay_url: None,
            relay_token: None,
            from: "noreply@localhost".to_string(),
            timeout: Duration::from_secs(10),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = WorkerConfig::default();
        assert_eq!(config.stream, "workflow_events");
        assert_eq!(config.group, "workflow_workers");
        assert_eq!(config.consumer, "worker_1");
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.block, Duration::from_millis(1000));
        assert_eq!(config.malformed_policy, MalformedPolicy::Leave);
    }

    #[test]
    fn test_backend_parsing() {
        assert_eq!("redis".parse::<EventLogBackend>().unwrap(), EventLogBackend::Redis);
        assert_eq!("NATS".parse::<EventLogBackend>().unwrap(), EventLogBackend::Nats);
        assert!("kafka".parse::<EventLogBackend>().is_err());
        assert_eq!("postgresql".parse::<StoreBackend>().unwrap(), StoreBackend::Postgres);
    }

    #[test]
    fn test_malformed_policy_parsing() {
        assert_eq!("ack".parse::<MalformedPolicy>().unwrap(), MalformedPolicy::Acknowledge);
        assert_eq!(
            "dead_letter".parse::<MalformedPolicy>().unwrap(),
            MalformedPolicy::DeadLetter
        );
        assert!("drop".parse::<MalformedPolicy>().is_err());
    }

    #[test]
    fn test_database_default() {
        let config = DatabaseConfig::default();
        assert_eq!(config.host, "localhost");
        assert_eq!(config.database, "eventflow");
        assert_eq!(config.max_connections, 5);
    }

    #[test]
    fn test_mail_default_logs_only() {
        let config = MailConfig::default();
        assert!(config.relay_url.is_none());
        assert_eq!(config.timeout, Duration::from_secs(10));
    }
}
