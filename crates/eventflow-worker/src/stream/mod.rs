//! Event log consumer-group protocol.
//!
//! The log is bound to one `(stream, group, consumer)` identity. Reads return
//! this consumer's delivered-but-unacknowledged entries first, then fill the
//! rest of the batch with newly available entries.

mod memory;
mod nats;
mod redis;

pub use self::memory::InMemoryEventLog;
pub use self::nats::NatsEventLog;
pub use self::redis::RedisEventLog;

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use eventflow_engine::Event;
use thiserror::Error;

/// Field holding the event type.
pub const FIELD_EVENT_TYPE: &str = "event_type";
/// Field holding the JSON-encoded payload.
pub const FIELD_PAYLOAD: &str = "payload";
/// Field holding the organization id.
pub const FIELD_ORG_ID: &str = "org_id";
/// Field added to dead-lettered entries.
pub const FIELD_REASON: &str = "reason";
/// Field added to dead-lettered entries.
pub const FIELD_ORIGINAL_ID: &str = "original_id";

/// Event log errors.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("Redis error: {0}")]
    Redis(#[from] ::redis::RedisError),

    #[error("NATS error: {0}")]
    Nats(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid message id: {0}")]
    InvalidId(String),

    #[error("Consumer group not found: {0}")]
    MissingGroup(String),
}

/// One delivered log entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEntry {
    pub id: String,
    pub fields: HashMap<String, String>,
}

impl StreamEntry {
    pub fn new(id: impl Into<String>, fields: HashMap<String, String>) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }
}

/// Append-only event log with consumer-group delivery.
#[async_trait]
pub trait EventLog: Send + Sync {
    /// Backend name for logs.
    fn name(&self) -> &'static str;

    /// Create the consumer group (and stream) if missing. Idempotent.
    async fn ensure_group(&self) -> Result<(), StreamError>;

    /// Read up to `count` entries: pending first, then new ones.
    ///
    /// Waits up to `block` for new entries only when nothing is pending.
    async fn read(&self, count: usize, block: Duration) -> Result<Vec<StreamEntry>, StreamError>;

    /// Acknowledge a delivered entry.
    async fn ack(&self, id: &str) -> Result<(), StreamError>;

    /// Number of entries delivered to this consumer and not yet acknowledged.
    async fn pending_count(&self) -> Result<usize, StreamError>;

    /// Append an event, returning its entry id.
    async fn publish(&self, event: &Event) -> Result<String, StreamError>;

    /// Copy an entry to the dead-letter stream with a reason.
    async fn dead_letter(&self, entry: &StreamEntry, reason: &str) -> Result<(), StreamError>;
}

/// Field list stored for an event.
pub fn encode_event(event: &Event) -> Result<Vec<(String, String)>, StreamError> {
    Ok(vec![
        (FIELD_EVENT_TYPE.to_string(), event.event_type.clone()),
        (FIELD_PAYLOAD.to_string(), serde_json::to_string(&event.payload)?),
        (FIELD_ORG_ID.to_string(), event.org_id.clone()),
    ])
}

/// Field list stored for a dead-lettered entry.
pub fn dead_letter_fields(entry: &StreamEntry, reason: &str) -> Vec<(String, String)> {
    let mut fields: Vec<(String, String)> = entry
        .fields
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    fields.sort();
    fields.push((FIELD_ORIGINAL_ID.to_string(), entry.id.clone()));
    fields.push((FIELD_REASON.to_string(), reason.to_string()));
    fields
}
