//! EventFlow Worker
//!
//! Consumes workflow events from an append-only event log and runs the
//! workflows they trigger.
//!
//! This crate provides:
//! - Event log consumer-group protocol over Redis Streams, NATS JetStream or memory
//! - Event consumer with acknowledge-after-processing delivery
//! - PostgreSQL workflow store
//! - Email transports (HTTP relay, log-only)

pub mod cli;
pub mod config;
pub mod consumer;
pub mod db;
pub mod mail;
pub mod stream;
pub mod worker;

pub use config::{MailConfig, MalformedPolicy, WorkerConfig};
pub use consumer::{ConsumerSettings, EventConsumer, PollStats};
pub use stream::{EventLog, InMemoryEventLog, StreamEntry, StreamError};
pub use worker::Worker;
