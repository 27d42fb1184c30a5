//! NATS JetStream event log.
//!
//! The consumer group maps to a durable pull consumer with explicit ack.
//! JetStream has no per-consumer pending read, so messages delivered to this
//! process and not yet acknowledged are held locally and yielded again first
//! on the next read.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_nats::jetstream::{self, consumer::pull::Config as ConsumerConfig, Context};
use async_trait::async_trait;
use eventflow_engine::Event;
use futures::StreamExt;
use parking_lot::Mutex;

use super::{dead_letter_fields, encode_event, EventLog, StreamEntry, StreamError};

type PullConsumer = jetstream::consumer::Consumer<ConsumerConfig>;

/// Event log on a JetStream stream.
pub struct NatsEventLog {
    js: Context,
    stream: String,
    subject: String,
    dead_letter_subject: String,
    group: String,
    consumer_name: String,
    maxlen: usize,
    consumer: Mutex<Option<PullConsumer>>,
    held: Mutex<BTreeMap<u64, jetstream::Message>>,
}

impl NatsEventLog {
    /// Connect to NATS and bind to `(stream, group, consumer)`.
    pub async fn connect(
        nats_url: &str,
        stream: &str,
        group: &str,
        consumer: &str,
    ) -> Result<Self, StreamError> {
        let client = async_nats::connect(nats_url).await.map_err(nats_err)?;
        let js = jetstream::new(client);

        Ok(Self {
            js,
            stream: stream.to_string(),
            subject: events_subject(stream),
            dead_letter_subject: format!("{}.dead", stream),
            group: group.to_string(),
            consumer_name: consumer.to_string(),
            maxlen: 10_000,
            consumer: Mutex::new(None),
            held: Mutex::new(BTreeMap::new()),
        })
    }

    pub fn with_maxlen(mut self, maxlen: usize) -> Self {
        self.maxlen = maxlen.max(1);
        self
    }

    pub fn with_dead_letter_stream(mut self, subject: impl Into<String>) -> Self {
        self.dead_letter_subject = subject.into();
        self
    }

    fn pull_consumer(&self) -> Result<PullConsumer, StreamError> {
        self.consumer
            .lock()
            .clone()
            .ok_or_else(|| StreamError::MissingGroup(self.group.clone()))
    }

    fn held_entries(&self, count: usize) -> Vec<StreamEntry> {
        self.held
            .lock()
            .iter()
            .take(count)
            .map(|(seq, msg)| StreamEntry::new(seq.to_string(), decode_fields(&msg.payload)))
            .collect()
    }

    async fn publish_fields(
        &self,
        subject: &str,
        fields: Vec<(String, String)>,
    ) -> Result<String, StreamError> {
        let body: HashMap<String, String> = fields.into_iter().collect();
        let payload = serde_json::to_vec(&body)?;

        let ack = self
            .js
            .publish(subject.to_string(), payload.into())
            .await
            .map_err(nats_err)?
            .await
            .map_err(nats_err)?;

        Ok(ack.sequence.to_string())
    }
}

#[async_trait]
impl EventLog for NatsEventLog {
    fn name(&self) -> &'static str {
        "nats"
    }

    async fn ensure_group(&self) -> Result<(), StreamError> {
        let stream = match self.js.get_stream(&self.stream).await {
            Ok(stream) => {
                tracing::debug!(stream = %self.stream, "Using existing NATS stream");
                stream
            }
            Err(_) => {
                let config = jetstream::stream::Config {
                    name: self.stream.clone(),
                    subjects: vec![self.subject.clone(), self.dead_letter_subject.clone()],
                    max_messages: self.maxlen as i64,
                    ..Default::default()
                };
                let stream = self.js.create_stream(config).await.map_err(nats_err)?;
                tracing::info!(stream = %self.stream, "Created NATS stream");
                stream
            }
        };

        let consumer = match stream.get_consumer(&self.group).await {
            Ok(consumer) => consumer,
            Err(_) => {
                let config = ConsumerConfig {
                    durable_name: Some(self.group.clone()),
                    filter_subject: self.subject.clone(),
                    ..Default::default()
                };
                let consumer = stream.create_consumer(config).await.map_err(nats_err)?;
                tracing::info!(group = %self.group, "Created NATS consumer");
                consumer
            }
        };

        *self.consumer.lock() = Some(consumer);
        Ok(())
    }

    async fn read(&self, count: usize, block: Duration) -> Result<Vec<StreamEntry>, StreamError> {
        if count == 0 {
            return Ok(Vec::new());
        }

        let consumer = self.pull_consumer()?;
        let mut entries = self.held_entries(count);
        if entries.len() >= count {
            return Ok(entries);
        }

        let remaining = count - entries.len();
        let mut messages = if entries.is_empty() && !block.is_zero() {
            consumer
                .batch()
                .max_messages(remaining)
                .expires(block)
                .messages()
                .await
                .map_err(nats_err)?
        } else {
            consumer
                .fetch()
                .max_messages(remaining)
                .messages()
                .await
                .map_err(nats_err)?
        };

        while let Some(message) = messages.next().await {
            let message = message.map_err(nats_err)?;
            let seq = message.info().map_err(nats_err)?.stream_sequence;
            let fields = decode_fields(&message.payload);

            // Server-side redelivery of a message already held replaces it
            let redelivered = self.held.lock().insert(seq, message).is_some();
            if redelivered && entries.iter().any(|e| e.id == seq.to_string()) {
                continue;
            }
            entries.push(StreamEntry::new(seq.to_string(), fields));
        }

        Ok(entries)
    }

    async fn ack(&self, id: &str) -> Result<(), StreamError> {
        let seq: u64 = id
            .parse()
            .map_err(|_| StreamError::InvalidId(id.to_string()))?;

        let Some(message) = self.held.lock().remove(&seq) else {
            return Ok(());
        };

        if let Err(e) = message.ack().await {
            self.held.lock().insert(seq, message);
            return Err(nats_err(e));
        }

        Ok(())
    }

    async fn pending_count(&self) -> Result<usize, StreamError> {
        Ok(self.held.lock().len())
    }

    async fn publish(&self, event: &Event) -> Result<String, StreamError> {
        let fields = encode_event(event)?;
        self.publish_fields(&self.subject, fields).await
    }

    async fn dead_letter(&self, entry: &StreamEntry, reason: &str) -> Result<(), StreamError> {
        let fields = dead_letter_fields(entry, reason);
        self.publish_fields(&self.dead_letter_subject, fields).await?;
        Ok(())
    }
}

impl std::fmt::Debug for NatsEventLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NatsEventLog")
            .field("stream", &self.stream)
            .field("group", &self.group)
            .field("consumer", &self.consumer_name)
            .finish()
    }
}

fn events_subject(stream: &str) -> String {
    format!("{}.events", stream)
}

/// Entry fields from a JSON object body. Non-string values are kept as JSON text.
fn decode_fields(payload: &[u8]) -> HashMap<String, String> {
    match serde_json::from_slice::<serde_json::Map<String, serde_json::Value>>(payload) {
        Ok(body) => body
            .into_iter()
            .map(|(k, v)| match v {
                serde_json::Value::String(s) => (k, s),
                other => (k, other.to_string()),
            })
            .collect(),
        Err(e) => {
            tracing::debug!(error = %e, "NATS message body is not a JSON object");
            HashMap::new()
        }
    }
}

fn nats_err<E: std::fmt::Display>(e: E) -> StreamError {
    StreamError::Nats(e.to_string())
}
