//! Event consumer delivery loop.
//!
//! A message is acknowledged only after every matching workflow ran (or failed
//! for reasons of its own). Infrastructure failures leave it pending so the
//! next poll redelivers it.

use std::sync::Arc;
use std::time::Duration;

use eventflow_engine::{
    ActionDispatcher, Event, StepExecutor, StepOutcome, WorkflowMatcher, WorkflowStore,
};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use crate::config::{MalformedPolicy, WorkerConfig};
use crate::stream::{EventLog, StreamEntry, StreamError, FIELD_EVENT_TYPE, FIELD_ORG_ID, FIELD_PAYLOAD};

/// Delivery loop settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsumerSettings {
    /// Maximum entries per read.
    pub batch_size: usize,

    /// Blocking read timeout.
    pub block: Duration,

    /// Sleep after an empty or failed poll.
    pub idle: Duration,

    /// Malformed message handling.
    pub malformed_policy: MalformedPolicy,
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            batch_size: 10,
            block: Duration::from_millis(1000),
            idle: Duration::from_millis(1000),
            malformed_policy: MalformedPolicy::Leave,
        }
    }
}

impl From<&WorkerConfig> for ConsumerSettings {
    fn from(config: &WorkerConfig) -> Self {
        Self {
            batch_size: config.batch_size,
            block: config.block,
            idle: config.idle,
            malformed_policy: config.malformed_policy,
        }
    }
}

/// Counters for one poll cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollStats {
    /// Entries returned by the read.
    pub delivered: usize,
    /// Entries acknowledged, including dropped malformed ones.
    pub acknowledged: usize,
    /// Entries whose event could not be decoded.
    pub malformed: usize,
    /// Entries left pending after an infrastructure failure.
    pub failed: usize,
}

enum Disposition {
    Acknowledge,
    Malformed(String),
    Retry,
}

/// Consumes events and runs matching workflows.
pub struct EventConsumer {
    log: Arc<dyn EventLog>,
    store: Arc<dyn WorkflowStore>,
    matcher: WorkflowMatcher,
    executor: StepExecutor,
    settings: ConsumerSettings,
}

impl EventConsumer {
    /// Create a new consumer.
    pub fn new(
        log: Arc<dyn EventLog>,
        store: Arc<dyn WorkflowStore>,
        dispatcher: ActionDispatcher,
        settings: ConsumerSettings,
    ) -> Self {
        let executor = StepExecutor::new(Arc::clone(&store), dispatcher);
        Self {
            log,
            store,
            matcher: WorkflowMatcher::new(),
            executor,
            settings,
        }
    }

    /// Poll until `cancel` fires.
    ///
    /// Cancellation is observed between cycles and while waiting; a batch
    /// being processed is always finished first.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), StreamError> {
        self.log.ensure_group().await?;

        tracing::info!(
            backend = self.log.name(),
            batch_size = self.settings.batch_size,
            policy = ?self.settings.malformed_policy,
            "Event consumer started"
        );

        while !cancel.is_cancelled() {
            let read = tokio::select! {
                _ = cancel.cancelled() => break,
                read = self.log.read(self.settings.batch_size, self.settings.block) => read,
            };

            let idle = match read {
                Ok(entries) if entries.is_empty() => true,
                Ok(entries) => {
                    let stats = self.process_batch(&entries).await;
                    tracing::debug!(
                        delivered = stats.delivered,
                        acknowledged = stats.acknowledged,
                        malformed = stats.malformed,
                        failed = stats.failed,
                        "Batch processed"
                    );
                    false
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to read from event log");
                    self.recover_group().await;
                    true
                }
            };

            if idle {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(self.settings.idle) => {}
                }
            }
        }

        tracing::info!("Event consumer stopped");
        Ok(())
    }

    /// Recreate the stream and group after a failed read.
    async fn recover_group(&self) {
        if let Err(e) = self.log.ensure_group().await {
            tracing::warn!(error = %e, "Failed to recreate consumer group");
        }
    }

    /// Run a single read-and-process cycle without blocking.
    pub async fn poll_once(&self) -> Result<PollStats, StreamError> {
        let entries = self
            .log
            .read(self.settings.batch_size, Duration::ZERO)
            .await?;
        Ok(self.process_batch(&entries).await)
    }

    async fn process_batch(&self, entries: &[StreamEntry]) -> PollStats {
        let mut stats = PollStats {
            delivered: entries.len(),
            ..Default::default()
        };

        for entry in entries {
            match self.handle_entry(entry).await {
                Disposition::Acknowledge => match self.log.ack(&entry.id).await {
                    Ok(()) => stats.acknowledged += 1,
                    Err(e) => {
                        tracing::error!(message_id = %entry.id, error = %e, "Failed to acknowledge message");
                        stats.failed += 1;
                    }
                },
                Disposition::Malformed(reason) => {
                    stats.malformed += 1;
                    if self.handle_malformed(entry, &reason).await {
                        stats.acknowledged += 1;
                    }
                }
                Disposition::Retry => stats.failed += 1,
            }
        }

        stats
    }

    async fn handle_entry(&self, entry: &StreamEntry) -> Disposition {
        let event = match decode_event(entry) {
            Ok(event) => event,
            Err(reason) => return Disposition::Malformed(reason),
        };

        let definitions = match self.store.active_definitions().await {
            Ok(definitions) => definitions,
            Err(e) => {
                tracing::error!(message_id = %entry.id, error = %e, "Failed to load workflow definitions");
                return Disposition::Retry;
            }
        };

        let matches = self
            .matcher
            .find_matching(&event.event_type, &event.payload, &definitions);

        if matches.is_empty() {
            tracing::info!(
                message_id = %entry.id,
                event_type = %event.event_type,
                "No matching workflows"
            );
            return Disposition::Acknowledge;
        }

        let mut infrastructure_failed = false;

        for definition in matches {
            match self
                .executor
                .run(definition, &event.payload, Some(entry.id.as_str()))
                .await
            {
                Ok(Some(report)) => {
                    let instance_failed = matches!(
                        report.outcome,
                        StepOutcome::StepNotFound { .. } | StepOutcome::CycleDetected { .. }
                    );
                    if instance_failed {
                        tracing::warn!(
                            message_id = %entry.id,
                            workflow_id = %definition.id,
                            instance_id = %report.instance.id,
                            outcome = ?report.outcome,
                            "Workflow instance failed"
                        );
                    } else {
                        tracing::info!(
                            message_id = %entry.id,
                            workflow_id = %definition.id,
                            instance_id = %report.instance.id,
                            status = %report.instance.status,
                            "Workflow executed"
                        );
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::error!(
                        message_id = %entry.id,
                        workflow_id = %definition.id,
                        error = %e,
                        "Workflow execution failed"
                    );
                    infrastructure_failed |= e.is_infrastructure();
                }
            }
        }

        if infrastructure_failed {
            Disposition::Retry
        } else {
            Disposition::Acknowledge
        }
    }

    /// Apply the malformed policy. Returns true if the message was acknowledged.
    async fn handle_malformed(&self, entry: &StreamEntry, reason: &str) -> bool {
        tracing::warn!(
            message_id = %entry.id,
            reason = %reason,
            policy = ?self.settings.malformed_policy,
            "Malformed message"
        );

        match self.settings.malformed_policy {
            MalformedPolicy::Leave => false,
            MalformedPolicy::Acknowledge => self.try_ack(entry).await,
            MalformedPolicy::DeadLetter => match self.log.dead_letter(entry, reason).await {
                Ok(()) => self.try_ack(entry).await,
                Err(e) => {
                    tracing::error!(message_id = %entry.id, error = %e, "Failed to dead-letter message");
                    false
                }
            },
        }
    }

    async fn try_ack(&self, entry: &StreamEntry) -> bool {
        match self.log.ack(&entry.id).await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(message_id = %entry.id, error = %e, "Failed to acknowledge message");
                false
            }
        }
    }
}

/// Decode the event carried by a log entry.
///
/// Both `event_type` and `payload` are required, and the payload must be a
/// JSON object.
pub fn decode_event(entry: &StreamEntry) -> Result<Event, String> {
    let event_type = entry
        .field(FIELD_EVENT_TYPE)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| "missing event_type".to_string())?;

    let raw = entry
        .field(FIELD_PAYLOAD)
        .filter(|p| !p.is_empty())
        .ok_or_else(|| "missing payload".to_string())?;

    let payload: Map<String, Value> = match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(payload)) => payload,
        Ok(_) => return Err("payload is not a JSON object".to_string()),
        Err(e) => return Err(format!("invalid payload: {}", e)),
    };

    let org_id = entry
        .field(FIELD_ORG_ID)
        .filter(|o| !o.is_empty())
        .unwrap_or("0");

    Ok(Event::new(event_type, payload).with_org_id(org_id))
}
