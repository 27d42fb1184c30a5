//! Worker lifecycle and backend wiring.

use std::sync::Arc;

use anyhow::{bail, Result};
use eventflow_engine::{ActionDispatcher, EmailTransport, InMemoryWorkflowStore, WorkflowStore};
use tokio_util::sync::CancellationToken;

use crate::config::{DatabaseConfig, EventLogBackend, MailConfig, StoreBackend, WorkerConfig};
use crate::consumer::{ConsumerSettings, EventConsumer};
use crate::db::{create_pool, health_check, PgWorkflowStore};
use crate::mail::transport_from_config;
use crate::stream::{EventLog, InMemoryEventLog, NatsEventLog, RedisEventLog};

/// Event worker: one consumer identity in a consumer group.
pub struct Worker {
    config: WorkerConfig,
    consumer: EventConsumer,
}

impl Worker {
    /// Assemble a worker from already connected collaborators.
    pub fn new(
        config: WorkerConfig,
        log: Arc<dyn EventLog>,
        store: Arc<dyn WorkflowStore>,
        transport: Arc<dyn EmailTransport>,
    ) -> Self {
        let consumer = EventConsumer::new(
            log,
            store,
            ActionDispatcher::new(transport),
            ConsumerSettings::from(&config),
        );
        Self { config, consumer }
    }

    /// Connect the configured backends and create a worker.
    pub async fn connect(config: WorkerConfig, mail: &MailConfig) -> Result<Self> {
        let log = connect_event_log(&config).await?;
        let store = connect_store(&config).await?;
        let transport = transport_from_config(mail);
        Ok(Self::new(config, log, store, transport))
    }

    /// Consume events until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let hostname = hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "unknown".to_string());

        tracing::info!(
            stream = %self.config.stream,
            group = %self.config.group,
            consumer = %self.config.consumer,
            hostname = %hostname,
            "Worker started"
        );

        self.consumer.run(cancel).await?;

        tracing::info!(consumer = %self.config.consumer, "Worker stopped");
        Ok(())
    }
}

/// Connect the configured event log backend.
pub async fn connect_event_log(config: &WorkerConfig) -> Result<Arc<dyn EventLog>> {
    let log: Arc<dyn EventLog> = match config.event_log {
        EventLogBackend::Redis => Arc::new(
            RedisEventLog::connect(&config.redis_url, &config.stream, &config.group, &config.consumer)
                .await?
                .with_maxlen(config.stream_maxlen)
                .with_dead_letter_stream(config.dead_letter_stream.clone()),
        ),
        EventLogBackend::Nats => Arc::new(
            NatsEventLog::connect(&config.nats_url, &config.stream, &config.group, &config.consumer)
                .await?
                .with_maxlen(config.stream_maxlen)
                .with_dead_letter_stream(config.dead_letter_stream.clone()),
        ),
        EventLogBackend::Memory => {
            tracing::warn!("Using in-memory event log; events are lost on exit");
            Arc::new(
                InMemoryEventLog::new(&config.stream, &config.group, &config.consumer)
                    .with_maxlen(config.stream_maxlen)
                    .with_dead_letter_stream(config.dead_letter_stream.clone()),
            )
        }
    };

    tracing::info!(backend = log.name(), stream = %config.stream, "Event log connected");
    Ok(log)
}

/// Connect the configured workflow store.
pub async fn connect_store(config: &WorkerConfig) -> Result<Arc<dyn WorkflowStore>> {
    match config.store {
        StoreBackend::Postgres => {
            let db = DatabaseConfig::from_env()?;
            let pool = create_pool(&db).await?;
            if !health_check(&pool).await {
                bail!("Database {}:{}/{} is not answering queries", db.host, db.port, db.database);
            }
            let store = PgWorkflowStore::new(pool);
            store.ensure_schema().await?;
            Ok(Arc::new(store))
        }
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory workflow store; definitions and instances are lost on exit");
            Ok(Arc::new(InMemoryWorkflowStore::new()))
        }
    }
}
