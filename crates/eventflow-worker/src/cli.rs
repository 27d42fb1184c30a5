//! Command line interface.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use eventflow_engine::{Event, WorkflowDefinition};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use crate::config::{MailConfig, WorkerConfig};
use crate::worker::{connect_event_log, connect_store, Worker};

#[derive(Parser)]
#[command(name = "eventflow-worker")]
#[command(version, about = "EventFlow workflow event worker", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Consume events and run matching workflows until interrupted (default)
    Run,

    /// Append an event to the event stream
    Publish {
        /// Event type, e.g. form_submitted
        #[arg(long)]
        event_type: String,

        /// Event payload as a JSON object
        #[arg(long, value_name = "JSON", default_value = "{}")]
        payload: String,

        /// Organization id
        #[arg(long, default_value = "0")]
        org_id: String,
    },

    /// Print the number of messages delivered to this consumer and not yet acknowledged
    Pending,

    /// Store a workflow definition from a JSON file
    Register {
        /// Path to the definition file
        #[arg(short, long)]
        file: PathBuf,
    },
}

/// Run the selected command.
pub async fn execute(cli: Cli, config: WorkerConfig) -> Result<()> {
    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(config).await,
        Commands::Publish {
            event_type,
            payload,
            org_id,
        } => {
            let event = Event::new(event_type, parse_payload(&payload)?).with_org_id(org_id);
            let log = connect_event_log(&config).await?;
            let id = log.publish(&event).await?;
            println!("{}", id);
            Ok(())
        }
        Commands::Pending => {
            let log = connect_event_log(&config).await?;
            log.ensure_group().await?;
            println!("{}", log.pending_count().await?);
            Ok(())
        }
        Commands::Register { file } => {
            let definition = load_definition(&file)?;
            let store = connect_store(&config).await?;
            store.save_definition(&definition).await?;
            tracing::info!(workflow_id = %definition.id, name = %definition.name, "Workflow registered");
            println!("{}", definition.id);
            Ok(())
        }
    }
}

async fn run(config: WorkerConfig) -> Result<()> {
    let worker = Worker::connect(config, &MailConfig::from_env()).await?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Shutdown signal received");
                on_signal.cancel();
            }
            Err(e) => tracing::error!(error = %e, "Failed to install CTRL+C handler"),
        }
    });

    worker.run(cancel).await
}

fn parse_payload(raw: &str) -> Result<Map<String, Value>> {
    match serde_json::from_str::<Value>(raw).context("Payload is not valid JSON")? {
        Value::Object(payload) => Ok(payload),
        other => bail!("Payload must be a JSON object, got {}", other),
    }
}

/// Read a definition file. `id` is generated and `name` defaults to the id
/// when absent.
fn load_definition(path: &Path) -> Result<WorkflowDefinition> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    parse_definition(&content)
}

fn parse_definition(content: &str) -> Result<WorkflowDefinition> {
    let value: Value = serde_json::from_str(content).context("Definition is not valid JSON")?;
    let Value::Object(object) = &value else {
        bail!("Definition must be a JSON object");
    };

    let id = object
        .get("id")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let name = object
        .get("name")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| id.clone());
    let is_active = object
        .get("is_active")
        .and_then(Value::as_bool)
        .unwrap_or(true);

    WorkflowDefinition::from_parts(id.clone(), name, is_active, value)
        .with_context(|| format!("Workflow definition {} was not registered", id))
}
