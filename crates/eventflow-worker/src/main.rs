//! EventFlow Worker binary.
//!
//! Runs an event consumer, or one of the operator commands.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use eventflow_worker::cli::{self, Cli};
use eventflow_worker::WorkerConfig;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    init_tracing();

    let cli = Cli::parse();

    let config = WorkerConfig::from_env()?;
    tracing::debug!(
        backend = ?config.event_log,
        stream = %config.stream,
        group = %config.group,
        consumer = %config.consumer,
        store = ?config.store,
        "Worker configuration loaded"
    );

    cli::execute(cli, config).await
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,eventflow_worker=debug,eventflow_engine=debug".into());

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
