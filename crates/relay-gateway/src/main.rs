//! relay-server CLI
//!
//! Captures replication events into per-task queues and serves them on the
//! delivery endpoint.

use anyhow::Context;
use clap::Parser;
use relay_capture::{
    BatchedPositionStore, Capture, ChangeNormalizer, FilePositionStore, LayeredSchemaProvider,
    LineFeedClient, MySqlSchemaProvider, PositionStore, StaticSchemaProvider, TaskQueueStore,
};
use relay_core::prelude::*;
use relay_core::config::ObservabilityConfig;
use relay_gateway::RelayServer;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "relay-server")]
#[command(about = "Binlog change capture with a pull-based delivery endpoint")]
#[command(version)]
struct Args {
    /// Configuration file (toml, yaml or json)
    #[arg(long, short, env = "BINLOG_RELAY_CONFIG")]
    config: Option<String>,

    /// Delivery endpoint listen address
    #[arg(long, env = "BINLOG_RELAY_LISTEN")]
    listen: Option<String>,

    /// Replication event feed (NDJSON file, "-" for stdin)
    #[arg(long, env = "BINLOG_RELAY_FEED")]
    feed: Option<String>,

    #[arg(long, env = "LOG_LEVEL")]
    log_level: Option<String>,
}

fn init_tracing(observability: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&observability.log_level));

    if observability.log_format == "pretty" {
        tracing_subscriber::registry()
            .with(fmt::layer().pretty())
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config =
        RelayConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(listen) = args.listen {
        config.delivery.listen = listen;
    }
    if let Some(feed) = args.feed {
        config.capture.feed.path = feed;
    }
    if let Some(level) = args.log_level {
        config.observability.log_level = level;
    }

    init_tracing(&config.observability);
    info!(version = env!("CARGO_PKG_VERSION"), "Starting relay-server");

    let capture_config = &config.capture;
    capture_config.validate()?;

    // ─────────────────────────────────────────────────────────────────────────
    // Queues and resume position
    // ─────────────────────────────────────────────────────────────────────────
    let queues = Arc::new(
        TaskQueueStore::open(
            &capture_config.queue_dir,
            capture_config.fsync,
            capture_config.subscriptions.iter().cloned(),
        )
        .await?,
    );

    let file_positions: Arc<dyn PositionStore> = Arc::new(
        FilePositionStore::new(&capture_config.checkpoint.path).with_fsync(capture_config.fsync),
    );
    let positions: Arc<dyn PositionStore> = if capture_config.checkpoint.flush_every > 1 {
        Arc::new(BatchedPositionStore::new(
            file_positions,
            capture_config.checkpoint.flush_every,
        ))
    } else {
        file_positions
    };

    // ─────────────────────────────────────────────────────────────────────────
    // Table schemas
    // ─────────────────────────────────────────────────────────────────────────
    let source_schemas = match &capture_config.source.url {
        Some(url) => Some(Arc::new(MySqlSchemaProvider::from_url(url)?)),
        None => None,
    };
    let schemas = LayeredSchemaProvider::new(
        StaticSchemaProvider::from_config(&capture_config.schemas),
        source_schemas
            .clone()
            .map(|provider| provider as Arc<dyn SchemaProvider>),
    );

    let capture = Capture::new(
        Arc::new(LineFeedClient::new(&capture_config.feed.path)),
        ChangeNormalizer::new(Arc::new(schemas)),
        queues,
        positions,
        capture_config.subscriptions.clone(),
    );

    let result = RelayServer::new(capture, config.delivery.clone()).run().await;

    if let Some(provider) = source_schemas {
        if let Err(e) = provider.disconnect().await {
            warn!(error = %e, "Failed to close source pool");
        }
    }
    result?;

    info!("relay-server stopped");
    Ok(())
}
