//! relay-replay CLI
//!
//! Runs one replay loop per configured task against a shared target pool.

use anyhow::Context;
use clap::Parser;
use relay_core::config::ObservabilityConfig;
use relay_core::prelude::*;
use relay_replay::{HttpDeliveryClient, MySqlExecutor, ReplayEngine, StatementExecutor};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "relay-replay")]
#[command(about = "Replays relayed binlog changes against a target database")]
#[command(version)]
struct Args {
    /// Configuration file (toml, yaml or json)
    #[arg(long, short, env = "BINLOG_RELAY_CONFIG")]
    config: Option<String>,

    /// Delivery endpoint base URL
    #[arg(long, env = "BINLOG_RELAY_ENDPOINT")]
    endpoint: Option<String>,

    /// Target database URL
    #[arg(long, env = "BINLOG_RELAY_TARGET_URL")]
    target_url: Option<String>,

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
    if let Some(endpoint) = args.endpoint {
        config.replay.endpoint = endpoint;
    }
    if let Some(url) = args.target_url {
        config.replay.target.url = Some(url);
    }
    if let Some(level) = args.log_level {
        config.observability.log_level = level;
    }

    init_tracing(&config.observability);
    info!(version = env!("CARGO_PKG_VERSION"), "Starting relay-replay");

    let replay = &config.replay;
    replay.validate()?;
    let target_url = replay
        .target
        .url
        .as_deref()
        .context("replay.target.url is not set")?;

    let executor = Arc::new(MySqlExecutor::from_url(target_url, replay.statement_timeout)?);
    executor.start().await?;
    let source: Arc<dyn DeliverySource> =
        Arc::new(HttpDeliveryClient::new(&replay.endpoint, replay.request_timeout)?);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut handles = Vec::with_capacity(replay.tasks.len());
    for task in &replay.tasks {
        let engine = ReplayEngine::new(
            task.clone(),
            source.clone(),
            executor.clone() as Arc<dyn StatementExecutor>,
            replay.poll_interval,
        );
        let mut rx = shutdown_rx.clone();
        handles.push(tokio::spawn(async move {
            engine
                .run_until(async move {
                    let _ = rx.wait_for(|stopped| *stopped).await;
                })
                .await
        }));
    }
    info!(tasks = handles.len(), endpoint = %replay.endpoint, "Replay tasks started");

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
    let _ = shutdown_tx.send(true);

    for handle in handles {
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "Replay task failed"),
            Err(e) => error!(error = %e, "Replay task panicked"),
        }
    }

    if let Err(e) = executor.stop().await {
        warn!(error = %e, "Failed to close target pool");
    }
    info!("relay-replay stopped");
    Ok(())
}
