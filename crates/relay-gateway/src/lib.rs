//! # Relay Gateway
//!
//! Runs capture and the pull-based delivery endpoint in one process.
//!
//! ## Endpoints
//!
//! - `GET /consume?account=&db=&table=`: drain one task queue
//! - `GET /health`, `/health/live`, `/health/ready`
//! - `GET /stats`
//!
//! ```bash
//! relay-server --config /etc/binlog-relay/relay.toml --feed /var/run/binlog/events.ndjson
//! ```

pub mod delivery;

pub use delivery::*;

use relay_capture::Capture;
use relay_core::config::DeliveryConfig;
use relay_core::prelude::*;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinError;
use tracing::{error, info, warn};

/// Capture plus delivery endpoint
pub struct RelayServer {
    capture: Arc<Capture>,
    config: DeliveryConfig,
}

impl RelayServer {
    pub fn new(capture: Capture, config: DeliveryConfig) -> Self {
        Self {
            capture: Arc::new(capture),
            config,
        }
    }

    pub fn capture(&self) -> &Arc<Capture> {
        &self.capture
    }

    /// Delivery state wired to this server's queues and capture counters
    pub fn delivery_state(&self) -> DeliveryState {
        let capture = self.capture.clone();
        DeliveryState::new(
            self.capture.queues().clone(),
            Arc::new(move || capture.stats()),
        )
    }

    /// Run until ctrl-c.
    ///
    /// When the replication stream ends on its own the endpoint keeps
    /// serving so consumers can drain what is left.
    pub async fn run(&self) -> Result<()> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let server = if self.config.enabled {
            let listener = TcpListener::bind(&self.config.listen).await.map_err(|e| {
                RelayError::transport_with_source(format!("Failed to bind {}", self.config.listen), e)
            })?;
            Some(tokio::spawn(serve(
                listener,
                self.delivery_state(),
                shutdown_requested(shutdown_rx.clone()),
            )))
        } else {
            info!("Delivery endpoint disabled");
            None
        };

        let mut capture_task = {
            let capture = self.capture.clone();
            let rx = shutdown_rx.clone();
            tokio::spawn(async move { capture.run_until(shutdown_requested(rx)).await })
        };

        let result = tokio::select! {
            joined = &mut capture_task => match flatten(joined) {
                Ok(()) if server.is_some() => {
                    info!("Replication stream ended; serving remaining queue content");
                    shutdown_signal().await;
                    Ok(())
                }
                other => other,
            },
            _ = shutdown_signal() => {
                let _ = shutdown_tx.send(true);
                flatten(capture_task.await)
            }
        };

        if let Err(e) = &result {
            error!(error = %e, "Capture failed");
        }

        let _ = shutdown_tx.send(true);
        if let Some(server) = server {
            match server.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "Delivery endpoint error"),
                Err(e) => warn!(error = %e, "Delivery endpoint task failed"),
            }
        }

        info!(stats = ?self.capture.stats(), "Relay server stopped");
        result
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

async fn shutdown_requested(mut rx: watch::Receiver<bool>) {
    // A dropped sender also counts as shutdown
    let _ = rx.wait_for(|stopped| *stopped).await;
}

fn flatten(joined: std::result::Result<Result<()>, JoinError>) -> Result<()> {
    joined.map_err(|e| RelayError::Internal(format!("capture task panicked: {e}")))?
}
