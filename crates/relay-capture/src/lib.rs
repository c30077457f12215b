//! # Relay Capture
//!
//! Normalizes replication events, fans them out to per-task queues and
//! tracks the resume position.
//!
//! ## Components
//!
//! - `ChangeNormalizer`: row event to `ChangeRecord`
//! - `TaskQueueStore`: one `.blog` segment per task identity
//! - `PositionStore`: file, memory and batched resume-position stores
//! - `ChannelReplicationClient` / `LineFeedClient`: replication client adapters
//!
//! ## Usage
//!
//! ```rust,ignore
//! let capture = Capture::new(client, normalizer, queues, positions, subscriptions);
//! capture.run().await?;
//! ```

pub mod checkpoint;
pub mod feed;
pub mod normalizer;
pub mod queue;
pub mod schema;

pub use checkpoint::*;
pub use feed::*;
pub use normalizer::*;
pub use queue::*;
pub use schema::*;

use async_trait::async_trait;
use futures::StreamExt;
use relay_core::prelude::*;
use relay_core::CaptureMetrics;
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Counters reported by `/stats`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CaptureStats {
    pub running: bool,
    pub captured: u64,
    pub dropped: u64,
    pub checkpoints_saved: u64,
    pub checkpoints_held: u64,
}

/// Main capture orchestrator
pub struct Capture {
    client: Arc<dyn ReplicationClient>,
    normalizer: ChangeNormalizer,
    queues: Arc<TaskQueueStore>,
    positions: Arc<dyn PositionStore>,
    subscriptions: Vec<TaskIdentity>,
    metrics: CaptureMetrics,
    running: AtomicBool,
    captured: AtomicU64,
    dropped: AtomicU64,
    saved: AtomicU64,
    held: AtomicU64,
}

impl Capture {
    pub fn new(
        client: Arc<dyn ReplicationClient>,
        normalizer: ChangeNormalizer,
        queues: Arc<TaskQueueStore>,
        positions: Arc<dyn PositionStore>,
        subscriptions: Vec<TaskIdentity>,
    ) -> Self {
        Self {
            client,
            normalizer,
            queues,
            positions,
            subscriptions,
            metrics: CaptureMetrics::new("capture"),
            running: AtomicBool::new(false),
            captured: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            saved: AtomicU64::new(0),
            held: AtomicU64::new(0),
        }
    }

    pub fn queues(&self) -> &Arc<TaskQueueStore> {
        &self.queues
    }

    /// Run until ctrl-c or the end of the replication stream
    pub async fn run(&self) -> Result<()> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Run until `shutdown` resolves or the replication stream ends
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        info!(subscriptions = self.subscriptions.len(), "Starting capture");

        for task in &self.subscriptions {
            self.queues.register(task.clone()).await?;
        }

        self.client.start().await?;
        self.running.store(true, Ordering::SeqCst);

        let start = self.positions.load().await?;
        let mut stream = self.client.events(start.clone()).await?;
        info!(start = %start, client = self.client.component_name(), "Replication stream opened");

        tokio::pin!(shutdown);
        // Set when an event since the last persisted position was lost
        let mut hold = false;

        while self.running.load(Ordering::SeqCst) {
            tokio::select! {
                next = stream.next() => {
                    match next {
                        Some(Ok(ReplicationEvent::Row(event))) => {
                            if let Err(e) = self.handle_row(&event).await {
                                error!(table = %event.table, action = %event.action, error = %e, "Dropped row event");
                                self.record_dropped(&e);
                                hold = true;
                            }
                        }
                        Some(Ok(ReplicationEvent::PositionSynced(position))) => {
                            self.on_position_synced(&position, &mut hold).await;
                        }
                        Some(Err(e)) => {
                            error!(error = %e, "Error in replication stream");
                            self.record_dropped(&e);
                            hold = true;
                        }
                        None => {
                            info!("Replication stream ended");
                            break;
                        }
                    }
                }
                _ = &mut shutdown => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);

        // Cleanup
        self.positions.flush().await?;
        self.client.stop().await?;

        let stats = self.stats();
        info!(
            captured = stats.captured,
            dropped = stats.dropped,
            checkpoints_held = stats.checkpoints_held,
            "Capture stopped"
        );
        Ok(())
    }

    async fn on_position_synced(&self, position: &ResumePosition, hold: &mut bool) {
        if *hold {
            warn!(
                position = %position,
                "Checkpoint held: an event before this position was dropped"
            );
            self.metrics.record_checkpoint_held();
            self.held.fetch_add(1, Ordering::Relaxed);
            *hold = false;
            return;
        }

        match self.positions.save(position).await {
            Ok(()) => {
                self.metrics.record_checkpoint_saved();
                self.saved.fetch_add(1, Ordering::Relaxed);
                debug!(position = %position, "Position synced");
            }
            Err(e) => warn!(error = %e, position = %position, "Failed to save position"),
        }
    }

    fn record_dropped(&self, e: &RelayError) {
        self.metrics.record_dropped(e.kind());
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Stop the capture loop at the next event
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> CaptureStats {
        CaptureStats {
            running: self.is_running(),
            captured: self.captured.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            checkpoints_saved: self.saved.load(Ordering::Relaxed),
            checkpoints_held: self.held.load(Ordering::Relaxed),
        }
    }
}

#[async_trait]
impl RowEventHandler for Capture {
    /// Normalize once, then append to every subscribed task in order
    async fn handle_row(&self, event: &RowEvent) -> Result<()> {
        let targets: Vec<&TaskIdentity> = self
            .subscriptions
            .iter()
            .filter(|task| task.watches(&event.table))
            .collect();
        if targets.is_empty() {
            return Ok(());
        }

        let record = self.normalizer.normalize(event).await?;
        let line = record.to_line()?;

        let start = Instant::now();
        for task in targets {
            self.queues.append(task, &line).await?;
        }
        self.metrics.record_append_latency(start.elapsed());

        self.metrics.record_captured(&record.table, record.action.as_str());
        self.captured.fetch_add(1, Ordering::Relaxed);
        debug!(table = %record.table, action = %record.action, "Captured change");
        Ok(())
    }
}
