//! Replication client adapters
//!
//! The binlog protocol itself is spoken by an external collaborator. These
//! adapters accept its output in two shapes:
//! - `ChannelReplicationClient`: events pushed through a tokio channel
//! - `LineFeedClient`: NDJSON events read from a file or stdin

use async_stream::stream;
use async_trait::async_trait;
use relay_core::prelude::*;
use relay_core::ReplicationStream;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

// ============================================================================
// Channel Client
// ============================================================================

/// Replication client fed through an in-process channel.
///
/// The sending side is responsible for starting at the requested position.
pub struct ChannelReplicationClient {
    receiver: Mutex<Option<mpsc::Receiver<ReplicationEvent>>>,
    running: AtomicBool,
}

impl ChannelReplicationClient {
    /// Create a client and the sender that feeds it
    pub fn new(buffer: usize) -> (Self, mpsc::Sender<ReplicationEvent>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let client = Self {
            receiver: Mutex::new(Some(rx)),
            running: AtomicBool::new(false),
        };
        (client, tx)
    }
}

#[async_trait]
impl Lifecycle for ChannelReplicationClient {
    async fn start(&self) -> Result<()> {
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HealthCheck for ChannelReplicationClient {
    async fn health_check(&self) -> Result<()> {
        Ok(())
    }

    fn component_name(&self) -> &'static str {
        "channel_feed"
    }
}

#[async_trait]
impl ReplicationClient for ChannelReplicationClient {
    async fn events(&self, start: ResumePosition) -> Result<ReplicationStream> {
        let mut receiver = self
            .receiver
            .lock()
            .await
            .take()
            .ok_or_else(|| RelayError::Internal("event stream already taken".into()))?;

        debug!(start = %start, "Channel feed opened");
        Ok(Box::pin(stream! {
            while let Some(event) = receiver.recv().await {
                yield Ok(event);
            }
        }))
    }
}

// ============================================================================
// Line Feed Client
// ============================================================================

/// Reads one `ReplicationEvent` JSON object per line.
///
/// When resuming, events are skipped until a position sync at or past the
/// resume position has been read.
pub struct LineFeedClient {
    path: String,
    running: AtomicBool,
}

impl LineFeedClient {
    /// `"-"` reads from stdin
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            running: AtomicBool::new(false),
        }
    }

    fn is_stdin(&self) -> bool {
        self.path == "-"
    }

    async fn open(&self) -> Result<Box<dyn AsyncRead + Send + Unpin>> {
        if self.is_stdin() {
            return Ok(Box::new(tokio::io::stdin()));
        }
        let file = tokio::fs::File::open(PathBuf::from(&self.path))
            .await
            .map_err(|e| RelayError::transport_with_source(format!("Failed to open feed {}", self.path), e))?;
        Ok(Box::new(file))
    }
}

#[async_trait]
impl Lifecycle for LineFeedClient {
    async fn start(&self) -> Result<()> {
        self.running.store(true, Ordering::SeqCst);
        info!(path = %self.path, "Line feed started");
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HealthCheck for LineFeedClient {
    async fn health_check(&self) -> Result<()> {
        if self.is_stdin() {
            return Ok(());
        }
        tokio::fs::metadata(&self.path)
            .await
            .map(|_| ())
            .map_err(|e| RelayError::transport_with_source(format!("Feed {} unavailable", self.path), e))
    }

    fn component_name(&self) -> &'static str {
        "line_feed"
    }
}

#[async_trait]
impl ReplicationClient for LineFeedClient {
    async fn events(&self, start: ResumePosition) -> Result<ReplicationStream> {
        let reader = self.open().await?;
        let path = self.path.clone();

        Ok(Box::pin(stream! {
            let mut lines = BufReader::new(reader).lines();
            let mut resumed = start.is_beginning();
            let mut skipped = 0u64;

            loop {
                let line = match lines.next_line().await {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        yield Err(RelayError::transport_with_source(format!("Failed to read feed {path}"), e));
                        break;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }

                let event: ReplicationEvent = match serde_json::from_str(&line) {
                    Ok(event) => event,
                    Err(e) => {
                        yield Err(RelayError::serialization("Malformed feed line", e));
                        continue;
                    }
                };

                if !resumed {
                    if let ReplicationEvent::PositionSynced(position) = &event {
                        if *position >= start {
                            resumed = true;
                            info!(position = %position, skipped, "Resumed line feed");
                        }
                    }
                    skipped += 1;
                    continue;
                }

                yield Ok(event);
            }

            if !resumed {
                warn!(start = %start, skipped, "Feed ended before the resume position");
            }
        }))
    }
}
