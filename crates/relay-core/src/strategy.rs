//! Strategy Pattern Traits for binlog-relay
//!
//! The seams of the pipeline. Each trait is one pluggable collaborator:
//!
//! ```text
//! Lifecycle (start/stop)
//!     │
//!     ├── ReplicationClient (produces row events + position syncs)
//!     │       └── ChannelReplicationClient, LineFeedClient, ...
//!     │
//!     ├── DeliverySource (pulls drained payloads for one task)
//!     │       └── HttpDeliveryClient, ...
//!     │
//!     └── (replay side) StatementExecutor in relay-replay
//!
//! RowEventHandler   accepts one normalized row-mutation event
//! SchemaProvider    column + primary-key layout per table
//! ```

use crate::error::Result;
use crate::event::{ReplicationEvent, ResumePosition, RowEvent};
use crate::record::{TableRef, TableSchema, TaskIdentity};
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::pin::Pin;

/// Type alias for boxed async streams of replication events
pub type ReplicationStream = Pin<Box<dyn Stream<Item = Result<ReplicationEvent>> + Send>>;

// ============================================================================
// Lifecycle Management
// ============================================================================

/// Lifecycle management for components
///
/// Provides graceful startup and shutdown semantics.
#[async_trait]
pub trait Lifecycle: Send + Sync {
    /// Start the component
    async fn start(&self) -> Result<()>;

    /// Stop the component gracefully
    ///
    /// May be called even if start() failed.
    async fn stop(&self) -> Result<()>;

    /// Check if the component is running
    fn is_running(&self) -> bool;
}

/// Health check capability
#[async_trait]
pub trait HealthCheck: Send + Sync {
    /// Returns Ok(()) if healthy, Err with details if not.
    async fn health_check(&self) -> Result<()>;

    /// Get component name for health reporting
    fn component_name(&self) -> &'static str;
}

// ============================================================================
// Capture Side
// ============================================================================

/// Replication client collaborator
///
/// Wraps whatever speaks the source database's replication protocol. Events
/// must be yielded in source commit order.
#[async_trait]
pub trait ReplicationClient: Lifecycle + HealthCheck {
    /// Stream events starting at `start`
    ///
    /// `ResumePosition::beginning()` means the start of the stream.
    async fn events(&self, start: ResumePosition) -> Result<ReplicationStream>;
}

/// Accepts one normalized row-mutation event
#[async_trait]
pub trait RowEventHandler: Send + Sync {
    async fn handle_row(&self, event: &RowEvent) -> Result<()>;
}

/// Column and primary-key layout lookup
#[async_trait]
pub trait SchemaProvider: Send + Sync {
    async fn table_schema(&self, table: &TableRef) -> Result<TableSchema>;

    fn name(&self) -> &'static str;
}

// ============================================================================
// Delivery Side
// ============================================================================

/// Pull-based source of drained queue payloads
#[async_trait]
pub trait DeliverySource: Send + Sync {
    /// Drain everything pending for `task`
    ///
    /// An empty payload means nothing was pending.
    async fn consume(&self, task: &TaskIdentity) -> Result<Bytes>;
}
