//! # Relay Core
//!
//! Core types, strategy traits, and utilities for binlog-relay.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌────────────┐   ┌────────────┐   ┌──────────┐   ┌──────────┐
//! │ Replication │──►│   Change   │──►│ Task Queue │──►│ Delivery │──►│  Replay  │
//! │   Client    │   │ Normalizer │   │   Store    │   │ Endpoint │   │  Engine  │
//! └─────────────┘   └────────────┘   └─────┬──────┘   └──────────┘   └──────────┘
//!                                          │
//!                                    ┌─────┴──────┐
//!                                    │  Position  │
//!                                    │  Tracker   │
//!                                    └────────────┘
//! ```

pub mod config;
pub mod error;
pub mod event;
pub mod filter;
pub mod metrics;
pub mod record;
pub mod strategy;

pub use config::*;
pub use error::*;
pub use event::*;
pub use filter::*;
pub use metrics::*;
pub use record::*;
pub use strategy::*;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::config::RelayConfig;
    pub use crate::error::{RelayError, Result};
    pub use crate::event::{ReplicationEvent, ResumePosition, RowEvent};
    pub use crate::filter::ActionCapabilities;
    pub use crate::record::{ChangeRecord, RowAction, TableRef, TableSchema, TaskIdentity};
    pub use crate::strategy::{
        DeliverySource, HealthCheck, Lifecycle, ReplicationClient, RowEventHandler,
        SchemaProvider,
    };
}
