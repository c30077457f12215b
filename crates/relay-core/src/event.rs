//! Replication stream events
//!
//! The contract required from the replication-client collaborator: row
//! mutation events in source commit order, interleaved with position syncs.

use crate::record::{RowAction, TableRef};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Resume point in the source replication stream
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResumePosition {
    /// Logical log identifier (binlog file name)
    pub name: String,
    /// Byte offset inside the log
    pub pos: u64,
}

impl ResumePosition {
    pub fn new(name: impl Into<String>, pos: u64) -> Self {
        Self {
            name: name.into(),
            pos,
        }
    }

    /// Sentinel meaning "start from the beginning of the stream"
    pub fn beginning() -> Self {
        Self::default()
    }

    pub fn is_beginning(&self) -> bool {
        self.name.is_empty()
    }
}

impl std::fmt::Display for ResumePosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_beginning() {
            f.write_str("<beginning>")
        } else {
            write!(f, "{}:{}", self.name, self.pos)
        }
    }
}

/// One raw row mutation as delivered by the replication client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowEvent {
    pub action: RowAction,
    pub table: TableRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<Vec<Value>>,
}

impl RowEvent {
    pub fn insert(table: TableRef, after: Vec<Value>) -> Self {
        Self {
            action: RowAction::Insert,
            table,
            before: None,
            after: Some(after),
        }
    }

    pub fn update(table: TableRef, before: Vec<Value>, after: Vec<Value>) -> Self {
        Self {
            action: RowAction::Update,
            table,
            before: Some(before),
            after: Some(after),
        }
    }

    pub fn delete(table: TableRef, before: Vec<Value>) -> Self {
        Self {
            action: RowAction::Delete,
            table,
            before: Some(before),
            after: None,
        }
    }
}

/// Item of the replication event stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReplicationEvent {
    /// A committed row mutation
    Row(RowEvent),
    /// Everything before this position has been delivered
    PositionSynced(ResumePosition),
}
