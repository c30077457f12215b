//! Action capability filter
//!
//! Per-task switches that enable or disable replay of inserts, updates and
//! deletes independently.

use crate::record::RowAction;
use serde::{Deserialize, Serialize};

/// Result of filter evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterResult {
    /// Record passes the filter
    Pass,
    /// Record is filtered out
    Reject,
}

impl FilterResult {
    /// Check if passes
    pub fn passes(self) -> bool {
        matches!(self, FilterResult::Pass)
    }
}

/// Which row actions a task is allowed to replay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionCapabilities {
    #[serde(default = "default_true", alias = "dataInsert")]
    pub insert: bool,

    #[serde(default = "default_true", alias = "dataUpdate")]
    pub update: bool,

    #[serde(default = "default_true", alias = "dataDelete")]
    pub delete: bool,
}

fn default_true() -> bool {
    true
}

impl Default for ActionCapabilities {
    fn default() -> Self {
        Self::all()
    }
}

impl ActionCapabilities {
    /// Every action enabled
    pub fn all() -> Self {
        Self {
            insert: true,
            update: true,
            delete: true,
        }
    }

    /// Only inserts enabled (append-only targets)
    pub fn insert_only() -> Self {
        Self {
            insert: true,
            update: false,
            delete: false,
        }
    }

    pub fn evaluate(&self, action: RowAction) -> FilterResult {
        let enabled = match action {
            RowAction::Insert => self.insert,
            RowAction::Update => self.update,
            RowAction::Delete => self.delete,
        };
        if enabled {
            FilterResult::Pass
        } else {
            FilterResult::Reject
        }
    }

    pub fn allows(&self, action: RowAction) -> bool {
        self.evaluate(action).passes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capabilities() {
        let caps = ActionCapabilities::insert_only();
        assert!(caps.allows(RowAction::Insert));
        assert!(!caps.allows(RowAction::Update));
        assert_eq!(caps.evaluate(RowAction::Delete), FilterResult::Reject);
        assert!(ActionCapabilities::default().allows(RowAction::Delete));
    }

    #[test]
    fn test_capabilities_accept_legacy_names() {
        let caps: ActionCapabilities =
            serde_json::from_str(r#"{"dataInsert": true, "dataDelete": false}"#).unwrap();
        assert!(caps.insert);
        assert!(caps.update);
        assert!(!caps.delete);
    }
}
