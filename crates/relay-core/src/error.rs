//! Error types for binlog-relay
//!
//! Uses `thiserror` for ergonomic error handling with full context preservation.

use std::fmt;
use thiserror::Error;

/// Result type alias for relay operations
pub type Result<T> = std::result::Result<T, RelayError>;

/// Primary error type for all relay operations
#[derive(Error, Debug)]
pub enum RelayError {
    /// Source or target database errors
    #[error("Database error: {message}")]
    Database {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Delivery transport (HTTP) errors
    #[error("Transport error: {message}")]
    Transport {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Change record serialization/deserialization errors
    #[error("Serialization error: {message}")]
    Serialization {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A record that parsed but violates the row/column layout
    #[error("Invalid change record: {message}")]
    InvalidRecord { message: String },

    /// Task queue segment I/O errors
    #[error("Queue error for {task}: {message}")]
    Queue {
        task: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Resume position persistence errors
    #[error("Checkpoint error: {message}")]
    Checkpoint {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Update/delete requested on a table without a primary key
    #[error("Table {table} has no primary key; cannot target {action}")]
    MissingPrimaryKey { table: String, action: String },

    /// Identifier rejected before interpolation into statement text
    #[error("Invalid identifier {identifier:?}: {reason}")]
    InvalidIdentifier { identifier: String, reason: String },

    /// Operation timeout
    #[error("Timeout: {operation} exceeded {duration_ms}ms")]
    Timeout { operation: String, duration_ms: u64 },

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RelayError {
    /// Create a database error
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database {
            message: message.into(),
            source: None,
        }
    }

    /// Create a database error with source
    pub fn database_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Database {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a transport error
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            source: None,
        }
    }

    /// Create a transport error with source
    pub fn transport_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Transport {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a serialization error with source
    pub fn serialization(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Serialization {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create an invalid record error
    pub fn invalid_record(message: impl Into<String>) -> Self {
        Self::InvalidRecord {
            message: message.into(),
        }
    }

    /// Create a queue error for a task
    pub fn queue(
        task: impl fmt::Display,
        message: impl Into<String>,
        source: std::io::Error,
    ) -> Self {
        Self::Queue {
            task: task.to_string(),
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a checkpoint error with source
    pub fn checkpoint(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Checkpoint {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an invalid identifier error
    pub fn invalid_identifier(identifier: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidIdentifier {
            identifier: identifier.into(),
            reason: reason.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, duration_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration_ms,
        }
    }

    /// Check if error is retryable
    ///
    /// Transport failures and timeouts resolve on a later poll; everything
    /// else is tied to the record or the configuration.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport { .. } | Self::Timeout { .. })
    }

    /// Check if error is a configuration problem that will not go away on its own
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::Configuration { .. }
                | Self::MissingPrimaryKey { .. }
                | Self::InvalidIdentifier { .. }
        )
    }

    /// Short label used as the `error_type` metric dimension
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Database { .. } => "database",
            Self::Transport { .. } => "transport",
            Self::Serialization { .. } => "serialization",
            Self::InvalidRecord { .. } => "invalid_record",
            Self::Queue { .. } => "queue",
            Self::Checkpoint { .. } => "checkpoint",
            Self::Configuration { .. } => "configuration",
            Self::MissingPrimaryKey { .. } => "missing_primary_key",
            Self::InvalidIdentifier { .. } => "invalid_identifier",
            Self::Timeout { .. } => "timeout",
            Self::Internal(_) => "internal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(RelayError::transport("connection refused").is_retryable());
        assert!(RelayError::timeout("consume", 10_000).is_retryable());
        assert!(!RelayError::database("duplicate key").is_retryable());

        let err = RelayError::MissingPrimaryKey {
            table: "shop.users".into(),
            action: "update".into(),
        };
        assert!(err.is_configuration());
        assert!(!err.is_retryable());
        assert_eq!(
            err.to_string(),
            "Table shop.users has no primary key; cannot target update"
        );
        assert_eq!(err.kind(), "missing_primary_key");
    }
}
