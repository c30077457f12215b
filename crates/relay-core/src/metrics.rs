//! Metrics for binlog-relay
//!
//! Records through the `metrics` facade; the embedding binary decides on the
//! exporter.

use metrics::{counter, histogram};
use std::time::Duration;

/// Metric names as constants for consistency
pub mod names {
    // Capture metrics
    pub const CAPTURE_RECORDS_TOTAL: &str = "relay_capture_records_total";
    pub const CAPTURE_DROPPED_TOTAL: &str = "relay_capture_dropped_total";
    pub const CAPTURE_APPEND_LATENCY: &str = "relay_capture_append_latency_seconds";
    pub const CAPTURE_CHECKPOINT_SAVES: &str = "relay_capture_checkpoint_saves_total";
    pub const CAPTURE_CHECKPOINT_HELD: &str = "relay_capture_checkpoint_held_total";

    // Delivery metrics
    pub const DELIVERY_DRAINS_TOTAL: &str = "relay_delivery_drains_total";
    pub const DELIVERY_DRAINED_BYTES: &str = "relay_delivery_drained_bytes_total";

    // Replay metrics
    pub const REPLAY_POLLS_TOTAL: &str = "relay_replay_polls_total";
    pub const REPLAY_POLL_LATENCY: &str = "relay_replay_poll_latency_seconds";
    pub const REPLAY_APPLIED_TOTAL: &str = "relay_replay_statements_applied_total";
    pub const REPLAY_FAILED_TOTAL: &str = "relay_replay_statements_failed_total";
    pub const REPLAY_SKIPPED_TOTAL: &str = "relay_replay_records_skipped_total";
    pub const REPLAY_STATEMENT_LATENCY: &str = "relay_replay_statement_latency_seconds";
}

/// Labels for metrics
pub mod labels {
    pub const COMPONENT: &str = "component";
    pub const TABLE: &str = "table";
    pub const TASK: &str = "task";
    pub const OPERATION: &str = "operation";
    pub const ERROR_TYPE: &str = "error_type";
    pub const REASON: &str = "reason";
    pub const STATUS: &str = "status";
}

/// Capture-side metrics
#[derive(Clone)]
pub struct CaptureMetrics {
    component: String,
}

impl CaptureMetrics {
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
        }
    }

    /// Record a captured and queued change
    pub fn record_captured(&self, table: &str, operation: &str) {
        counter!(
            names::CAPTURE_RECORDS_TOTAL,
            labels::COMPONENT => self.component.clone(),
            labels::TABLE => table.to_string(),
            labels::OPERATION => operation.to_string(),
        )
        .increment(1);
    }

    /// Record a dropped event
    pub fn record_dropped(&self, error_type: &str) {
        counter!(
            names::CAPTURE_DROPPED_TOTAL,
            labels::COMPONENT => self.component.clone(),
            labels::ERROR_TYPE => error_type.to_string(),
        )
        .increment(1);
    }

    /// Record fan-out append latency
    pub fn record_append_latency(&self, duration: Duration) {
        histogram!(
            names::CAPTURE_APPEND_LATENCY,
            labels::COMPONENT => self.component.clone(),
        )
        .record(duration.as_secs_f64());
    }

    /// Record a persisted resume position
    pub fn record_checkpoint_saved(&self) {
        counter!(
            names::CAPTURE_CHECKPOINT_SAVES,
            labels::COMPONENT => self.component.clone(),
        )
        .increment(1);
    }

    /// Record a position sync that was not persisted because of a dropped event
    pub fn record_checkpoint_held(&self) {
        counter!(
            names::CAPTURE_CHECKPOINT_HELD,
            labels::COMPONENT => self.component.clone(),
        )
        .increment(1);
    }
}

/// Delivery endpoint metrics
#[derive(Clone)]
pub struct DeliveryMetrics {
    component: String,
}

impl DeliveryMetrics {
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
        }
    }

    /// Record a drain request outcome
    pub fn record_drain(&self, task: &str, status: &str, bytes: usize) {
        counter!(
            names::DELIVERY_DRAINS_TOTAL,
            labels::COMPONENT => self.component.clone(),
            labels::TASK => task.to_string(),
            labels::STATUS => status.to_string(),
        )
        .increment(1);

        if bytes > 0 {
            counter!(
                names::DELIVERY_DRAINED_BYTES,
                labels::COMPONENT => self.component.clone(),
                labels::TASK => task.to_string(),
            )
            .increment(bytes as u64);
        }
    }
}

/// Replay engine metrics
#[derive(Clone)]
pub struct ReplayMetrics {
    component: String,
}

impl ReplayMetrics {
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
        }
    }

    /// Record a poll outcome
    pub fn record_poll(&self, status: &str, duration: Duration) {
        counter!(
            names::REPLAY_POLLS_TOTAL,
            labels::COMPONENT => self.component.clone(),
            labels::STATUS => status.to_string(),
        )
        .increment(1);
        histogram!(
            names::REPLAY_POLL_LATENCY,
            labels::COMPONENT => self.component.clone(),
        )
        .record(duration.as_secs_f64());
    }

    /// Record an applied statement
    pub fn record_applied(&self, table: &str, operation: &str) {
        counter!(
            names::REPLAY_APPLIED_TOTAL,
            labels::COMPONENT => self.component.clone(),
            labels::TABLE => table.to_string(),
            labels::OPERATION => operation.to_string(),
        )
        .increment(1);
    }

    /// Record a failed statement
    pub fn record_failed(&self, table: &str, error_type: &str) {
        counter!(
            names::REPLAY_FAILED_TOTAL,
            labels::COMPONENT => self.component.clone(),
            labels::TABLE => table.to_string(),
            labels::ERROR_TYPE => error_type.to_string(),
        )
        .increment(1);
    }

    /// Record a record skipped before execution
    pub fn record_skipped(&self, reason: &str) {
        counter!(
            names::REPLAY_SKIPPED_TOTAL,
            labels::COMPONENT => self.component.clone(),
            labels::REASON => reason.to_string(),
        )
        .increment(1);
    }

    /// Record statement latency
    pub fn record_statement_latency(&self, duration: Duration) {
        histogram!(
            names::REPLAY_STATEMENT_LATENCY,
            labels::COMPONENT => self.component.clone(),
        )
        .record(duration.as_secs_f64());
    }
}
