//! # Relay Replay
//!
//! Polls the delivery endpoint for one task and replays each change record
//! as a parameterized statement against the target database.
//!
//! ## Components
//!
//! - `HttpDeliveryClient`: pulls drained payloads
//! - `build_statement`: record to INSERT/UPDATE/DELETE with bound values
//! - `MySqlExecutor`: runs statements under a timeout
//!
//! Failures never stop the loop. A record that cannot be applied is logged,
//! counted and skipped; a failed poll is retried after the poll interval.

pub mod consumer;
pub mod executor;
pub mod statement;

pub use consumer::*;
pub use executor::*;
pub use statement::*;

use relay_core::config::ReplayTaskConfig;
use relay_core::prelude::*;
use relay_core::ReplayMetrics;
use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Outcome of applying one drained payload
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyReport {
    /// Statements executed successfully
    pub applied: u64,
    /// Statements that failed to build or execute
    pub failed: u64,
    /// Records filtered before execution
    pub skipped: u64,
    /// Lines that did not parse as a valid record
    pub dropped: u64,
}

impl ApplyReport {
    pub fn total(&self) -> u64 {
        self.applied + self.failed + self.skipped + self.dropped
    }

    fn merge(&mut self, other: &ApplyReport) {
        self.applied += other.applied;
        self.failed += other.failed;
        self.skipped += other.skipped;
        self.dropped += other.dropped;
    }
}

enum Outcome {
    Applied,
    Failed,
    Skipped,
}

/// Replay loop for one task
pub struct ReplayEngine {
    task: ReplayTaskConfig,
    identity: TaskIdentity,
    source: Arc<dyn DeliverySource>,
    executor: Arc<dyn StatementExecutor>,
    poll_interval: Duration,
    metrics: ReplayMetrics,
    // Tables found without a primary key; update/delete is never attempted again
    keyless: Mutex<HashSet<String>>,
    running: AtomicBool,
    polls: AtomicU64,
    totals: Mutex<ApplyReport>,
}

impl ReplayEngine {
    pub fn new(
        task: ReplayTaskConfig,
        source: Arc<dyn DeliverySource>,
        executor: Arc<dyn StatementExecutor>,
        poll_interval: Duration,
    ) -> Self {
        let identity = task.identity();
        let metrics = ReplayMetrics::new(format!("replay:{}", task.name));
        Self {
            task,
            identity,
            source,
            executor,
            poll_interval,
            metrics,
            keyless: Mutex::new(HashSet::new()),
            running: AtomicBool::new(false),
            polls: AtomicU64::new(0),
            totals: Mutex::new(ApplyReport::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.task.name
    }

    pub fn identity(&self) -> &TaskIdentity {
        &self.identity
    }

    /// Poll until ctrl-c
    pub async fn run(&self) -> Result<()> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Poll at a fixed interval until `shutdown` resolves.
    ///
    /// Shutdown is only observed between polls so a drained payload is always
    /// applied in full.
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        info!(
            task = %self.task.name,
            identity = %self.identity,
            executor = self.executor.name(),
            interval = ?self.poll_interval,
            "Starting replay"
        );
        self.running.store(true, Ordering::SeqCst);
        tokio::pin!(shutdown);

        while self.running.load(Ordering::SeqCst) {
            if let Err(e) = self.poll_once().await {
                if e.is_configuration() {
                    error!(task = %self.task.name, error = %e, "Poll failed");
                } else {
                    warn!(task = %self.task.name, error = %e, "Poll failed, retrying");
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = &mut shutdown => {
                    info!(task = %self.task.name, "Shutdown signal received");
                    break;
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        let totals = self.totals();
        info!(
            task = %self.task.name,
            polls = self.polls.load(Ordering::Relaxed),
            applied = totals.applied,
            failed = totals.failed,
            skipped = totals.skipped,
            dropped = totals.dropped,
            "Replay stopped"
        );
        Ok(())
    }

    /// One consume request plus the apply of whatever it returned
    pub async fn poll_once(&self) -> Result<ApplyReport> {
        let start = Instant::now();
        self.polls.fetch_add(1, Ordering::Relaxed);

        let payload = match self.source.consume(&self.identity).await {
            Ok(payload) => payload,
            Err(e) => {
                self.metrics.record_poll(e.kind(), start.elapsed());
                return Err(e);
            }
        };
        self.metrics.record_poll("ok", start.elapsed());

        if payload.is_empty() {
            debug!(task = %self.task.name, "Nothing pending");
            return Ok(ApplyReport::default());
        }

        let report = self.apply_payload(&payload).await;
        info!(
            task = %self.task.name,
            bytes = payload.len(),
            applied = report.applied,
            failed = report.failed,
            skipped = report.skipped,
            dropped = report.dropped,
            "Applied payload"
        );
        Ok(report)
    }

    /// Apply every record line of a payload, in order
    pub async fn apply_payload(&self, payload: &[u8]) -> ApplyReport {
        let mut report = ApplyReport::default();

        for parsed in relay_core::parse_payload(payload) {
            let record = match parsed {
                Ok(record) => record,
                Err(e) => {
                    error!(task = %self.task.name, error = %e, "Dropped undecodable record");
                    self.metrics.record_skipped("undecodable");
                    report.dropped += 1;
                    continue;
                }
            };

            match self.apply_record(&record).await {
                Outcome::Applied => report.applied += 1,
                Outcome::Failed => report.failed += 1,
                Outcome::Skipped => report.skipped += 1,
            }
        }

        if let Ok(mut totals) = self.totals.lock() {
            totals.merge(&report);
        }
        report
    }

    async fn apply_record(&self, record: &ChangeRecord) -> Outcome {
        if !self.task.capabilities.allows(record.action) {
            debug!(table = %record.table, action = %record.action, "Action disabled for task");
            self.metrics.record_skipped("capability");
            return Outcome::Skipped;
        }

        if !self.is_task_table(&record.table) {
            warn!(
                task = %self.task.name,
                table = %record.table,
                "Record for a table outside this task"
            );
            self.metrics.record_skipped("table_mismatch");
            return Outcome::Skipped;
        }

        if record.action.requires_primary_key() && self.is_keyless(&record.table) {
            self.metrics.record_skipped("missing_primary_key");
            return Outcome::Skipped;
        }

        let statement = match target_table(&record.table, self.task.table_suffix.as_deref())
            .and_then(|table| build_statement(record, &table))
        {
            Ok(statement) => statement,
            Err(e @ RelayError::MissingPrimaryKey { .. }) => {
                self.mark_keyless(&record.table, &e);
                self.metrics.record_skipped("missing_primary_key");
                return Outcome::Skipped;
            }
            Err(e) => {
                error!(table = %record.table, action = %record.action, error = %e, "Cannot build statement");
                self.metrics.record_failed(&record.table, e.kind());
                return Outcome::Failed;
            }
        };

        let start = Instant::now();
        let result = self.executor.execute(&statement).await;
        self.metrics.record_statement_latency(start.elapsed());

        match result {
            Ok(affected) => {
                debug!(table = %statement.table, action = %statement.action, affected, "Applied change");
                self.metrics.record_applied(&statement.table, statement.action.as_str());
                Outcome::Applied
            }
            Err(e) => {
                error!(
                    table = %statement.table,
                    action = %statement.action,
                    error = %e,
                    "Statement failed, skipping record"
                );
                self.metrics.record_failed(&statement.table, e.kind());
                Outcome::Failed
            }
        }
    }

    /// Allow-list: only the task's own `database.table`
    fn is_task_table(&self, qualified: &str) -> bool {
        match qualified.split_once('.') {
            Some((schema, table)) => schema == self.identity.database && table == self.identity.table,
            None => qualified == self.identity.table,
        }
    }

    fn is_keyless(&self, table: &str) -> bool {
        self.keyless
            .lock()
            .map(|set| set.contains(table))
            .unwrap_or(false)
    }

    fn mark_keyless(&self, table: &str, e: &RelayError) {
        if let Ok(mut set) = self.keyless.lock() {
            if set.insert(table.to_string()) {
                error!(
                    task = %self.task.name,
                    table,
                    error = %e,
                    "Table has no primary key; updates and deletes will be skipped"
                );
            }
        }
    }

    /// Stop the loop after the current poll
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Totals since start
    pub fn totals(&self) -> ApplyReport {
        self.totals.lock().map(|t| *t).unwrap_or_default()
    }
}
