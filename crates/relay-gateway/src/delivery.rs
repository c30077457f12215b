//! Delivery endpoint
//!
//! `GET /consume?account=&db=&table=` drains one task's queue segment and
//! returns the raw newline-delimited records. An empty body means nothing was
//! pending. Operational routes sit next to it.

use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, TimeZone, Utc};
use relay_capture::{CaptureStats, TaskQueueStore};
use relay_core::prelude::*;
use relay_core::DeliveryMetrics;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

/// Delivery state shared by all handlers
#[derive(Clone)]
pub struct DeliveryState {
    pub queues: Arc<TaskQueueStore>,
    pub stats: Arc<dyn Fn() -> CaptureStats + Send + Sync>,
    counters: Arc<DrainCounters>,
    metrics: DeliveryMetrics,
}

#[derive(Default)]
struct DrainCounters {
    drains: AtomicU64,
    drained_bytes: AtomicU64,
    // Unix millis, 0 = never
    last_drain_ms: AtomicI64,
}

impl DeliveryState {
    pub fn new(
        queues: Arc<TaskQueueStore>,
        stats: Arc<dyn Fn() -> CaptureStats + Send + Sync>,
    ) -> Self {
        Self {
            queues,
            stats,
            counters: Arc::new(DrainCounters::default()),
            metrics: DeliveryMetrics::new("delivery"),
        }
    }

    fn record_drain(&self, bytes: usize) {
        self.counters.drains.fetch_add(1, Ordering::Relaxed);
        self.counters
            .drained_bytes
            .fetch_add(bytes as u64, Ordering::Relaxed);
        self.counters
            .last_drain_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    fn last_drain_at(&self) -> Option<DateTime<Utc>> {
        match self.counters.last_drain_ms.load(Ordering::Relaxed) {
            0 => None,
            ms => Utc.timestamp_millis_opt(ms).single(),
        }
    }
}

/// Consume query; the legacy `taskAccount`/`taskDB`/`taskTable` names are accepted
#[derive(Debug, Deserialize)]
pub struct ConsumeParams {
    #[serde(alias = "taskAccount")]
    pub account: String,
    #[serde(alias = "taskDB")]
    pub db: String,
    #[serde(alias = "taskTable")]
    pub table: String,
}

impl ConsumeParams {
    pub fn identity(self) -> TaskIdentity {
        TaskIdentity::new(self.account, self.db, self.table)
    }
}

/// Health response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// Stats response
#[derive(Serialize)]
pub struct StatsResponse {
    #[serde(flatten)]
    pub capture: CaptureStats,
    pub drains: u64,
    pub drained_bytes: u64,
    pub last_drain_at: Option<DateTime<Utc>>,
    pub tasks: Vec<String>,
}

async fn consume(State(state): State<DeliveryState>, Query(params): Query<ConsumeParams>) -> Response {
    let task = params.identity();
    let label = task.to_string();

    let Some(segment) = state.queues.lookup(&task).await else {
        warn!(task = %task, "Consume for unknown task");
        state.metrics.record_drain(&label, "not_found", 0);
        return (StatusCode::NOT_FOUND, format!("unknown task {task}")).into_response();
    };

    match segment.drain_and_reset().await {
        Ok(payload) => {
            state.record_drain(payload.len());
            state.metrics.record_drain(&label, "ok", payload.len());
            if payload.is_empty() {
                debug!(task = %task, "Nothing pending");
            } else {
                info!(task = %task, bytes = payload.len(), "Drained queue");
            }
            (
                StatusCode::OK,
                [(header::CONTENT_TYPE, "application/x-ndjson")],
                payload,
            )
                .into_response()
        }
        Err(e) => {
            error!(task = %task, error = %e, "Drain failed");
            state.metrics.record_drain(&label, "error", 0);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn live() -> &'static str {
    "OK"
}

async fn ready(State(state): State<DeliveryState>) -> Response {
    match tokio::fs::metadata(state.queues.dir()).await {
        Ok(meta) if meta.is_dir() => "OK".into_response(),
        _ => (StatusCode::SERVICE_UNAVAILABLE, "queue directory unavailable").into_response(),
    }
}

async fn stats(State(state): State<DeliveryState>) -> Json<StatsResponse> {
    let tasks = state
        .queues
        .tasks()
        .await
        .iter()
        .map(ToString::to_string)
        .collect();

    Json(StatsResponse {
        capture: (state.stats)(),
        drains: state.counters.drains.load(Ordering::Relaxed),
        drained_bytes: state.counters.drained_bytes.load(Ordering::Relaxed),
        last_drain_at: state.last_drain_at(),
        tasks,
    })
}

/// Build the delivery router
pub fn router(state: DeliveryState) -> Router {
    Router::new()
        .route("/consume", get(consume))
        .route("/health", get(health))
        .route("/health/live", get(live))
        .route("/health/ready", get(ready))
        .route("/stats", get(stats))
        .with_state(state)
}

/// Serve the delivery endpoint until `shutdown` resolves
pub async fn serve<F>(listener: TcpListener, state: DeliveryState, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!(listen = %addr, "Delivery endpoint started");
    }
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}
