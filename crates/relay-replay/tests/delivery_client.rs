//! Delivery client against a local HTTP server

use axum::{extract::Query, http::StatusCode, routing::get, Router};
use relay_core::prelude::*;
use relay_replay::HttpDeliveryClient;
use std::collections::HashMap;
use std::time::Duration;
use tokio::net::TcpListener;

const TIMEOUT: Duration = Duration::from_millis(200);

async fn echo(Query(params): Query<HashMap<String, String>>) -> String {
    format!("{}|{}|{}\n", params["account"], params["db"], params["table"])
}

async fn stalled() -> &'static str {
    tokio::time::sleep(Duration::from_secs(5)).await;
    "late"
}

async fn missing() -> StatusCode {
    StatusCode::NOT_FOUND
}

async fn broken() -> (StatusCode, &'static str) {
    (StatusCode::INTERNAL_SERVER_ERROR, "segment unreadable")
}

/// Base URL of a server with one route prefix per response behavior
async fn start() -> String {
    let router = Router::new()
        .route("/ok/consume", get(echo))
        .route("/stall/consume", get(stalled))
        .route("/missing/consume", get(missing))
        .route("/broken/consume", get(broken));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    format!("http://{addr}")
}

fn client(base: &str, prefix: &str) -> HttpDeliveryClient {
    HttpDeliveryClient::new(&format!("{base}/{prefix}"), TIMEOUT).unwrap()
}

fn task() -> TaskIdentity {
    TaskIdentity::new("repl", "shop", "users")
}

#[tokio::test]
async fn test_consume_returns_body() {
    let base = start().await;

    let payload = client(&base, "ok").consume(&task()).await.unwrap();
    assert_eq!(&payload[..], b"repl|shop|users\n");
}

#[tokio::test]
async fn test_stalled_response_times_out() {
    let base = start().await;

    let started = std::time::Instant::now();
    let err = client(&base, "stall").consume(&task()).await.unwrap_err();
    assert!(matches!(err, RelayError::Timeout { .. }), "{err:?}");
    assert!(err.is_retryable());
    assert!(started.elapsed() < Duration::from_secs(4));
}

#[tokio::test]
async fn test_unknown_task_is_configuration_error() {
    let base = start().await;

    let err = client(&base, "missing").consume(&task()).await.unwrap_err();
    assert!(matches!(err, RelayError::Configuration { .. }), "{err:?}");
    assert!(err.is_configuration());
}

#[tokio::test]
async fn test_server_error_is_transport_error() {
    let base = start().await;

    let err = client(&base, "broken").consume(&task()).await.unwrap_err();
    assert!(matches!(err, RelayError::Transport { .. }), "{err:?}");
    assert!(err.to_string().contains("500"));
}
