//! HTTP delivery client
//!
//! Implements `DeliverySource` against the relay server's `/consume` route.

use async_trait::async_trait;
use bytes::Bytes;
use relay_core::prelude::*;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::trace;
use url::Url;

/// Pulls drained payloads over HTTP
pub struct HttpDeliveryClient {
    client: Client,
    consume_url: Url,
    timeout: Duration,
}

impl HttpDeliveryClient {
    /// `endpoint` is the server base URL, e.g. `http://relay:8080` or
    /// `http://gateway/relay` behind a path prefix
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self> {
        let mut base = Url::parse(endpoint)
            .map_err(|e| RelayError::config(format!("Invalid delivery endpoint {endpoint}: {e}")))?;
        // Without a trailing slash `join` would replace the last path segment
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let consume_url = base
            .join("consume")
            .map_err(|e| RelayError::config(format!("Invalid delivery endpoint {endpoint}: {e}")))?;

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RelayError::transport_with_source("Failed to create HTTP client", e))?;

        Ok(Self {
            client,
            consume_url,
            timeout,
        })
    }

    /// Request URL for one task
    pub fn url_for(&self, task: &TaskIdentity) -> Url {
        let mut url = self.consume_url.clone();
        url.query_pairs_mut()
            .append_pair("account", &task.account)
            .append_pair("db", &task.database)
            .append_pair("table", &task.table);
        url
    }
}

#[async_trait]
impl DeliverySource for HttpDeliveryClient {
    async fn consume(&self, task: &TaskIdentity) -> Result<Bytes> {
        let url = self.url_for(task);
        trace!(url = %url, "Polling delivery endpoint");

        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                RelayError::timeout(format!("consume {task}"), self.timeout.as_millis() as u64)
            } else {
                RelayError::transport_with_source(format!("Consume request for {task} failed"), e)
            }
        })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(RelayError::config(format!(
                "delivery endpoint does not know task {task}"
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RelayError::transport(format!(
                "Consume for {task} returned {status}: {body}"
            )));
        }

        response
            .bytes()
            .await
            .map_err(|e| RelayError::transport_with_source(format!("Failed to read payload for {task}"), e))
    }
}
