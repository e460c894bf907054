//! HTTP sink - POSTs batches to the collector endpoint

use super::{check_status, EncodedBatch, Sink, Transport};
use crate::config::DeliveryConfig;
use crate::error::TransportError;
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::trace;

/// Production sink. Each pooled connection is its own client holding at most
/// one idle keep-alive connection, so the engine's pool bounds the sockets.
#[derive(Debug, Clone)]
pub struct HttpSink {
    endpoint: String,
    api_key: Option<String>,
    timeout: Duration,
    user_agent: String,
}

impl HttpSink {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: None,
            timeout: Duration::from_secs(10),
            user_agent: format!("causeway/{}", env!("CARGO_PKG_VERSION")),
        }
    }

    pub fn from_config(config: &DeliveryConfig) -> Self {
        Self {
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone(),
            timeout: config.request_timeout,
            user_agent: config.user_agent.clone(),
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl Sink for HttpSink {
    fn name(&self) -> &str {
        "http"
    }

    fn connect(&self) -> Result<Box<dyn Transport>, TransportError> {
        let client = Client::builder()
            .timeout(self.timeout)
            .user_agent(&self.user_agent)
            .pool_max_idle_per_host(1)
            .build()
            .map_err(|e| TransportError::Init(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Box::new(HttpTransport {
            client,
            endpoint: self.endpoint.clone(),
            api_key: self.api_key.clone(),
            timeout: self.timeout,
        }))
    }
}

struct HttpTransport {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    timeout: Duration,
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, batch: &EncodedBatch) -> Result<u16, TransportError> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "application/json");

        if batch.compressed {
            request = request.header("Content-Encoding", "gzip");
        }
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request
            .body(batch.body.clone())
            .send()
            .await
            .map_err(|e| match TransportError::from(e) {
                TransportError::Timeout(_) => TransportError::Timeout(self.timeout),
                other => other,
            })?;

        let status = response.status().as_u16();
        trace!(status, events = batch.event_count, bytes = batch.len(), "Collector responded");

        if response.status().is_success() {
            return Ok(status);
        }
        let body = response.text().await.unwrap_or_default();
        check_status(status, || body)
    }
}
