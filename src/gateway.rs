//! HTTP transport for delivering snapshots to a collection endpoint.
//!
//! Single snapshots are POSTed to the endpoint itself; batches go to
//! `{endpoint}/batch` wrapped as `{"analytics": [...]}`. Any non-2xx status
//! is a failure.

use crate::queue::{Transport, TransportError};
use crate::snapshot::MetricSnapshot;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Collection endpoint configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Base collection URL, e.g. `http://127.0.0.1:8787/analytics`
    pub endpoint: String,
    /// Bearer token, sent only when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Per-request timeout
    #[serde(default = "default_timeout", with = "crate::config::duration_ms")]
    pub timeout: Duration,
}

fn default_timeout() -> Duration {
    Duration::from_secs(10)
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self::new("http://127.0.0.1:8787/analytics", None)
    }
}

impl GatewayConfig {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key,
            timeout: default_timeout(),
        }
    }

    /// Endpoint for a single snapshot.
    pub fn url(&self) -> String {
        self.endpoint.trim_end_matches('/').to_string()
    }

    /// Endpoint for a batch of snapshots.
    pub fn batch_url(&self) -> String {
        format!("{}/batch", self.url())
    }
}

/// Batch request body.
#[derive(Debug, Serialize)]
pub struct BatchEnvelope<'a> {
    pub analytics: &'a [MetricSnapshot],
}

/// reqwest-backed [`Transport`].
pub struct HttpTransport {
    config: GatewayConfig,
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(config: GatewayConfig) -> Result<Self, TransportError> {
        let host = hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "unknown".to_string());

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(format!("{}/{} ({host})", crate::PRODUCER_NAME, crate::VERSION))
            .build()
            .map_err(|e| TransportError::Config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { config, client })
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    async fn post<B: Serialize + ?Sized>(&self, url: &str, body: &B) -> Result<(), TransportError> {
        let mut request = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .json(body);

        if let Some(ref key) = self.config.api_key {
            request = request.header("Authorization", format!("Bearer {key}"));
        }

        let response = request
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(TransportError::Server {
                status: status.as_u16(),
                message,
            });
        }

        Ok(())
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send_one(&self, snapshot: &MetricSnapshot) -> Result<(), TransportError> {
        self.post(&self.config.url(), snapshot).await
    }

    async fn send_batch(&self, snapshots: &[MetricSnapshot]) -> Result<(), TransportError> {
        self.post(
            &self.config.batch_url(),
            &BatchEnvelope {
                analytics: snapshots,
            },
        )
        .await
    }
}
