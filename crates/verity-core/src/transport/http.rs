use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, ClientBuilder};
use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::Duration};
use tokio::sync::Semaphore;
use tracing::{trace, warn};

use super::{Transport, TransportError};

/// HTTP client limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpTransportConfig {
    /// Maximum number of concurrent HTTP requests
    #[serde(default = "default_concurrent_limit")]
    pub concurrent_limit: usize,
    /// How long a request may wait for a concurrency permit
    #[serde(default = "default_permit_timeout_ms")]
    pub permit_timeout_ms: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Retries of the same endpoint after a 5xx status
    #[serde(default = "default_server_error_retries")]
    pub server_error_retries: u32,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_concurrent_limit() -> usize {
    256
}

fn default_permit_timeout_ms() -> u64 {
    500
}

fn default_connect_timeout_ms() -> u64 {
    5000
}

fn default_server_error_retries() -> u32 {
    1
}

fn default_user_agent() -> String {
    concat!("verity/", env!("CARGO_PKG_VERSION")).to_string()
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            concurrent_limit: default_concurrent_limit(),
            permit_timeout_ms: default_permit_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            server_error_retries: default_server_error_retries(),
            user_agent: default_user_agent(),
        }
    }
}

/// JSON-RPC over HTTP POST with semaphore-based concurrency control.
pub struct HttpTransport {
    client: Client,
    permits: Arc<Semaphore>,
    config: HttpTransportConfig,
}

impl HttpTransport {
    /// # Errors
    ///
    /// Returns [`TransportError::ConnectFailed`] if the underlying reqwest
    /// client fails to build.
    pub fn new(config: HttpTransportConfig) -> Result<Self, TransportError> {
        let client = ClientBuilder::new()
            .pool_idle_timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
            .use_rustls_tls()
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(config.user_agent.clone())
            .tcp_nodelay(true)
            .build()
            .map_err(|e| {
                tracing::error!(error = %e, "failed to build http client");
                TransportError::ConnectFailed(format!("HTTP client build failed: {e}"))
            })?;

        Ok(Self { client, permits: Arc::new(Semaphore::new(config.concurrent_limit.max(1))), config })
    }

    /// Maps reqwest errors to messages that do not echo the endpoint.
    fn classify(error: &reqwest::Error) -> TransportError {
        if error.is_timeout() {
            TransportError::Timeout
        } else if error.is_connect() {
            TransportError::ConnectFailed("connection refused or unreachable".to_string())
        } else if error.is_body() || error.is_decode() {
            TransportError::Protocol("response body error".to_string())
        } else if error.is_redirect() {
            TransportError::Protocol("unexpected redirect".to_string())
        } else {
            TransportError::ConnectFailed("network error".to_string())
        }
    }

    #[cfg(test)]
    fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, endpoint: &str, body: Bytes, timeout: Duration) -> Result<Bytes, TransportError> {
        let _permit = tokio::time::timeout(
            Duration::from_millis(self.config.permit_timeout_ms),
            Arc::clone(&self.permits).acquire_owned(),
        )
        .await
        .map_err(|_| {
            warn!(
                endpoint = endpoint,
                available_permits = self.permits.available_permits(),
                "http transport permit acquisition timeout"
            );
            TransportError::Saturated
        })?
        .map_err(|_| TransportError::ConnectFailed("transport closed".to_string()))?;

        let mut retries = 0;
        loop {
            let response = self
                .client
                .post(endpoint)
                .header("content-type", "application/json")
                .body(body.clone())
                .timeout(timeout)
                .send()
                .await
                .map_err(|e| Self::classify(&e))?;

            let status = response.status();
            if status.is_success() {
                trace!(endpoint = endpoint, "http request completed");
                return response.bytes().await.map_err(|e| Self::classify(&e));
            }
            if status.is_server_error() && retries < self.config.server_error_retries {
                retries += 1;
                tokio::time::sleep(Duration::from_millis(100 * (1 << retries))).await;
                continue;
            }

            let text = response.text().await.unwrap_or_default();
            let excerpt: String = text.chars().take(256).collect();
            trace!(endpoint = endpoint, status = status.as_u16(), "http request failed");
            return Err(TransportError::Protocol(format!("HTTP {}: {excerpt}", status.as_u16())));
        }
    }
}
