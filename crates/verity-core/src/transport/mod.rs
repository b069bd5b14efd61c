//! Transport capability: moves request bytes to a node and response bytes back.
//!
//! The dispatcher only sees [`Transport`]; [`HttpTransport`] is the stock
//! implementation and tests substitute scripted ones.

mod http;

pub use http::{HttpTransport, HttpTransportConfig};

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::{Map, Value};
use std::time::Duration;
use thiserror::Error;

use crate::types::{JsonRpcError, NodeId, RawResponse, ResponseMeta};

/// Transport-level failures. All of them are retried against another node.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum TransportError {
    #[error("connect failed: {0}")]
    ConnectFailed(String),

    #[error("request timed out")]
    Timeout,

    #[error("protocol error: {0}")]
    Protocol(String),

    /// No local concurrency permit became free in time; nothing was sent.
    #[error("local request limit reached")]
    Saturated,
}

impl TransportError {
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout)
    }

    /// Whether the failure happened on this side and says nothing about the node.
    #[must_use]
    pub fn is_local(&self) -> bool {
        matches!(self, Self::Saturated)
    }

    /// Returns a static string representation for metrics labels.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ConnectFailed(_) => "connect_failed",
            Self::Timeout => "timeout",
            Self::Protocol(_) => "protocol",
            Self::Saturated => "saturated",
        }
    }
}

/// Sends one request body to one endpoint.
#[async_trait]
pub trait Transport: Send + Sync {
    /// # Errors
    /// Returns [`TransportError`] when no response body could be obtained
    /// within `timeout`.
    async fn send(&self, endpoint: &str, body: Bytes, timeout: Duration) -> Result<Bytes, TransportError>;
}

/// Parses a JSON-RPC response body for request `expected_id`.
///
/// A JSON-RPC `error` object, an id mismatch, or a body without a result
/// are protocol errors.
///
/// # Errors
/// Returns [`TransportError::Protocol`] as described above.
pub fn decode_response(node: &NodeId, expected_id: u64, body: &[u8]) -> Result<RawResponse, TransportError> {
    let protocol = |reason: String| TransportError::Protocol(reason);
    let mut envelope: Map<String, Value> = serde_json::from_slice(body)
        .map_err(|e| protocol(format!("invalid JSON-RPC response: {e}")))?;

    if let Some(error) = envelope.remove("error").filter(|e| !e.is_null()) {
        let error: JsonRpcError =
            serde_json::from_value(error).map_err(|e| protocol(format!("invalid error object: {e}")))?;
        return Err(protocol(format!("node error {}: {}", error.code, error.message)));
    }
    let id = envelope.remove("id").unwrap_or(Value::Null);
    if id != Value::from(expected_id) {
        return Err(protocol(format!("response id {id} does not match request id {expected_id}")));
    }
    // a null result is a valid answer, an absent one is not
    let result = envelope
        .remove("result")
        .ok_or_else(|| protocol("response has neither result nor error".to_string()))?;
    let meta: Option<ResponseMeta> = envelope
        .remove("in3")
        .map(serde_json::from_value)
        .transpose()
        .map_err(|e| protocol(format!("invalid in3 object: {e}")))?;

    Ok(RawResponse { node: node.clone(), id: expected_id, result, proof: meta.and_then(|m| m.proof) })
}
