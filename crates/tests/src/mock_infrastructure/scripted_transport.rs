//! A [`Transport`] whose endpoints answer from closures instead of sockets.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::{collections::HashMap, sync::Arc, time::Duration};
use verity_core::{
    transport::{Transport, TransportError},
    types::JsonRpcRequest,
};

/// What an endpoint does with one request.
#[derive(Debug, Clone)]
pub enum Reply {
    /// A successful response carrying `result` and `in3.proof`.
    Answer { result: Value, proof: Value },
    /// A body sent as-is, with the request id filled in.
    Raw(Value),
    Fail(TransportError),
    /// Never answers.
    Hang,
}

impl From<(Value, Value)> for Reply {
    fn from((result, proof): (Value, Value)) -> Self {
        Self::Answer { result, proof }
    }
}

/// Called with the decoded request and how many requests this endpoint saw
/// before it.
pub type Responder = Arc<dyn Fn(&JsonRpcRequest, usize) -> Reply + Send + Sync>;

#[derive(Default)]
pub struct ScriptedTransport {
    responders: HashMap<String, Responder>,
    sent: Mutex<Vec<JsonRpcRequest>>,
    endpoints: Mutex<Vec<String>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn on<F>(mut self, endpoint: &str, responder: F) -> Self
    where
        F: Fn(&JsonRpcRequest, usize) -> Reply + Send + Sync + 'static,
    {
        self.responders.insert(endpoint.to_string(), Arc::new(responder));
        self
    }

    /// Requests sent to `endpoint` so far.
    pub fn requests_to(&self, endpoint: &str) -> usize {
        self.endpoints.lock().iter().filter(|e| *e == endpoint).count()
    }

    pub fn total_requests(&self) -> usize {
        self.endpoints.lock().len()
    }

    /// Decoded requests in send order.
    pub fn sent(&self) -> Vec<JsonRpcRequest> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, endpoint: &str, body: Bytes, _timeout: Duration) -> Result<Bytes, TransportError> {
        let request: JsonRpcRequest =
            serde_json::from_slice(&body).map_err(|e| TransportError::Protocol(e.to_string()))?;

        let seen = {
            let mut endpoints = self.endpoints.lock();
            let seen = endpoints.iter().filter(|e| *e == endpoint).count();
            endpoints.push(endpoint.to_string());
            seen
        };
        self.sent.lock().push(request.clone());

        let Some(responder) = self.responders.get(endpoint) else {
            return Err(TransportError::ConnectFailed(format!("no route to {endpoint}")));
        };

        let body = match responder(&request, seen) {
            Reply::Answer { result, proof } => json!({
                "jsonrpc": "2.0",
                "id": request.id,
                "result": result,
                "in3": { "proof": proof }
            }),
            Reply::Raw(mut body) => {
                if let Some(object) = body.as_object_mut() {
                    object.insert("id".to_string(), json!(request.id));
                }
                body
            }
            Reply::Fail(error) => return Err(error),
            Reply::Hang => std::future::pending::<Value>().await,
        };
        Ok(Bytes::from(body.to_string()))
    }
}
