//! JSON-RPC over HTTP with basic auth, as zcashd serves it.
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{RpcClient, RpcError};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Deserialize)]
struct Envelope {
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<ErrorObject>,
}

#[derive(Deserialize)]
struct ErrorObject {
    code: i64,
    #[serde(default)]
    message: String,
}

/// [`RpcClient`] speaking JSON-RPC 1.0 to a node's HTTP endpoint.
pub struct HttpRpcClient {
    client: Client,
    endpoint: String,
    user: String,
    password: String,
    next_id: AtomicU64,
}

impl HttpRpcClient {
    /// Client for `endpoint` (e.g. `http://127.0.0.1:8232`) using basic-auth credentials.
    pub fn new(
        endpoint: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self, RpcError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| RpcError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            user: user.into(),
            password: password.into(),
            next_id: AtomicU64::new(1),
        })
    }
}

#[async_trait]
impl RpcClient for HttpRpcClient {
    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, RpcError> {
        let body = json!({
            "jsonrpc": "1.0",
            "id": self.next_id.fetch_add(1, Ordering::Relaxed),
            "method": method,
            "params": params,
        });

        // zcashd reports RPC errors with a non-2xx status and a JSON body, so the
        // status is not checked before decoding.
        let resp = self
            .client
            .post(&self.endpoint)
            .basic_auth(&self.user, Some(&self.password))
            .json(&body)
            .send()
            .await
            .map_err(|e| RpcError::Transport(e.to_string()))?;
        let status = resp.status();
        let envelope: Envelope = resp
            .json()
            .await
            .map_err(|e| RpcError::Decode(format!("{method} (HTTP {status}): {e}")))?;

        match envelope.error {
            Some(err) => Err(RpcError::Node {
                code: err.code,
                message: err.message,
            }),
            None => Ok(envelope.result),
        }
    }
}
