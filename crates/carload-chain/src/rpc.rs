//! JSON-RPC 2.0 log client.

use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use url::Url;

use crate::{ChainError, ChainResult};

/// One contract log as returned by `eth_getLogs`, before decoding.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawLog {
    /// Indexed topics, signature hash first.
    pub topics: Vec<String>,
    /// ABI-encoded non-indexed fields, 0x-hex.
    pub data: String,
    /// Block the log was mined in, as a hex quantity; pending logs omit it.
    #[serde(default)]
    pub block_number: Option<String>,
    /// Transaction that emitted the log.
    #[serde(default)]
    pub transaction_hash: Option<String>,
    /// Set when the log was reorged out; such logs are dropped.
    #[serde(default)]
    pub removed: bool,
}

/// Read access to contract logs.
///
/// The production implementation is [`RpcClient`]; tests substitute a fake
/// so watcher behaviour is exercised without a live endpoint.
#[async_trait]
pub trait LogClient: Send + Sync {
    /// Current chain head block number.
    ///
    /// # Errors
    ///
    /// Returns an error when the endpoint cannot be reached or answers with
    /// something other than a block quantity.
    async fn latest_block(&self) -> ChainResult<u64>;

    /// Matching logs in the inclusive block range `from..=to`.
    ///
    /// # Errors
    ///
    /// Returns an error when the endpoint cannot be reached or rejects the
    /// filter.
    async fn logs(&self, from: u64, to: u64) -> ChainResult<Vec<RawLog>>;
}

/// JSON-RPC client scoped to one contract and one event topic.
#[derive(Debug, Clone)]
pub struct RpcClient {
    http: reqwest::Client,
    endpoint: Url,
    contract_address: String,
    topic: String,
}

impl RpcClient {
    /// Create a client filtering logs to `contract_address` and `topic`.
    #[must_use]
    pub const fn new(
        http: reqwest::Client,
        endpoint: Url,
        contract_address: String,
        topic: String,
    ) -> Self {
        Self {
            http,
            endpoint,
            contract_address,
            topic,
        }
    }

    async fn call<T: DeserializeOwned + Default>(
        &self,
        method: &'static str,
        params: serde_json::Value,
    ) -> ChainResult<T> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });
        let envelope: RpcEnvelope<T> = self
            .http
            .post(self.endpoint.clone())
            .json(&body)
            .send()
            .await
            .map_err(|source| ChainError::Transport { method, source })?
            .error_for_status()
            .map_err(|source| ChainError::Transport { method, source })?
            .json()
            .await
            .map_err(|source| ChainError::Transport { method, source })?;

        if let Some(error) = envelope.error {
            return Err(ChainError::Rpc {
                method,
                code: error.code,
                message: error.message,
            });
        }
        envelope
            .result
            .ok_or(ChainError::MissingResult { method })
    }
}

#[async_trait]
impl LogClient for RpcClient {
    async fn latest_block(&self) -> ChainResult<u64> {
        let quantity: String = self.call("eth_blockNumber", json!([])).await?;
        crate::decode::quantity_to_u64(&quantity, "block_number")
    }

    async fn logs(&self, from: u64, to: u64) -> ChainResult<Vec<RawLog>> {
        let filter = json!([{
            "address": self.contract_address,
            "topics": [self.topic],
            "fromBlock": format!("{from:#x}"),
            "toBlock": format!("{to:#x}"),
        }]);
        self.call("eth_getLogs", filter).await
    }
}

#[derive(Debug, Deserialize)]
struct RpcEnvelope<T> {
    #[serde(default)]
    result: Option<T>,
    #[serde(default)]
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}
