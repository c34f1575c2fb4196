//! The node RPC boundary: a single `call(method, params)` capability plus
//! the reply shapes the core reads out of it.
use std::collections::HashMap;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

#[cfg(feature = "http-rpc")]
pub mod http;

/// zcashd's `RPC_INVALID_PARAMETER`, returned by `getblock` for a height not yet mined.
pub const HEIGHT_NOT_MINED: i64 = -8;

/// Upgrade id under which `getblockchaininfo` reports the Sapling activation.
pub const SAPLING_BRANCH_ID: &str = "76b809bb";

/// Failure of a single RPC call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RpcError {
    /// The node answered with a JSON-RPC error object.
    #[error("node error {code}: {message}")]
    Node {
        /// JSON-RPC error code.
        code: i64,
        /// Human-readable message from the node.
        message: String,
    },
    /// The request never produced a reply (connection refused, timeout, HTTP failure).
    #[error("transport: {0}")]
    Transport(String),
    /// The reply could not be decoded.
    #[error("malformed reply: {0}")]
    Decode(String),
}

impl RpcError {
    /// The node's numeric error code, if the node produced one.
    pub fn code(&self) -> Option<i64> {
        match self {
            RpcError::Node { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// True when the requested height does not exist yet.
    pub fn is_height_not_mined(&self) -> bool {
        self.code() == Some(HEIGHT_NOT_MINED)
    }
}

/// Issues a named call against the chain daemon.
#[async_trait]
pub trait RpcClient: Send + Sync {
    /// Send `method` with positional JSON `params`, returning the raw `result` value.
    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, RpcError>;
}

/// One network upgrade entry of `getblockchaininfo`.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub struct UpgradeInfo {
    /// Height at which the upgrade activates.
    #[serde(rename = "activationheight")]
    pub activation_height: u64,
    /// e.g. "active", "pending".
    #[serde(default)]
    pub status: String,
}

/// Consensus branch ids of `getblockchaininfo`.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub struct ConsensusInfo {
    /// Branch id in effect at the tip.
    #[serde(default)]
    pub chaintip: String,
    /// Branch id for the next block.
    #[serde(default)]
    pub nextblock: String,
}

/// Reply to `getblockchaininfo`, reduced to the fields the core uses.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct BlockchainInfo {
    /// "main", "test" or "regtest".
    pub chain: String,
    /// Upgrades keyed by branch id.
    #[serde(default)]
    pub upgrades: HashMap<String, UpgradeInfo>,
    /// Height of the best block.
    pub blocks: u64,
    /// Display-order hash of the best block.
    #[serde(rename = "bestblockhash")]
    pub best_block_hash: String,
    /// Consensus branch ids.
    #[serde(default)]
    pub consensus: ConsensusInfo,
    /// Node's estimate of the network height.
    #[serde(rename = "estimatedheight", default)]
    pub estimated_height: u64,
}

impl BlockchainInfo {
    /// Sapling activation height as reported by the node, if the upgrade is listed.
    pub fn sapling_activation_height(&self) -> Option<u64> {
        self.upgrades
            .get(SAPLING_BRANCH_ID)
            .map(|u| u.activation_height)
    }
}

/// Reply to `getinfo`.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct NodeInfo {
    /// Node build string.
    #[serde(default)]
    pub build: String,
    /// Node subversion string.
    #[serde(default)]
    pub subversion: String,
}

/// Reply to `getblock <height> 1`; only the ordered txid list is read.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct VerboseBlock {
    /// Display-order txids.
    pub tx: Vec<String>,
}
