//! Single-block retrieval from the node, plus the few chain-info calls the
//! server needs.
//!
//! A block is fetched twice: once raw (`getblock h 0`) to parse it, once
//! verbose (`getblock h 1`) to take the node's txids, because the parser
//! derives v5 txids incorrectly.
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context};
use bitcoin::{BlockHash, Txid};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::{error, warn};

use crate::clock::Clock;
use crate::compact::CompactBlock;
use crate::parser::parse_block;
use crate::rpc::{BlockchainInfo, NodeInfo, RpcClient, VerboseBlock};

/// Consecutive `getblockchaininfo` failures tolerated by [`BlockFetcher::first_rpc`].
pub const FIRST_RPC_MAX_RETRIES: u32 = 10;

/// Name this server reports in [`LightdInfo::vendor`].
pub const VENDOR: &str = "compactd";

/// Server and chain description returned to light clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LightdInfo {
    /// Version of this crate.
    pub version: String,
    /// Server implementation name.
    pub vendor: String,
    /// Transparent address queries are supported.
    pub taddr_support: bool,
    /// "main", "test" or "regtest".
    pub chain_name: String,
    /// First height with Sapling rules.
    pub sapling_activation_height: u64,
    /// Consensus branch id at the chain tip.
    pub consensus_branch_id: String,
    /// Node's best block height.
    pub block_height: u64,
    /// Node's estimate of the network height.
    pub estimated_height: u64,
    /// Node build string.
    pub node_build: String,
    /// Node subversion string.
    pub node_subversion: String,
}

/// Fetches and validates blocks from the node.
pub struct BlockFetcher<R> {
    rpc: R,
}

impl<R: RpcClient> BlockFetcher<R> {
    /// Wrap an RPC client.
    pub fn new(rpc: R) -> Self {
        Self { rpc }
    }

    /// The underlying RPC client.
    pub fn rpc(&self) -> &R {
        &self.rpc
    }

    /// Fetch the compact block at `height`.
    ///
    /// `Ok(None)` means the node has not produced that height yet. Every
    /// other failure, including a reply for the wrong height, trailing bytes
    /// after the block or a txid list of the wrong length, is an error.
    pub async fn fetch_block(&self, height: u64) -> anyhow::Result<Option<CompactBlock>> {
        let raw = match self.rpc.call("getblock", block_params(height, 0)).await {
            Ok(v) => v,
            Err(e) if e.is_height_not_mined() => return Ok(None),
            Err(e) => return Err(e).with_context(|| format!("getblock({height}, 0)")),
        };
        let block_hex: String = decode("getblock", raw)?;
        let bytes = hex::decode(block_hex.trim())
            .with_context(|| format!("decoding getblock({height}) hex"))?;

        let (mut block, rest) =
            parse_block(&bytes).with_context(|| format!("parsing block {height}"))?;
        if !rest.is_empty() {
            bail!("block {height}: {} trailing bytes after block", rest.len());
        }
        let parsed_height = block
            .height()
            .with_context(|| format!("reading height of block {height}"))?;
        if parsed_height != height {
            bail!("requested block {height}, node returned block {parsed_height}");
        }

        let verbose: VerboseBlock = decode(
            "getblock",
            self.rpc
                .call("getblock", block_params(height, 1))
                .await
                .with_context(|| format!("getblock({height}, 1)"))?,
        )?;
        if verbose.tx.len() != block.transaction_count() {
            bail!(
                "block {height}: node lists {} txids, parsed {} transactions",
                verbose.tx.len(),
                block.transaction_count()
            );
        }
        for (txid, id) in block.txids_mut().iter_mut().zip(&verbose.tx) {
            // display (big-endian) hex -> internal byte order
            *txid = Txid::from_str(id)
                .with_context(|| format!("block {height}: bad txid {id:?}"))?;
        }

        let compact = block
            .to_compact()
            .with_context(|| format!("compacting block {height}"))?;
        Ok(Some(compact))
    }

    /// Hash of the node's best block, in internal byte order.
    pub async fn best_block_hash(&self) -> anyhow::Result<BlockHash> {
        let raw = self
            .rpc
            .call("getbestblockhash", vec![])
            .await
            .context("getbestblockhash")?;
        let display: String = decode("getbestblockhash", raw)?;
        BlockHash::from_str(display.trim())
            .with_context(|| format!("bad getbestblockhash reply {display:?}"))
    }

    /// `getblockchaininfo`.
    pub async fn blockchain_info(&self) -> anyhow::Result<BlockchainInfo> {
        let raw = self
            .rpc
            .call("getblockchaininfo", vec![])
            .await
            .context("getblockchaininfo")?;
        decode("getblockchaininfo", raw)
    }

    /// Confirm the node is reachable, retrying with a linearly growing backoff
    /// (`10 + 5 * retry` seconds). Gives up after [`FIRST_RPC_MAX_RETRIES`]
    /// retries; a reply that does not parse fails immediately.
    pub async fn first_rpc<C: Clock + ?Sized>(&self, clock: &C) -> anyhow::Result<BlockchainInfo> {
        let mut retry = 0u32;
        loop {
            match self.rpc.call("getblockchaininfo", vec![]).await {
                Ok(raw) => {
                    if retry > 0 {
                        warn!(retry, "getblockchaininfo RPC successful");
                    }
                    return decode("getblockchaininfo", raw);
                }
                Err(e) => {
                    retry += 1;
                    if retry > FIRST_RPC_MAX_RETRIES {
                        error!(failures = retry, error = %e, "unable to reach node with getblockchaininfo");
                        return Err(e).context(format!(
                            "node unreachable after {retry} getblockchaininfo attempts"
                        ));
                    }
                    warn!(error = %e, retry, "getblockchaininfo failed, retrying");
                    clock
                        .sleep(Duration::from_secs(10 + 5 * retry as u64))
                        .await;
                }
            }
        }
    }

    /// Combine `getinfo` and `getblockchaininfo` into a server description.
    pub async fn lightd_info(&self) -> anyhow::Result<LightdInfo> {
        let node: NodeInfo = decode(
            "getinfo",
            self.rpc.call("getinfo", vec![]).await.context("getinfo")?,
        )?;
        let chain = self.blockchain_info().await?;
        Ok(LightdInfo {
            version: env!("CARGO_PKG_VERSION").to_string(),
            vendor: VENDOR.to_string(),
            taddr_support: true,
            sapling_activation_height: chain.sapling_activation_height().unwrap_or(0),
            chain_name: chain.chain,
            consensus_branch_id: chain.consensus.chaintip,
            block_height: chain.blocks,
            estimated_height: chain.estimated_height,
            node_build: node.build,
            node_subversion: node.subversion,
        })
    }
}

// zcashd takes the height as a string so it is not mistaken for a hash.
fn block_params(height: u64, verbosity: u8) -> Vec<Value> {
    vec![json!(height.to_string()), json!(verbosity)]
}

fn decode<T: DeserializeOwned>(method: &str, raw: Value) -> anyhow::Result<T> {
    serde_json::from_value(raw).with_context(|| format!("malformed {method} reply"))
}
