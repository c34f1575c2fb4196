#![allow(dead_code)]
//! Shared fixtures: a raw Zcash block encoder, an in-memory node and a virtual clock.
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bitcoin::hashes::{sha256d, Hash};
use bitcoin::{BlockHash, Txid};
use compactd::rpc::{RpcClient, RpcError};
use compactd::Clock;
use serde_json::{json, Value};

/// ------- Raw block encoding -------

/// A shielded transaction to place after the coinbase.
#[derive(Debug, Clone, Copy)]
pub enum TxSpec {
    /// v4 transaction with this many Sapling outputs.
    Sapling { outputs: usize },
    /// v5 transaction with this many Orchard actions.
    Orchard { actions: usize },
}

/// An encoded block plus what the node would report about it.
#[derive(Debug, Clone)]
pub struct RawBlock {
    pub height: u64,
    pub hash: BlockHash,
    pub prev_hash: BlockHash,
    pub bytes: Vec<u8>,
    /// Display-order txids as `getblock h 1` lists them.
    pub txids: Vec<String>,
}

fn put_compact_size(out: &mut Vec<u8>, n: usize) {
    match n {
        0..=0xfc => out.push(n as u8),
        0xfd..=0xffff => {
            out.push(0xfd);
            out.extend_from_slice(&(n as u16).to_le_bytes());
        }
        _ => {
            out.push(0xfe);
            out.extend_from_slice(&(n as u32).to_le_bytes());
        }
    }
}

fn put_var_bytes(out: &mut Vec<u8>, b: &[u8]) {
    put_compact_size(out, b.len());
    out.extend_from_slice(b);
}

/// Length of a mainnet Equihash (200, 9) solution.
pub const SOLUTION_SIZE: usize = 1344;

/// A prime-order Jubjub point, used for Sapling value commitments and ephemeral keys.
pub fn jubjub_point() -> [u8; 32] {
    let mut b = [0u8; 32];
    hex::decode_to_slice(
        "101870c9a56b20aaad114d966d97923491c7c02033496dba6af3947610f1e1ca",
        &mut b,
    )
    .unwrap();
    b
}

/// The Pallas point with x = 1, used for Orchard value commitments and ephemeral keys.
pub fn pallas_point() -> [u8; 32] {
    let mut b = [0u8; 32];
    b[0] = 1;
    b
}

// BIP34 height: OP_1..OP_16 for small heights, a minimal push otherwise.
fn height_script(height: u64, tag: u8) -> Vec<u8> {
    let mut script = if (1..=16).contains(&height) {
        vec![0x50 + height as u8]
    } else {
        let mut digits = height.to_le_bytes().to_vec();
        while digits.last() == Some(&0) {
            digits.pop();
        }
        if digits.last().map_or(true, |b| b & 0x80 != 0) {
            digits.push(0);
        }
        let mut script = vec![digits.len() as u8];
        script.extend(digits);
        script
    };
    script.extend_from_slice(&[tag, 0x00]);
    script
}

fn v4_tx(script_sig: &[u8], prevout: u8, sapling_outputs: usize) -> Vec<u8> {
    let mut tx = Vec::new();
    tx.extend_from_slice(&(4u32 | 1 << 31).to_le_bytes());
    tx.extend_from_slice(&0x892f_2085u32.to_le_bytes());
    // one input, one output
    put_compact_size(&mut tx, 1);
    tx.extend_from_slice(&[prevout; 32]);
    tx.extend_from_slice(&u32::MAX.to_le_bytes());
    put_var_bytes(&mut tx, script_sig);
    tx.extend_from_slice(&u32::MAX.to_le_bytes());
    put_compact_size(&mut tx, 1);
    tx.extend_from_slice(&625_000_000u64.to_le_bytes());
    put_var_bytes(&mut tx, &[0x51]);
    tx.extend_from_slice(&0u32.to_le_bytes()); // lock_time
    tx.extend_from_slice(&0u32.to_le_bytes()); // expiry
    tx.extend_from_slice(&0i64.to_le_bytes()); // value_balance
    put_compact_size(&mut tx, 0);
    put_compact_size(&mut tx, sapling_outputs);
    for _ in 0..sapling_outputs {
        tx.extend_from_slice(&jubjub_point()); // cv
        tx.extend_from_slice(&[0x02; 32]); // cmu
        tx.extend_from_slice(&jubjub_point()); // epk
        tx.extend_from_slice(&[0x04; 580]);
        tx.extend_from_slice(&[0x05; 80]);
        tx.extend_from_slice(&[0x06; 192]);
    }
    put_compact_size(&mut tx, 0); // joinsplits
    if sapling_outputs > 0 {
        tx.extend_from_slice(&[0x07; 64]);
    }
    tx
}

fn v5_tx(actions: usize) -> Vec<u8> {
    let mut tx = Vec::new();
    tx.extend_from_slice(&(5u32 | 1 << 31).to_le_bytes());
    tx.extend_from_slice(&0x26a7_270au32.to_le_bytes());
    tx.extend_from_slice(&0xc2d6_d0b4u32.to_le_bytes());
    tx.extend_from_slice(&0u32.to_le_bytes());
    tx.extend_from_slice(&0u32.to_le_bytes());
    put_compact_size(&mut tx, 0); // vin
    put_compact_size(&mut tx, 0); // vout
    put_compact_size(&mut tx, 0); // sapling spends
    put_compact_size(&mut tx, 0); // sapling outputs
    put_compact_size(&mut tx, actions);
    for _ in 0..actions {
        tx.extend_from_slice(&pallas_point()); // cv
        tx.extend_from_slice(&[0x12; 32]); // nullifier
        tx.extend_from_slice(&[0x13; 32]); // rk
        tx.extend_from_slice(&[0x14; 32]); // cmx
        tx.extend_from_slice(&pallas_point()); // epk
        tx.extend_from_slice(&[0x16; 580]);
        tx.extend_from_slice(&[0x17; 80]);
    }
    if actions > 0 {
        tx.push(0x03);
        tx.extend_from_slice(&0i64.to_le_bytes());
        tx.extend_from_slice(&[0x18; 32]); // anchor
        put_var_bytes(&mut tx, &[0x19; 40]);
        tx.extend(std::iter::repeat(0x1a).take(actions * 64));
        tx.extend_from_slice(&[0x1b; 64]);
    }
    tx
}

/// Txid the fake node reports for the v5 transaction at `index`; deliberately
/// different from both the double-SHA256 the parser derives and the real digest.
pub fn node_v5_txid(height: u64, index: usize) -> Txid {
    let mut b = [0xf5; 32];
    b[..8].copy_from_slice(&height.to_le_bytes());
    b[8] = index as u8;
    Txid::from_byte_array(b)
}

/// Encode a block at `height` on top of `prev_hash`. `tag` separates forks.
pub fn encode_block(height: u64, prev_hash: BlockHash, tag: u8, txs: &[TxSpec]) -> RawBlock {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&4u32.to_le_bytes());
    bytes.extend_from_slice(prev_hash.as_byte_array());
    bytes.extend_from_slice(&[0u8; 32]); // merkle root
    bytes.extend_from_slice(&[0u8; 32]); // commitments
    bytes.extend_from_slice(&(1_600_000_000u32 + height as u32).to_le_bytes());
    bytes.extend_from_slice(&0x1d00_ffffu32.to_le_bytes());
    bytes.extend_from_slice(&[tag; 32]); // nonce
    put_var_bytes(&mut bytes, &[tag; SOLUTION_SIZE]);
    let hash = BlockHash::from_raw_hash(sha256d::Hash::hash(&bytes));

    let mut encoded = vec![v4_tx(&height_script(height, tag), 0, 0)];
    let mut txids = Vec::new();
    for (i, kind) in txs.iter().enumerate() {
        encoded.push(match *kind {
            TxSpec::Sapling { outputs } => v4_tx(&[], i as u8 + 1, outputs),
            TxSpec::Orchard { actions } => v5_tx(actions),
        });
    }
    put_compact_size(&mut bytes, encoded.len());
    for (i, tx) in encoded.iter().enumerate() {
        bytes.extend_from_slice(tx);
        let is_v5 = i > 0 && matches!(txs[i - 1], TxSpec::Orchard { .. });
        let txid = if is_v5 {
            node_v5_txid(height, i)
        } else {
            Txid::from_raw_hash(sha256d::Hash::hash(tx))
        };
        txids.push(txid.to_string());
    }

    RawBlock {
        height,
        hash,
        prev_hash,
        bytes,
        txids,
    }
}

/// Blocks `from..=to` with no shielded transactions, the first built on `parent`.
pub fn chain(from: u64, to: u64, tag: u8, parent: BlockHash) -> Vec<RawBlock> {
    let mut prev = parent;
    (from..=to)
        .map(|h| {
            let b = encode_block(h, prev, tag, &[]);
            prev = b.hash;
            b
        })
        .collect()
}

/// Parent of the lowest block in test chains.
pub fn genesis_parent() -> BlockHash {
    BlockHash::from_byte_array([0x99; 32])
}

/// ------- In-memory node -------

#[derive(Default)]
struct NodeState {
    blocks: BTreeMap<u64, RawBlock>,
    best: Option<BlockHash>,
    raw_overrides: HashMap<u64, Value>,
    txid_overrides: HashMap<u64, Vec<String>>,
    failures: HashMap<String, VecDeque<RpcError>>,
    calls: HashMap<String, usize>,
    chain_info: Value,
}

/// Answers the node RPCs the crate issues from an in-memory chain.
pub struct MockNode {
    state: Mutex<NodeState>,
}

impl MockNode {
    pub fn new(blocks: Vec<RawBlock>) -> Self {
        let node = Self {
            state: Mutex::new(NodeState {
                chain_info: json!({
                    "chain": "regtest",
                    "blocks": 0,
                    "bestblockhash": "00",
                }),
                ..Default::default()
            }),
        };
        node.set_chain(blocks);
        node
    }

    /// Replace the whole chain; the best hash becomes the new tip.
    pub fn set_chain(&self, blocks: Vec<RawBlock>) {
        let mut s = self.state.lock().unwrap();
        s.best = blocks.last().map(|b| b.hash);
        s.blocks = blocks.into_iter().map(|b| (b.height, b)).collect();
    }

    /// Append blocks and move the best hash to the last one.
    pub fn extend(&self, blocks: Vec<RawBlock>) {
        let mut s = self.state.lock().unwrap();
        for b in blocks {
            s.best = Some(b.hash);
            s.blocks.insert(b.height, b);
        }
    }

    pub fn set_best_hash(&self, hash: BlockHash) {
        self.state.lock().unwrap().best = Some(hash);
    }

    /// Serve `reply` for `getblock height 0` instead of the block's hex.
    pub fn override_raw(&self, height: u64, reply: Value) {
        self.state.lock().unwrap().raw_overrides.insert(height, reply);
    }

    pub fn override_txids(&self, height: u64, txids: Vec<String>) {
        self.state.lock().unwrap().txid_overrides.insert(height, txids);
    }

    /// Fail the next `times` calls to `method` with `err`.
    pub fn fail_next(&self, method: &str, times: usize, err: RpcError) {
        let mut s = self.state.lock().unwrap();
        let queue = s.failures.entry(method.to_string()).or_default();
        queue.extend(std::iter::repeat(err).take(times));
    }

    pub fn set_chain_info(&self, info: Value) {
        self.state.lock().unwrap().chain_info = info;
    }

    pub fn calls(&self, method: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .get(method)
            .copied()
            .unwrap_or(0)
    }

    pub fn block(&self, height: u64) -> RawBlock {
        self.state.lock().unwrap().blocks[&height].clone()
    }
}

fn not_mined() -> RpcError {
    RpcError::Node {
        code: -8,
        message: "Block height out of range".into(),
    }
}

#[async_trait]
impl RpcClient for MockNode {
    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, RpcError> {
        let mut s = self.state.lock().unwrap();
        *s.calls.entry(method.to_string()).or_default() += 1;
        if let Some(err) = s.failures.get_mut(method).and_then(|q| q.pop_front()) {
            return Err(err);
        }
        match method {
            "getbestblockhash" => {
                let best = s.best.unwrap_or_else(BlockHash::all_zeros);
                Ok(json!(best.to_string()))
            }
            "getblock" => {
                let height: u64 = params[0]
                    .as_str()
                    .and_then(|h| h.parse().ok())
                    .ok_or_else(|| RpcError::Node {
                        code: -8,
                        message: "invalid height".into(),
                    })?;
                let verbosity = params[1].as_u64().unwrap_or(1);
                if verbosity == 0 {
                    if let Some(reply) = s.raw_overrides.get(&height) {
                        return Ok(reply.clone());
                    }
                }
                let block = s.blocks.get(&height).ok_or_else(not_mined)?;
                if verbosity == 0 {
                    return Ok(json!(hex::encode(&block.bytes)));
                }
                let txids = s
                    .txid_overrides
                    .get(&height)
                    .cloned()
                    .unwrap_or_else(|| block.txids.clone());
                Ok(json!({
                    "hash": block.hash.to_string(),
                    "height": height,
                    "tx": txids,
                }))
            }
            "getblockchaininfo" => Ok(s.chain_info.clone()),
            "getinfo" => Ok(json!({
                "build": "v5.9.0",
                "subversion": "/MagicBean:5.9.0/",
            })),
            _ => Err(RpcError::Node {
                code: -32601,
                message: "Method not found".into(),
            }),
        }
    }
}

/// ------- Virtual clock -------

/// Records sleeps and advances virtual time instead of waiting.
pub struct MockClock {
    start: Instant,
    elapsed: Mutex<Duration>,
    sleeps: Mutex<Vec<Duration>>,
}

impl MockClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            elapsed: Mutex::new(Duration::ZERO),
            sleeps: Mutex::new(Vec::new()),
        }
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }
}

#[async_trait]
impl Clock for MockClock {
    fn now(&self) -> Instant {
        self.start + *self.elapsed.lock().unwrap()
    }

    async fn sleep(&self, d: Duration) {
        {
            self.sleeps.lock().unwrap().push(d);
            *self.elapsed.lock().unwrap() += d;
        }
        // let a stop request or the test body run
        tokio::task::yield_now().await;
    }
}
