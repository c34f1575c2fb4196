//! Compact block representation served to light clients.
//!
//! Hashes and txids are kept in internal (little-endian) byte order; their
//! `Display` impls render the reversed, big-endian form the node reports.
use bitcoin::{BlockHash, Txid};

/// Version of the compact block format produced by [`crate::parser::Block::to_compact`].
pub const COMPACT_PROTO_VERSION: u32 = 1;

/// Number of leading ciphertext bytes a light client needs for trial decryption.
pub const COMPACT_NOTE_SIZE: usize = 52;

/// A reduced block carrying only what light clients need to scan for notes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactBlock {
    /// Format version.
    pub proto_version: u32,
    /// Block height.
    pub height: u64,
    /// Hash of this block.
    pub hash: BlockHash,
    /// Hash of the parent block.
    pub prev_hash: BlockHash,
    /// Block header timestamp (unix seconds).
    pub time: u32,
    /// Transactions with at least one shielded component, in block order.
    pub vtx: Vec<CompactTx>,
}

/// The shielded parts of one transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactTx {
    /// Position of the transaction within its block.
    pub index: u64,
    /// Transaction id (internal byte order).
    pub hash: Txid,
    /// Fee in zatoshis; not computed by the parser and left at zero.
    pub fee: u32,
    /// Sapling spends.
    pub spends: Vec<CompactSaplingSpend>,
    /// Sapling outputs.
    pub outputs: Vec<CompactSaplingOutput>,
    /// Orchard actions.
    pub actions: Vec<CompactOrchardAction>,
}

impl CompactTx {
    /// Outputs plus actions: the count the spam filter compares against.
    pub fn shielded_output_count(&self) -> usize {
        self.outputs.len() + self.actions.len()
    }
}

/// A Sapling spend reduced to its nullifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactSaplingSpend {
    /// Nullifier of the spent note.
    pub nf: Vec<u8>,
}

/// A Sapling output reduced to what trial decryption needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactSaplingOutput {
    /// Note commitment u-coordinate.
    pub cmu: Vec<u8>,
    /// Ephemeral public key.
    pub ephemeral_key: Vec<u8>,
    /// First [`COMPACT_NOTE_SIZE`] bytes of the note ciphertext.
    pub ciphertext: Vec<u8>,
}

/// An Orchard action reduced to what trial decryption needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactOrchardAction {
    /// Nullifier of the spent note.
    pub nullifier: Vec<u8>,
    /// Note commitment x-coordinate.
    pub cmx: Vec<u8>,
    /// Ephemeral public key.
    pub ephemeral_key: Vec<u8>,
    /// First [`COMPACT_NOTE_SIZE`] bytes of the note ciphertext.
    pub ciphertext: Vec<u8>,
}

/// Render a hash the way the node displays it (byte-reversed hex).
pub fn display_hash(hash: &BlockHash) -> String {
    hash.to_string()
}
