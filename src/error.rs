//! Typed errors for parsing, cache mutation, and the block read path.
use thiserror::Error;
use zebra_chain::serialization::SerializationError;

/// Failure while decoding raw block bytes.
#[derive(Error, Debug)]
pub enum ParseError {
    /// The bytes do not decode as a Zcash block.
    #[error("malformed block: {0}")]
    Malformed(#[from] SerializationError),
    /// Re-encoding a decoded transaction to derive its txid failed.
    #[error("re-encoding transaction: {0}")]
    Encode(#[from] std::io::Error),
    /// The first transaction is not a coinbase committing to a height.
    #[error("block has no coinbase height")]
    MissingCoinbaseHeight,
}

/// Violation of the block cache's append contract.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// The block was not for the next height after the cached tail.
    #[error("out-of-sequence add: expected height {expected}, got {got}")]
    OutOfSequence {
        /// Height the cache accepts next.
        expected: u64,
        /// Height of the block offered.
        got: u64,
    },
    /// The block's parent hash is not the cached tail's hash.
    #[error("block at height {height} does not link onto the cached tail")]
    BrokenLinkage {
        /// Height of the block offered.
        height: u64,
    },
}

/// Error surfaced to readers of the block range path.
#[derive(Error, Debug)]
pub enum BlockError {
    /// The height is beyond the node's current chain tip.
    #[error("requested block {height} is newer than the chain tip")]
    NotFound {
        /// Height requested.
        height: u64,
    },
    /// Fetching or decoding the block failed.
    #[error("internal error: {0:#}")]
    Internal(#[from] anyhow::Error),
}

impl BlockError {
    /// True for the "beyond chain tip" case.
    pub fn is_not_found(&self) -> bool {
        matches!(self, BlockError::NotFound { .. })
    }
}
