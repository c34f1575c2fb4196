//! In-memory window of compact blocks `[first_height, next_height)`.
//!
//! Invariants, held under one lock so readers never see a half-applied write:
//! - heights are contiguous from `first_height`;
//! - `block(h).prev_hash == block(h - 1).hash` for every cached `h > first_height`;
//! - `latest_hash` is the hash of the highest cached block.
use std::sync::Arc;

use bitcoin::BlockHash;
use parking_lot::RwLock;
use tracing::{debug, info};

use crate::compact::{display_hash, CompactBlock};
use crate::error::CacheError;

/// Shared block cache. The ingestor is its only writer.
pub struct BlockCache {
    first_height: u64,
    inner: RwLock<Window>,
}

#[derive(Default)]
struct Window {
    blocks: Vec<Arc<CompactBlock>>,
    synced: bool,
}

impl Window {
    fn latest_hash(&self) -> Option<BlockHash> {
        self.blocks.last().map(|b| b.hash)
    }
}

impl BlockCache {
    /// Empty cache whose window starts at `first_height`.
    pub fn new(first_height: u64) -> Self {
        Self {
            first_height,
            inner: RwLock::new(Window::default()),
        }
    }

    /// Fixed lower bound of the window.
    pub fn first_height(&self) -> u64 {
        self.first_height
    }

    /// Height the next `add` must carry.
    pub fn next_height(&self) -> u64 {
        self.first_height + self.inner.read().blocks.len() as u64
    }

    /// Hash of the highest cached block, `None` while empty.
    pub fn latest_hash(&self) -> Option<BlockHash> {
        self.inner.read().latest_hash()
    }

    /// Whether a block whose parent is `prev_hash` extends the cache.
    /// An empty cache accepts any parent.
    pub fn hash_match(&self, prev_hash: &BlockHash) -> bool {
        match self.inner.read().latest_hash() {
            Some(latest) => latest == *prev_hash,
            None => true,
        }
    }

    /// Block at `height`, if inside the window.
    pub fn get(&self, height: u64) -> Option<Arc<CompactBlock>> {
        let offset = height.checked_sub(self.first_height)?;
        self.inner.read().blocks.get(offset as usize).cloned()
    }

    /// Append `block` at `height`. Fails without mutating anything unless
    /// `height == next_height()` and the block links onto the current tail.
    pub fn add(&self, height: u64, block: CompactBlock) -> Result<(), CacheError> {
        let mut w = self.inner.write();
        let expected = self.first_height + w.blocks.len() as u64;
        if height != expected || block.height != height {
            return Err(CacheError::OutOfSequence {
                expected,
                got: if height != expected { height } else { block.height },
            });
        }
        if let Some(latest) = w.latest_hash() {
            if block.prev_hash != latest {
                return Err(CacheError::BrokenLinkage { height });
            }
        }
        debug!(height, hash = %display_hash(&block.hash), "cache: add");
        w.blocks.push(Arc::new(block));
        Ok(())
    }

    /// Drop every block above `height`, so that `next_height()` becomes `height + 1`.
    /// Clamped to the window: never extends it and never goes below `first_height`.
    pub fn reorg(&self, height: u64) {
        let mut w = self.inner.write();
        let keep = height
            .saturating_add(1)
            .saturating_sub(self.first_height)
            .min(w.blocks.len() as u64) as usize;
        let dropped = w.blocks.len() - keep;
        w.blocks.truncate(keep);
        info!(
            height,
            dropped,
            next_height = self.first_height + keep as u64,
            "cache: reorg"
        );
    }

    /// Record that ingestion has caught up with the node's tip.
    pub fn sync(&self) {
        self.inner.write().synced = true;
    }

    /// Whether the cache has reached the tip at least once since construction or reset.
    pub fn is_synced(&self) -> bool {
        self.inner.read().synced
    }

    /// Empty the window; `first_height` is unchanged.
    pub fn reset(&self) {
        let mut w = self.inner.write();
        w.blocks.clear();
        w.synced = false;
        info!(first_height = self.first_height, "cache: reset");
    }
}
