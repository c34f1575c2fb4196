//! Read path: cache-first block lookup with read-through to the node, and
//! ordered range streaming through the spam filter.
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::cache::BlockCache;
use crate::compact::CompactBlock;
use crate::error::BlockError;
use crate::fetcher::{BlockFetcher, LightdInfo};
use crate::filter::filter_spammy_block;
use crate::rpc::RpcClient;

/// Capacity of the block channel returned by [`BlockServer::stream_block_range`].
pub const BLOCK_RANGE_CHANNEL_CAPACITY: usize = 16;

/// Serves blocks to any number of concurrent readers. Never writes to the cache.
pub struct BlockServer<R> {
    cache: Arc<BlockCache>,
    fetcher: Arc<BlockFetcher<R>>,
    spam_filter_threshold: usize,
}

impl<R> Clone for BlockServer<R> {
    fn clone(&self) -> Self {
        Self {
            cache: self.cache.clone(),
            fetcher: self.fetcher.clone(),
            spam_filter_threshold: self.spam_filter_threshold,
        }
    }
}

impl<R: RpcClient + 'static> BlockServer<R> {
    /// Server reading `cache`, falling back to `fetcher` on a miss.
    pub fn new(
        cache: Arc<BlockCache>,
        fetcher: Arc<BlockFetcher<R>>,
        spam_filter_threshold: usize,
    ) -> Self {
        Self {
            cache,
            fetcher,
            spam_filter_threshold,
        }
    }

    /// The cache being read.
    pub fn cache(&self) -> &Arc<BlockCache> {
        &self.cache
    }

    /// The fetcher used for cache misses.
    pub fn fetcher(&self) -> &Arc<BlockFetcher<R>> {
        &self.fetcher
    }

    /// Block at `height`: from the cache if present, otherwise straight from
    /// the node without inserting it into the cache.
    pub async fn get_block(&self, height: u64) -> Result<Arc<CompactBlock>, BlockError> {
        if let Some(block) = self.cache.get(height) {
            return Ok(block);
        }
        debug!(height, "server: cache miss, reading through");
        match self.fetcher.fetch_block(height).await? {
            Some(block) => Ok(Arc::new(block)),
            None => Err(BlockError::NotFound { height }),
        }
    }

    /// Send every block in `[min(start, end), max(start, end)]` to `blocks`,
    /// descending when `start > end`, each passed through the spam filter.
    ///
    /// `done` receives exactly one value: the first error, which ends the
    /// range, or `Ok(())` after the last block. If the block receiver is
    /// dropped the range ends early and `done` gets `Ok(())`.
    pub async fn get_block_range(
        &self,
        start: u64,
        end: u64,
        spam_filter_threshold: usize,
        blocks: mpsc::Sender<Arc<CompactBlock>>,
        done: oneshot::Sender<Result<(), BlockError>>,
    ) {
        let result = self
            .send_range(start, end, spam_filter_threshold, &blocks)
            .await;
        // the caller may have stopped listening; nothing left to notify
        let _ = done.send(result);
    }

    async fn send_range(
        &self,
        start: u64,
        end: u64,
        spam_filter_threshold: usize,
        blocks: &mpsc::Sender<Arc<CompactBlock>>,
    ) -> Result<(), BlockError> {
        let (low, high) = if start <= end { (start, end) } else { (end, start) };
        for i in 0..=(high - low) {
            let height = if start > end { high - i } else { low + i };
            let block = self.get_block(height).await?;
            if blocks
                .send(filter_spammy_block(block, spam_filter_threshold))
                .await
                .is_err()
            {
                debug!(height, "server: range receiver dropped");
                break;
            }
        }
        Ok(())
    }

    /// Spawn [`BlockServer::get_block_range`] with the configured spam
    /// threshold, returning the block stream and its terminal result.
    pub fn stream_block_range(
        &self,
        start: u64,
        end: u64,
    ) -> (
        mpsc::Receiver<Arc<CompactBlock>>,
        oneshot::Receiver<Result<(), BlockError>>,
    ) {
        let (block_tx, block_rx) = mpsc::channel(BLOCK_RANGE_CHANNEL_CAPACITY);
        let (done_tx, done_rx) = oneshot::channel();
        let server = self.clone();
        let threshold = self.spam_filter_threshold;
        tokio::spawn(async move {
            server
                .get_block_range(start, end, threshold, block_tx, done_tx)
                .await
        });
        (block_rx, done_rx)
    }

    /// Server and chain description, read from the node.
    pub async fn lightd_info(&self) -> Result<LightdInfo, BlockError> {
        Ok(self.fetcher.lightd_info().await?)
    }
}
