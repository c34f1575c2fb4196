#![forbid(unsafe_code)]
#![deny(missing_docs)]
//! compactd: block ingestion and compact-block cache for a Zcash light wallet server.
//!
//! ## What you implement
//! - [`RpcClient`]: one JSON-RPC call to the node (an HTTP client ships behind
//!   the `http-rpc` feature).
//! - [`Clock`]: time and sleeping, usually [`SystemClock`].
//!
//! ## What the crate does
//! - Fetches blocks from the node, parses them, and fixes up txids with the
//!   node's own list.
//! - Follows the chain tip into a [`BlockCache`], rolling back across reorgs.
//! - Serves single blocks and ordered ranges from the cache, reading through
//!   to the node for anything outside it, with spam redaction applied.
//!
//! ## Minimal usage
//! ```rust,ignore
//! use std::sync::Arc;
//! use compactd::prelude::*;
//! use compactd::rpc::http::HttpRpcClient;
//!
//! async fn run() -> anyhow::Result<()> {
//!     let rpc = HttpRpcClient::new("http://127.0.0.1:8232", "user", "pass")?;
//!     let fetcher = Arc::new(BlockFetcher::new(rpc));
//!     let clock = Arc::new(SystemClock);
//!
//!     let chain = fetcher.first_rpc(clock.as_ref()).await?;
//!     let config = IngestConfig::default();
//!     let cache = Arc::new(BlockCache::new(
//!         config.first_height(compactd::network::activation_height(&chain)),
//!     ));
//!
//!     let ingestor = Ingestor::new(cache.clone(), fetcher.clone(), clock, config.clone());
//!     ingestor.start();
//!
//!     let server = BlockServer::new(cache, fetcher, config.spam_filter_threshold);
//!     let (mut blocks, done) = server.stream_block_range(419_200, 419_210);
//!     while let Some(block) = blocks.recv().await {
//!         println!("{} {}", block.height, block.hash);
//!     }
//!     done.await??;
//!
//!     ingestor.stop().await
//! }
//! ```
/// Fixed-start window of compact blocks shared by the ingestor and server.
pub mod cache;

/// Time source abstraction.
pub mod clock;

/// Compact block types.
pub mod compact;

/// Ingest settings.
pub mod config;

/// Error types.
pub mod error;

/// Block retrieval and chain info from the node.
pub mod fetcher;

/// Spam redaction for served blocks.
pub mod filter;

/// Background loop that follows the chain tip.
pub mod ingestor;

/// Per-network constants.
pub mod network;

/// Raw Zcash block decoding.
pub mod parser;

/// Node JSON-RPC abstraction and reply types.
pub mod rpc;

/// Block and range lookups for clients.
pub mod server;

// Public re-exports
pub use cache::BlockCache;
pub use clock::{Clock, SystemClock};
pub use compact::CompactBlock;
pub use config::IngestConfig;
pub use error::{BlockError, CacheError, ParseError};
pub use fetcher::{BlockFetcher, LightdInfo};
pub use filter::filter_spammy_block;
pub use ingestor::{IngestLoop, IngestState, Ingestor};
pub use rpc::{RpcClient, RpcError};
pub use server::BlockServer;

/// Convenience prelude for end users.
pub mod prelude {
    pub use crate::{
        BlockCache, BlockError, BlockFetcher, BlockServer, Clock, CompactBlock, IngestConfig,
        Ingestor, RpcClient, SystemClock,
    };
}
