//! Tip-following ingest loop.
//!
//! Each step polls the node's best hash, then either idles (cache at tip),
//! appends the next block, waits for a block not yet mined, or rolls the
//! cache back one block when the next block does not link onto the tail.
//! Deeper reorgs unwind one block per step until the chains meet again.
//!
//! Malformed or failing RPC replies end the loop with an error: continuing
//! past them could break the cache's linkage invariant. The host is
//! expected to halt and restart.
//!
//! Cancellation is checked once per step; sleeps and RPC calls in flight
//! are not interrupted, so `stop` can take up to one step to return.
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::cache::BlockCache;
use crate::clock::Clock;
use crate::compact::display_hash;
use crate::config::IngestConfig;
use crate::fetcher::BlockFetcher;
use crate::rpc::RpcClient;

/// Where the loop stands relative to the node's tip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestState {
    /// The cache tail is behind the node's tip.
    CatchingUp,
    /// The cache tail is the node's tip.
    AtTip,
    /// Nothing is cached and the chain has not reached the first height.
    Bootstrapping,
}

/// What one loop iteration did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Cache already holds the tip block at `height`; slept one poll interval.
    AtTip {
        /// Height of the cached tip.
        height: u64,
    },
    /// Appended the block at `height`.
    Added {
        /// Height appended.
        height: u64,
    },
    /// The node has not produced `height` yet; slept briefly.
    NotYetMined {
        /// Height requested.
        height: u64,
    },
    /// The block at `dropped` no longer matched the chain and was removed.
    Reorged {
        /// Height removed from the cache.
        dropped: u64,
    },
    /// Nothing before the first height to roll back to; the attempt should restart.
    AwaitingActivation,
}

/// Why [`IngestLoop::run`] returned without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestExit {
    /// The stop signal was observed.
    Stopped,
    /// Still bootstrapping; the caller should retry from an empty cache.
    AwaitingActivation,
}

/// The ingest state machine. Drive it with [`IngestLoop::step`] or [`IngestLoop::run`].
pub struct IngestLoop<R, C: ?Sized> {
    cache: Arc<BlockCache>,
    fetcher: Arc<BlockFetcher<R>>,
    clock: Arc<C>,
    config: IngestConfig,
    state: IngestState,
    last_log: Instant,
    last_waiting_logged: Option<u64>,
}

impl<R, C> IngestLoop<R, C>
where
    R: RpcClient,
    C: Clock + ?Sized,
{
    /// New loop over `cache`; it is the cache's only writer while it runs.
    pub fn new(
        cache: Arc<BlockCache>,
        fetcher: Arc<BlockFetcher<R>>,
        clock: Arc<C>,
        config: IngestConfig,
    ) -> Self {
        let last_log = clock.now();
        Self {
            cache,
            fetcher,
            clock,
            config,
            state: IngestState::CatchingUp,
            last_log,
            last_waiting_logged: None,
        }
    }

    /// State after the most recent step.
    pub fn state(&self) -> IngestState {
        self.state
    }

    /// The cache being written.
    pub fn cache(&self) -> &Arc<BlockCache> {
        &self.cache
    }

    /// Run one iteration.
    pub async fn step(&mut self) -> anyhow::Result<Step> {
        let best = self
            .fetcher
            .best_block_hash()
            .await
            .context("polling chain tip")?;
        let height = self.cache.next_height();

        if self.cache.latest_hash() == Some(best) {
            self.state = IngestState::AtTip;
            self.cache.sync();
            if self.last_waiting_logged != Some(height) {
                self.last_waiting_logged = Some(height);
                info!(height, "ingest: waiting for block");
            }
            self.clock.sleep(self.config.tip_poll_interval()).await;
            self.last_log = self.clock.now();
            return Ok(Step::AtTip { height: height - 1 });
        }

        self.state = IngestState::CatchingUp;
        let fetched = self
            .fetcher
            .fetch_block(height)
            .await
            .with_context(|| format!("fetching block {height} for ingestion"))?;

        let Some(block) = fetched else {
            if height == self.cache.first_height() {
                return Ok(self.await_activation().await);
            }
            // best hash and getblock raced on a block still being connected
            debug!(height, "ingest: block not yet available");
            self.clock.sleep(self.config.not_mined_retry()).await;
            return Ok(Step::NotYetMined { height });
        };

        if self.cache.hash_match(&block.prev_hash) {
            let hash = block.hash;
            self.cache
                .add(height, block)
                .with_context(|| format!("adding block {height} to cache"))?;
            let now = self.clock.now();
            if self.config.low_latency
                || now.duration_since(self.last_log) >= self.config.log_throttle()
            {
                self.last_log = now;
                info!(height, hash = %display_hash(&hash), "ingest: adding block to cache");
            }
            return Ok(Step::Added { height });
        }

        if height <= self.cache.first_height() + 1 {
            warn!(
                height,
                first_height = self.cache.first_height(),
                "ingest: block does not link onto the first cached block"
            );
            return Ok(self.await_activation().await);
        }

        let dropped = height - 1;
        warn!(
            height = dropped,
            hash = %self.cache.latest_hash().map(|h| display_hash(&h)).unwrap_or_default(),
            "ingest: reorg, dropping block"
        );
        self.cache.reorg(height - 2);
        Ok(Step::Reorged { dropped })
    }

    async fn await_activation(&mut self) -> Step {
        self.state = IngestState::Bootstrapping;
        self.cache.sync();
        info!(
            first_height = self.cache.first_height(),
            "ingest: waiting for the chain to reach the first height"
        );
        self.clock.sleep(self.config.activation_wait()).await;
        Step::AwaitingActivation
    }

    /// Step until `stop` reads true, the loop needs a fresh start, or a fatal error.
    pub async fn run(&mut self, stop: &watch::Receiver<bool>) -> anyhow::Result<IngestExit> {
        loop {
            if *stop.borrow() {
                return Ok(IngestExit::Stopped);
            }
            match self.step().await {
                Ok(Step::AwaitingActivation) => return Ok(IngestExit::AwaitingActivation),
                Ok(_) => {}
                Err(e) => {
                    error!(error = %format!("{e:#}"), "ingest: fatal");
                    return Err(e);
                }
            }
        }
    }
}

struct Running {
    stop: watch::Sender<bool>,
    // closes when the task ends, however it ends
    finished: watch::Receiver<()>,
    handle: JoinHandle<anyhow::Result<()>>,
}

/// Owns the background ingest task. At most one loop runs per `Ingestor`.
///
/// A loop that dies on a fatal error stays registered until its result is
/// collected with [`Ingestor::stop`] or [`Ingestor::join`]; until then
/// [`Ingestor::start`] refuses to spawn a replacement.
pub struct Ingestor<R, C: ?Sized> {
    cache: Arc<BlockCache>,
    fetcher: Arc<BlockFetcher<R>>,
    clock: Arc<C>,
    config: IngestConfig,
    task: Mutex<Option<Running>>,
}

impl<R, C> Ingestor<R, C>
where
    R: RpcClient + 'static,
    C: Clock + ?Sized + 'static,
{
    /// Ingestor writing into `cache`. Nothing runs until [`Ingestor::start`].
    pub fn new(
        cache: Arc<BlockCache>,
        fetcher: Arc<BlockFetcher<R>>,
        clock: Arc<C>,
        config: IngestConfig,
    ) -> Self {
        Self {
            cache,
            fetcher,
            clock,
            config,
            task: Mutex::new(None),
        }
    }

    /// Spawn the ingest loop on the current tokio runtime.
    ///
    /// Returns `false`, doing nothing, if a loop is already running or if a
    /// previous loop ended with a result nobody has collected yet.
    pub fn start(&self) -> bool {
        let mut task = self.task.lock();
        if let Some(running) = task.as_ref() {
            if running.handle.is_finished() {
                warn!("ingest: previous loop ended on its own; stop or join it to collect the result");
            }
            return false;
        }
        if self.config.redownload {
            self.cache.reset();
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        let (finished_tx, finished_rx) = watch::channel(());
        let ingest = IngestLoop::new(
            self.cache.clone(),
            self.fetcher.clone(),
            self.clock.clone(),
            self.config.clone(),
        );
        info!(next_height = self.cache.next_height(), "ingest: starting");
        let handle = tokio::spawn(async move {
            let _finished = finished_tx;
            supervise(ingest, stop_rx).await
        });
        *task = Some(Running {
            stop: stop_tx,
            finished: finished_rx,
            handle,
        });
        true
    }

    /// Signal the loop and wait for it to exit. Returns the loop's fatal
    /// error if it died on its own; a no-op when nothing is running.
    pub async fn stop(&self) -> anyhow::Result<()> {
        let Some(running) = self.task.lock().take() else {
            return Ok(());
        };
        // the receiver is gone if the loop already ended
        let _ = running.stop.send(true);
        running.handle.await.context("ingest task panicked")?
    }

    /// Wait for the loop to end without asking it to stop, then collect its
    /// result. The loop only ends on its own through a fatal error, so this
    /// returns `Err` unless [`Ingestor::stop`] ran concurrently or nothing
    /// was running.
    pub async fn join(&self) -> anyhow::Result<()> {
        let finished = self.task.lock().as_ref().map(|t| t.finished.clone());
        let Some(mut finished) = finished else {
            return Ok(());
        };
        // never sent on; resolves when the task drops the sender
        let _ = finished.changed().await;

        let Some(running) = self.task.lock().take() else {
            // a concurrent stop collected the result
            return Ok(());
        };
        running.handle.await.context("ingest task panicked")?
    }

    /// Whether a loop is currently running.
    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .is_some_and(|t| !t.handle.is_finished())
    }

    /// The cache being written.
    pub fn cache(&self) -> &Arc<BlockCache> {
        &self.cache
    }
}

// Restart from an empty cache whenever a bootstrapping attempt gives up.
async fn supervise<R, C>(mut ingest: IngestLoop<R, C>, stop: watch::Receiver<bool>) -> anyhow::Result<()>
where
    R: RpcClient,
    C: Clock + ?Sized,
{
    loop {
        match ingest.run(&stop).await? {
            IngestExit::Stopped => {
                info!("ingest: stopped");
                return Ok(());
            }
            IngestExit::AwaitingActivation => {
                if ingest.cache.next_height() != ingest.cache.first_height() {
                    ingest.cache.reset();
                }
            }
        }
    }
}
