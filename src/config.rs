//! Ingestion and serving settings.
//!
//! Parsing happens in the host; [`IngestConfig`] is `Deserialize` with
//! defaults for every field so a partial JSON document is enough.
use std::time::Duration;

use serde::Deserialize;

/// Default spam threshold: transactions with more shielded outputs plus actions are redacted.
pub const DEFAULT_SPAM_FILTER_THRESHOLD: usize = 50;

/// Settings consumed by the ingestor and the block server.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct IngestConfig {
    /// Start (or restart) the cache at this height instead of the activation height.
    pub sync_from_height: Option<u64>,
    /// Discard cached blocks when the ingestor starts and ingest again from the first height.
    pub redownload: bool,
    /// Redaction threshold for [`crate::filter::filter_spammy_block`]; 0 disables it.
    pub spam_filter_threshold: usize,
    /// Log every added block instead of throttling progress messages.
    pub low_latency: bool,
    /// Idle poll interval once the cache has reached the chain tip.
    pub tip_poll_interval_ms: u64,
    /// Wait before asking again for a height the node has not produced yet.
    pub not_mined_retry_ms: u64,
    /// Wait while the chain is still below the activation height.
    pub activation_wait_secs: u64,
    /// Minimum gap between "adding block" progress messages.
    pub log_throttle_secs: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            sync_from_height: None,
            redownload: false,
            spam_filter_threshold: DEFAULT_SPAM_FILTER_THRESHOLD,
            low_latency: false,
            tip_poll_interval_ms: 2_000,
            not_mined_retry_ms: 1_000,
            activation_wait_secs: 20,
            log_throttle_secs: 4,
        }
    }
}

impl IngestConfig {
    /// Lower bound of the cache window given the network's activation height.
    pub fn first_height(&self, activation_height: u64) -> u64 {
        self.sync_from_height.unwrap_or(activation_height)
    }

    /// See [`IngestConfig::tip_poll_interval_ms`].
    pub fn tip_poll_interval(&self) -> Duration {
        Duration::from_millis(self.tip_poll_interval_ms)
    }

    /// See [`IngestConfig::not_mined_retry_ms`].
    pub fn not_mined_retry(&self) -> Duration {
        Duration::from_millis(self.not_mined_retry_ms)
    }

    /// See [`IngestConfig::activation_wait_secs`].
    pub fn activation_wait(&self) -> Duration {
        Duration::from_secs(self.activation_wait_secs)
    }

    /// See [`IngestConfig::log_throttle_secs`].
    pub fn log_throttle(&self) -> Duration {
        Duration::from_secs(self.log_throttle_secs)
    }
}
