//! Order book sync configuration.

use std::time::Duration;

use serde::Deserialize;

use crate::application::book::{BookSyncSettings, GapPolicy};

/// `[order_book]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderBookConfig {
    /// `{ policy = "resnapshot" }` or `{ policy = "reorder", max_pending = 50 }`.
    #[serde(default)]
    pub gap_policy: GapPolicy,
    /// Diffs held per pair while waiting for a snapshot.
    #[serde(default = "default_replay_window")]
    pub replay_window: usize,
    /// Delay between snapshot retries (milliseconds).
    #[serde(default = "default_snapshot_retry_delay_ms")]
    pub snapshot_retry_delay_ms: u64,
    /// Per-pair subscriber buffer.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_replay_window() -> usize {
    1000
}

fn default_snapshot_retry_delay_ms() -> u64 {
    5000
}

fn default_channel_capacity() -> usize {
    1024
}

impl OrderBookConfig {
    #[must_use]
    pub fn settings(&self) -> BookSyncSettings {
        BookSyncSettings {
            gap_policy: self.gap_policy,
            replay_window: self.replay_window,
            snapshot_retry_delay: Duration::from_millis(self.snapshot_retry_delay_ms),
            channel_capacity: self.channel_capacity,
        }
    }
}

impl Default for OrderBookConfig {
    fn default() -> Self {
        Self {
            gap_policy: GapPolicy::default(),
            replay_window: default_replay_window(),
            snapshot_retry_delay_ms: default_snapshot_retry_delay_ms(),
            channel_capacity: default_channel_capacity(),
        }
    }
}
