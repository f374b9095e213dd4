//! Order reconciliation configuration.

use std::time::Duration;

use serde::Deserialize;

use crate::application::order::TrackerSettings;

/// `[orders]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderConfig {
    /// Consecutive "not found" polls before an order is failed.
    #[serde(default = "default_not_found_threshold")]
    pub not_found_threshold: u32,
    /// How long closed orders absorb late events (milliseconds).
    #[serde(default = "default_closed_order_ttl_ms")]
    pub closed_order_ttl_ms: u64,
    #[serde(default = "default_closed_order_max")]
    pub closed_order_max: usize,
    /// Backup poll interval while the private stream is down (milliseconds).
    #[serde(default = "default_short_poll_interval_ms")]
    pub short_poll_interval_ms: u64,
    /// Backup poll interval while the private stream is healthy (milliseconds).
    #[serde(default = "default_long_poll_interval_ms")]
    pub long_poll_interval_ms: u64,
    /// Private stream silence that counts as unhealthy (milliseconds).
    #[serde(default = "default_stream_silence_threshold_ms")]
    pub stream_silence_threshold_ms: u64,
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
    /// Crash-recovery journal. Disabled when unset.
    #[serde(default)]
    pub journal_path: Option<String>,
}

fn default_not_found_threshold() -> u32 {
    3
}

fn default_closed_order_ttl_ms() -> u64 {
    30_000
}

fn default_closed_order_max() -> usize {
    1000
}

fn default_short_poll_interval_ms() -> u64 {
    5000
}

fn default_long_poll_interval_ms() -> u64 {
    120_000
}

fn default_stream_silence_threshold_ms() -> u64 {
    60_000
}

fn default_event_capacity() -> usize {
    1024
}

impl OrderConfig {
    #[must_use]
    pub fn settings(&self) -> TrackerSettings {
        TrackerSettings {
            not_found_threshold: self.not_found_threshold,
            closed_order_ttl: Duration::from_millis(self.closed_order_ttl_ms),
            closed_order_max: self.closed_order_max,
            short_poll_interval: Duration::from_millis(self.short_poll_interval_ms),
            long_poll_interval: Duration::from_millis(self.long_poll_interval_ms),
            stream_silence_threshold: Duration::from_millis(self.stream_silence_threshold_ms),
            event_capacity: self.event_capacity,
        }
    }
}

impl Default for OrderConfig {
    fn default() -> Self {
        Self {
            not_found_threshold: default_not_found_threshold(),
            closed_order_ttl_ms: default_closed_order_ttl_ms(),
            closed_order_max: default_closed_order_max(),
            short_poll_interval_ms: default_short_poll_interval_ms(),
            long_poll_interval_ms: default_long_poll_interval_ms(),
            stream_silence_threshold_ms: default_stream_silence_threshold_ms(),
            event_capacity: default_event_capacity(),
            journal_path: None,
        }
    }
}
