//! Rate limit rules and limiter knobs.

use std::time::Duration;

use serde::Deserialize;

use crate::application::throttle::{RateLimitRule, ThrottleSettings};

/// `[rate_limits]` section.
///
/// ```toml
/// [rate_limits]
/// max_wait_ms = 30000
///
/// [[rate_limits.rules]]
/// id = "all"
/// capacity = 1200
/// window_ms = 60000
///
/// [[rate_limits.rules]]
/// id = "depth"
/// capacity = 10
/// window_ms = 1000
/// linked = [{ parent = "all", weight = 5 }]
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default)]
    pub rules: Vec<RateLimitRule>,
    /// Percentage of each rule's capacity this process may use.
    #[serde(default = "default_share_percentage")]
    pub share_percentage: f64,
    /// Fraction by which each window is widened.
    #[serde(default = "default_safety_margin")]
    pub safety_margin: f64,
    /// Longest single sleep before re-checking (milliseconds).
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,
    /// Wait budget per acquire (milliseconds). 0 waits forever.
    #[serde(default = "default_max_wait_ms")]
    pub max_wait_ms: u64,
}

fn default_share_percentage() -> f64 {
    100.0
}

fn default_safety_margin() -> f64 {
    0.05
}

fn default_retry_interval_ms() -> u64 {
    100
}

fn default_max_wait_ms() -> u64 {
    30_000
}

impl RateLimitConfig {
    #[must_use]
    pub fn settings(&self) -> ThrottleSettings {
        ThrottleSettings {
            share_percentage: self.share_percentage,
            safety_margin: self.safety_margin,
            retry_interval: Duration::from_millis(self.retry_interval_ms),
            max_wait: (self.max_wait_ms > 0).then(|| Duration::from_millis(self.max_wait_ms)),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            rules: Vec::new(),
            share_percentage: default_share_percentage(),
            safety_margin: default_safety_margin(),
            retry_interval_ms: default_retry_interval_ms(),
            max_wait_ms: default_max_wait_ms(),
        }
    }
}
