//! Stream reconnection, session and heartbeat configuration.

use std::time::Duration;

use serde::Deserialize;

use crate::application::stream::{BackoffPolicy, StreamSettings};
use crate::domain::id::RuleId;
use crate::port::outbound::StreamChannel;

/// `[stream]` section, shared by the public and private channels.
#[derive(Debug, Clone, Deserialize)]
pub struct StreamConfig {
    /// Initial delay before the first reconnection attempt (milliseconds).
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    /// Maximum delay between reconnection attempts (milliseconds).
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Multiplier applied to the delay after each failure.
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    /// Random jitter as a fraction of the delay (0-1).
    #[serde(default = "default_jitter")]
    pub jitter: f64,
    /// Consecutive failures before the circuit breaker opens.
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,
    /// Cooldown after the circuit breaker opens (milliseconds).
    #[serde(default = "default_circuit_breaker_cooldown_ms")]
    pub circuit_breaker_cooldown_ms: u64,
    /// Failed session acquisitions before the owner is notified.
    #[serde(default = "default_max_acquire_attempts")]
    pub max_acquire_attempts: u32,
    /// Fraction of the session lifetime after which it is renewed.
    #[serde(default = "default_renew_fraction")]
    pub renew_fraction: f64,
    /// Silence before a liveness ping (milliseconds).
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
    /// Wait for data after a ping (milliseconds).
    #[serde(default = "default_pong_timeout_ms")]
    pub pong_timeout_ms: u64,
    /// Rate limit rule consulted before each outbound frame.
    #[serde(default)]
    pub send_limit_id: Option<String>,
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
    /// How long a message key is remembered for deduplication (milliseconds).
    #[serde(default = "default_dedup_ttl_ms")]
    pub dedup_ttl_ms: u64,
    #[serde(default = "default_dedup_max_entries")]
    pub dedup_max_entries: usize,
}

fn default_initial_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    60_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_jitter() -> f64 {
    0.2
}

fn default_max_consecutive_failures() -> u32 {
    10
}

fn default_circuit_breaker_cooldown_ms() -> u64 {
    300_000 // 5 minutes
}

fn default_max_acquire_attempts() -> u32 {
    5
}

fn default_renew_fraction() -> f64 {
    0.5
}

fn default_idle_timeout_ms() -> u64 {
    30_000
}

fn default_pong_timeout_ms() -> u64 {
    10_000
}

fn default_event_capacity() -> usize {
    4096
}

fn default_dedup_ttl_ms() -> u64 {
    60_000
}

fn default_dedup_max_entries() -> usize {
    100_000
}

impl StreamConfig {
    #[must_use]
    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy {
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            multiplier: self.backoff_multiplier,
            jitter: self.jitter,
            max_consecutive_failures: self.max_consecutive_failures,
            breaker_cooldown: Duration::from_millis(self.circuit_breaker_cooldown_ms),
        }
    }

    #[must_use]
    pub fn settings(&self, channel: StreamChannel) -> StreamSettings {
        StreamSettings {
            channel,
            backoff: self.backoff(),
            max_acquire_attempts: self.max_acquire_attempts,
            renew_fraction: self.renew_fraction,
            idle_timeout: Duration::from_millis(self.idle_timeout_ms),
            pong_timeout: Duration::from_millis(self.pong_timeout_ms),
            send_limit_id: self.send_limit_id.as_deref().map(RuleId::from),
            event_capacity: self.event_capacity,
            dedup_ttl: Duration::from_millis(self.dedup_ttl_ms),
            dedup_max_entries: self.dedup_max_entries,
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: default_jitter(),
            max_consecutive_failures: default_max_consecutive_failures(),
            circuit_breaker_cooldown_ms: default_circuit_breaker_cooldown_ms(),
            max_acquire_attempts: default_max_acquire_attempts(),
            renew_fraction: default_renew_fraction(),
            idle_timeout_ms: default_idle_timeout_ms(),
            pong_timeout_ms: default_pong_timeout_ms(),
            send_limit_id: None,
            event_capacity: default_event_capacity(),
            dedup_ttl_ms: default_dedup_ttl_ms(),
            dedup_max_entries: default_dedup_max_entries(),
        }
    }
}
