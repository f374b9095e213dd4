//! Canonical test configurations.
//!
//! Single source of truth for settings used across tests: fast, jitter-free
//! backoff and rate limit rules generous enough never to block unless a test
//! asks for it.

use std::sync::Arc;
use std::time::Duration;

use super::adapter::{DEPTH_RULE, ORDER_RULE, SESSION_RULE, SYMBOL_RULE};
use crate::application::book::BookSyncSettings;
use crate::application::connector::ConnectorSettings;
use crate::application::order::TrackerSettings;
use crate::application::stream::{BackoffPolicy, StreamSettings};
use crate::application::throttle::{RateLimitRule, RateLimiter, RestGateway, ThrottleSettings};
use crate::domain::id::TradingPair;
use crate::port::outbound::{RestTransport, StreamChannel};

/// One roomy rule per route of the JSON test venue.
pub fn rules() -> Vec<RateLimitRule> {
    [DEPTH_RULE, SESSION_RULE, ORDER_RULE, SYMBOL_RULE]
        .into_iter()
        .map(|id| RateLimitRule::new(id, 10_000, Duration::from_secs(1)))
        .collect()
}

/// Exact windows, short sleeps, bounded waits.
pub fn throttle() -> ThrottleSettings {
    ThrottleSettings {
        share_percentage: 100.0,
        safety_margin: 0.0,
        retry_interval: Duration::from_millis(10),
        max_wait: Some(Duration::from_secs(5)),
    }
}

/// Deterministic backoff: 100ms doubling to 1s, no jitter.
pub fn backoff() -> BackoffPolicy {
    BackoffPolicy {
        initial_delay: Duration::from_millis(100),
        max_delay: Duration::from_secs(1),
        multiplier: 2.0,
        jitter: 0.0,
        max_consecutive_failures: 100,
        breaker_cooldown: Duration::from_secs(1),
    }
}

pub fn stream(channel: StreamChannel) -> StreamSettings {
    StreamSettings {
        backoff: backoff(),
        max_acquire_attempts: 3,
        ..StreamSettings::new(channel)
    }
}

pub fn book() -> BookSyncSettings {
    BookSyncSettings {
        snapshot_retry_delay: Duration::from_secs(1),
        ..BookSyncSettings::default()
    }
}

pub fn tracker() -> TrackerSettings {
    TrackerSettings::default()
}

/// A gateway over [`rules`] and [`throttle`] with no signing.
pub fn gateway(rest: Arc<dyn RestTransport>) -> RestGateway {
    gateway_with(rest, rules())
}

pub fn gateway_with(rest: Arc<dyn RestTransport>, rules: Vec<RateLimitRule>) -> RestGateway {
    let limiter = RateLimiter::new(rules, throttle())
        .map(RateLimiter::into_shared)
        .unwrap_or_else(|err| panic!("test rules must be valid: {err}"));
    RestGateway::new(limiter, rest, None)
}

pub fn connector_settings(pairs: &[&str], private: bool) -> ConnectorSettings {
    ConnectorSettings {
        pairs: pairs.iter().map(|pair| TradingPair::from(*pair)).collect(),
        rules: rules(),
        throttle: throttle(),
        book: book(),
        public_stream: stream(StreamChannel::Public),
        private_stream: private.then(|| stream(StreamChannel::Private)),
        tracker: tracker(),
    }
}

/// A complete, valid TOML configuration.
pub const CONFIG_TOML: &str = r#"
[logging]
level = "debug"
format = "json"

[venue]
name = "json-venue"
rest_url = "https://api.venue.test"
ws_public_url = "wss://stream.venue.test/public"
ws_private_url = "wss://stream.venue.test/private"
pairs = ["BTC-USDT", "ETH-USDT"]
private_stream = true

[rate_limits]
share_percentage = 50.0
safety_margin = 0.1
max_wait_ms = 10000

[[rate_limits.rules]]
id = "all"
capacity = 1200
window_ms = 60000

[[rate_limits.rules]]
id = "depth"
capacity = 10
window_ms = 1000
linked = [{ parent = "all", weight = 5 }]

[[rate_limits.rules]]
id = "orders"
capacity = 50
window_ms = 10000
linked = [{ parent = "all" }]

[order_book]
gap_policy = { policy = "reorder", max_pending = 32 }
replay_window = 500

[stream]
initial_delay_ms = 500
jitter = 0.1
renew_fraction = 0.5
send_limit_id = "all"

[orders]
not_found_threshold = 5
short_poll_interval_ms = 2000
journal_path = "orders.json"
"#;
