//! Configuration loading and validation.
//!
//! [`Config`] aggregates every section. It is loaded from TOML; credentials
//! come only from the environment (`VENUELINK_API_KEY`,
//! `VENUELINK_API_SECRET`), optionally via a `.env` file.
//!
//! # Example
//!
//! ```no_run
//! use venuelink::infrastructure::config::settings::Config;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load("venuelink.toml")?;
//!     config.init_logging();
//!     Ok(())
//! }
//! ```

use std::path::Path;

use serde::Deserialize;

use super::book::OrderBookConfig;
use super::logging::LoggingConfig;
use super::order::OrderConfig;
use super::stream::StreamConfig;
use super::throttle::RateLimitConfig;
use super::venue::VenueConfig;
use crate::application::connector::ConnectorSettings;
use crate::application::throttle::RateLimiter;
use crate::domain::id::RuleId;
use crate::port::outbound::StreamChannel;
use crate::error::{ConfigError, Result};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Endpoints and trading pairs.
    #[serde(default)]
    pub venue: VenueConfig,

    /// Rate limit rule graph and wait budget.
    #[serde(default)]
    pub rate_limits: RateLimitConfig,

    #[serde(default)]
    pub order_book: OrderBookConfig,

    /// Reconnection, session and heartbeat behaviour of both streams.
    #[serde(default)]
    pub stream: StreamConfig,

    /// Order reconciliation and backup polling.
    #[serde(default)]
    pub orders: OrderConfig,
}

impl Config {
    /// Parse configuration from TOML content and read credentials from the
    /// environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is malformed or validation fails.
    pub fn parse_toml(content: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(content).map_err(ConfigError::Parse)?;

        // Never from the config file.
        config.venue.load_credentials();

        config.validate()?;
        Ok(config)
    }

    /// Load `.env` if present, then the TOML file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is malformed, or fails
    /// validation.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let _ = dotenvy::dotenv();
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadFile)?;
        Self::parse_toml(&content)
    }

    pub fn init_logging(&self) {
        self.logging.init();
    }

    /// Engine settings for one connector.
    #[must_use]
    pub fn connector_settings(&self) -> ConnectorSettings {
        ConnectorSettings {
            pairs: self.venue.trading_pairs(),
            rules: self.rate_limits.rules.clone(),
            throttle: self.rate_limits.settings(),
            book: self.order_book.settings(),
            public_stream: self.stream.settings(StreamChannel::Public),
            private_stream: self
                .venue
                .private_stream
                .then(|| self.stream.settings(StreamChannel::Private)),
            tracker: self.orders.settings(),
        }
    }

    fn validate(&self) -> Result<()> {
        if !self.logging.is_known_format() {
            return Err(invalid("logging.format", "must be \"pretty\" or \"json\""));
        }

        if self.venue.rest_url.is_empty() {
            return Err(ConfigError::MissingField { field: "venue.rest_url" }.into());
        }
        if self.venue.ws_public_url.is_empty() {
            return Err(ConfigError::MissingField {
                field: "venue.ws_public_url",
            }
            .into());
        }
        for (field, value) in [
            ("venue.rest_url", self.venue.rest_url.as_str()),
            ("venue.ws_public_url", self.venue.ws_public_url.as_str()),
            ("venue.ws_private_url", self.venue.private_url()),
        ] {
            url::Url::parse(value).map_err(|err| invalid(field, err.to_string()))?;
        }
        if self.venue.pairs.is_empty() {
            return Err(ConfigError::MissingField { field: "venue.pairs" }.into());
        }
        if self.venue.request_timeout_ms == 0 {
            return Err(invalid("venue.request_timeout_ms", "must be greater than 0"));
        }

        let limits = &self.rate_limits;
        if !(limits.share_percentage > 0.0 && limits.share_percentage <= 100.0) {
            return Err(invalid(
                "rate_limits.share_percentage",
                "must be in (0, 100]",
            ));
        }
        if limits.safety_margin < 0.0 {
            return Err(invalid("rate_limits.safety_margin", "must be 0 or greater"));
        }
        if limits.retry_interval_ms == 0 {
            return Err(invalid("rate_limits.retry_interval_ms", "must be greater than 0"));
        }
        if let Some(rule) = limits.rules.iter().find(|rule| rule.capacity == 0) {
            return Err(invalid(
                "rate_limits.rules",
                format!("rule {} has zero capacity", rule.id),
            ));
        }
        if let Some(rule) = limits.rules.iter().find(|rule| rule.window.is_zero()) {
            return Err(invalid(
                "rate_limits.rules",
                format!("rule {} has a zero window", rule.id),
            ));
        }
        // Graph checks (unknown parents, cycles) live with the limiter.
        RateLimiter::new(limits.rules.clone(), limits.settings())
            .map_err(|err| invalid("rate_limits.rules", err.to_string()))?;

        let stream = &self.stream;
        if stream.initial_delay_ms == 0 {
            return Err(invalid("stream.initial_delay_ms", "must be greater than 0"));
        }
        if stream.max_delay_ms < stream.initial_delay_ms {
            return Err(invalid("stream.max_delay_ms", "must be >= initial_delay_ms"));
        }
        if stream.backoff_multiplier < 1.0 {
            return Err(invalid("stream.backoff_multiplier", "must be >= 1.0"));
        }
        if !(0.0..=1.0).contains(&stream.jitter) {
            return Err(invalid("stream.jitter", "must be between 0 and 1"));
        }
        if stream.max_consecutive_failures == 0 {
            return Err(invalid(
                "stream.max_consecutive_failures",
                "must be greater than 0",
            ));
        }
        if stream.circuit_breaker_cooldown_ms == 0 {
            return Err(invalid(
                "stream.circuit_breaker_cooldown_ms",
                "must be greater than 0",
            ));
        }
        if stream.max_acquire_attempts == 0 {
            return Err(invalid("stream.max_acquire_attempts", "must be greater than 0"));
        }
        if !(stream.renew_fraction > 0.0 && stream.renew_fraction < 1.0) {
            return Err(invalid("stream.renew_fraction", "must be in (0, 1)"));
        }
        if stream.idle_timeout_ms == 0 || stream.pong_timeout_ms == 0 {
            return Err(invalid(
                "stream.heartbeat",
                "idle_timeout_ms and pong_timeout_ms must be greater than 0",
            ));
        }
        if let Some(id) = &stream.send_limit_id {
            let id = RuleId::from(id.as_str());
            if !limits.rules.iter().any(|rule| rule.id == id) {
                return Err(invalid(
                    "stream.send_limit_id",
                    format!("unknown rate limit rule {id}"),
                ));
            }
        }
        if stream.event_capacity == 0 {
            return Err(invalid("stream.event_capacity", "must be greater than 0"));
        }

        let book = &self.order_book;
        if book.channel_capacity == 0 {
            return Err(invalid("order_book.channel_capacity", "must be greater than 0"));
        }
        if book.snapshot_retry_delay_ms == 0 {
            return Err(invalid(
                "order_book.snapshot_retry_delay_ms",
                "must be greater than 0",
            ));
        }

        let orders = &self.orders;
        if orders.not_found_threshold == 0 {
            return Err(invalid("orders.not_found_threshold", "must be greater than 0"));
        }
        if orders.short_poll_interval_ms == 0 {
            return Err(invalid(
                "orders.short_poll_interval_ms",
                "must be greater than 0",
            ));
        }
        if orders.long_poll_interval_ms < orders.short_poll_interval_ms {
            return Err(invalid(
                "orders.long_poll_interval_ms",
                "must be >= short_poll_interval_ms",
            ));
        }
        if orders.event_capacity == 0 {
            return Err(invalid("orders.event_capacity", "must be greater than 0"));
        }

        Ok(())
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> crate::error::Error {
    ConfigError::InvalidValue {
        field,
        reason: reason.into(),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::book::GapPolicy;
    use std::time::Duration;

    const MINIMAL: &str = r#"
[venue]
rest_url = "https://api.example.com"
ws_public_url = "wss://stream.example.com/ws"
pairs = ["BTC-USDT"]
"#;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = Config::parse_toml(MINIMAL).unwrap();
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.rate_limits.max_wait_ms, 30_000);
        assert_eq!(config.order_book.gap_policy, GapPolicy::Resnapshot);
        assert_eq!(config.orders.not_found_threshold, 3);

        let settings = config.connector_settings();
        assert!(settings.private_stream.is_none());
        assert_eq!(settings.tracker.closed_order_ttl, Duration::from_secs(30));
        assert_eq!(settings.throttle.max_wait, Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_missing_rest_url_rejected() {
        let err = Config::parse_toml("[venue]\nws_public_url = \"wss://x\"\npairs = [\"A-B\"]\n")
            .unwrap_err();
        assert!(matches!(
            err,
            crate::error::Error::Config(ConfigError::MissingField { field: "venue.rest_url" })
        ));
    }

    #[test]
    fn test_zero_max_wait_means_unbounded() {
        let toml = format!("{MINIMAL}\n[rate_limits]\nmax_wait_ms = 0\n");
        let config = Config::parse_toml(&toml).unwrap();
        assert_eq!(config.rate_limits.settings().max_wait, None);
    }

    #[test]
    fn test_renew_fraction_bounds() {
        let toml = format!("{MINIMAL}\n[stream]\nrenew_fraction = 1.0\n");
        assert!(Config::parse_toml(&toml).is_err());
    }
}
