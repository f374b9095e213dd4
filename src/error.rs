use std::time::Duration;

use thiserror::Error;

use crate::domain::error::DomainError;
use crate::domain::id::{ClientOrderId, RuleId, TradingPair};

/// Configuration-related errors with structured variants.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required field: {field}")]
    MissingField { field: &'static str },

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("failed to read config file: {0}")]
    ReadFile(#[source] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[source] toml::de::Error),
}

/// Rate limiter admission failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RateLimitError {
    /// The caller waited longer than its configured budget.
    #[error("rate limit wait budget exceeded for {rule} after {waited:?}")]
    Timeout { rule: RuleId, waited: Duration },

    #[error("unknown rate limit rule: {0}")]
    UnknownRule(RuleId),

    /// The request can never be admitted because one rule in its closure is
    /// smaller than the requested weight.
    #[error("weight {weight} exceeds effective capacity {capacity} of rule {rule}")]
    WeightExceedsCapacity {
        rule: RuleId,
        weight: u32,
        capacity: u32,
    },

    #[error("rule {rule} links to unknown parent {parent}")]
    UnknownParent { rule: RuleId, parent: RuleId },

    #[error("rate limit rules contain a cycle through {0}")]
    Cycle(RuleId),
}

/// Socket and HTTP failures surfaced by the transport collaborators.
#[derive(Error, Debug, Clone)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request failed: {0}")]
    Request(String),

    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("stream closed")]
    Closed,

    #[error("send failed: {0}")]
    Send(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

impl TransportError {
    /// True for statuses the venue uses to report throttling.
    #[must_use]
    pub const fn is_throttled(&self) -> bool {
        matches!(self, Self::Status { status: 418 | 429, .. })
    }
}

/// Failures raised by venue adapters while parsing or building payloads.
#[derive(Error, Debug, Clone)]
pub enum AdapterError {
    #[error("malformed message: {0}")]
    Malformed(String),

    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),
}

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    RateLimit(#[from] RateLimitError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Adapter(#[from] AdapterError),

    #[error("sequence gap on {pair}: expected {expected}, got {received}")]
    SequenceGap {
        pair: TradingPair,
        expected: u64,
        received: u64,
    },

    #[error("session expired")]
    SessionExpired,

    #[error("session unavailable after {attempts} attempts: {reason}")]
    SessionUnavailable { attempts: u32, reason: String },

    #[error("order {client_order_id} not found after {misses} consecutive polls")]
    OrderNotFoundPersistent {
        client_order_id: ClientOrderId,
        misses: u32,
    },

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("shutting down")]
    Shutdown,
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return Error::Transport(TransportError::Request(format!("timeout: {err}")));
        }
        Error::Transport(TransportError::Request(err.to_string()))
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match err {
            WsError::ConnectionClosed | WsError::AlreadyClosed => {
                Error::Transport(TransportError::Closed)
            }
            other => Error::Transport(TransportError::Connect(other.to_string())),
        }
    }
}

impl Error {
    /// True when the failure is a transport-level fault that backoff handles.
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}
