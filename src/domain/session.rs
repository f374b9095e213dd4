//! Short-lived credentials for authenticated streaming sessions.

use std::fmt;
use std::time::Duration;

use tokio::time::Instant;

/// A listen-key or auth token identifying one private streaming session.
///
/// Owned exclusively by the stream lifecycle manager. `Debug` never prints the
/// full value.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionToken {
    value: String,
    issued_at: Instant,
    expires_after: Duration,
}

impl SessionToken {
    pub fn new(value: impl Into<String>, expires_after: Duration) -> Self {
        Self {
            value: value.into(),
            issued_at: Instant::now(),
            expires_after,
        }
    }

    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Issuance instant, or the instant of the last successful renewal.
    #[must_use]
    pub const fn issued_at(&self) -> Instant {
        self.issued_at
    }

    #[must_use]
    pub const fn expires_after(&self) -> Duration {
        self.expires_after
    }

    #[must_use]
    pub fn expires_at(&self) -> Instant {
        self.issued_at + self.expires_after
    }

    #[must_use]
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at()
    }

    /// Instant at which renewal is due, given the fraction of the lifetime
    /// that may elapse first.
    #[must_use]
    pub fn renew_at(&self, fraction: f64) -> Instant {
        let fraction = fraction.clamp(0.0, 1.0);
        self.issued_at + self.expires_after.mul_f64(fraction)
    }

    /// The token after a successful renewal: same or new value, fresh clock.
    #[must_use]
    pub fn renewed(&self, value: Option<String>) -> Self {
        Self {
            value: value.unwrap_or_else(|| self.value.clone()),
            issued_at: Instant::now(),
            expires_after: self.expires_after,
        }
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let preview: String = self.value.chars().take(6).collect();
        f.debug_struct("SessionToken")
            .field("value", &format_args!("{preview}..."))
            .field("expires_after", &self.expires_after)
            .finish()
    }
}
