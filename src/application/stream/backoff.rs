//! Exponential backoff with jitter and a circuit breaker.

use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;
use tracing::{error, info};

/// Reconnection policy knobs.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Upper bound of random jitter, as a fraction of the delay.
    pub jitter: f64,
    /// Consecutive failures before the breaker opens.
    pub max_consecutive_failures: u32,
    pub breaker_cooldown: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            jitter: 0.2,
            max_consecutive_failures: 10,
            breaker_cooldown: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CircuitState {
    Closed,
    Open { until: Instant },
}

/// Delay state for one reconnecting loop.
#[derive(Debug)]
pub struct Backoff {
    policy: BackoffPolicy,
    current: Duration,
    failures: u32,
    circuit: CircuitState,
}

impl Backoff {
    #[must_use]
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            current: policy.initial_delay,
            policy,
            failures: 0,
            circuit: CircuitState::Closed,
        }
    }

    #[must_use]
    pub const fn failures(&self) -> u32 {
        self.failures
    }

    #[must_use]
    pub const fn is_open(&self) -> bool {
        matches!(self.circuit, CircuitState::Open { .. })
    }

    /// Back to the initial delay after a success.
    pub fn reset(&mut self) {
        self.failures = 0;
        self.current = self.policy.initial_delay;
        self.circuit = CircuitState::Closed;
    }

    /// Count a failure; opens the breaker at the threshold.
    pub fn record_failure(&mut self) {
        self.failures += 1;
        if self.failures >= self.policy.max_consecutive_failures && !self.is_open() {
            let until = Instant::now() + self.policy.breaker_cooldown;
            self.circuit = CircuitState::Open { until };
            error!(
                failures = self.failures,
                cooldown_secs = self.policy.breaker_cooldown.as_secs(),
                "circuit breaker tripped, pausing reconnection attempts"
            );
        }
    }

    /// Delay before the next attempt, advancing the schedule.
    ///
    /// While the breaker is open this is the remaining cooldown; once the
    /// cooldown has passed the schedule starts over.
    pub fn next_delay(&mut self) -> Duration {
        if let CircuitState::Open { until } = self.circuit {
            let now = Instant::now();
            if now < until {
                return until - now;
            }
            info!("circuit breaker cooldown expired, allowing reconnection");
            self.reset();
        }

        let base = self.current;
        self.current = base.mul_f64(self.policy.multiplier.max(1.0)).min(self.policy.max_delay);
        base + self.jitter(base)
    }

    fn jitter(&self, base: Duration) -> Duration {
        let range = base.mul_f64(self.policy.jitter.clamp(0.0, 1.0));
        if range.is_zero() {
            return Duration::ZERO;
        }
        let millis = u64::try_from(range.as_millis()).unwrap_or(u64::MAX);
        Duration::from_millis(rand::thread_rng().gen_range(0..=millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> BackoffPolicy {
        BackoffPolicy {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
            multiplier: 2.0,
            jitter: 0.0,
            max_consecutive_failures: 3,
            breaker_cooldown: Duration::from_secs(5),
        }
    }

    #[test]
    fn test_delay_grows_and_caps() {
        let mut backoff = Backoff::new(policy());
        let delays: Vec<_> = (0..4).map(|_| backoff.next_delay()).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(350),
                Duration::from_millis(350),
            ]
        );
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
    }

    #[test]
    fn test_jitter_stays_within_bound() {
        let mut backoff = Backoff::new(BackoffPolicy {
            jitter: 0.2,
            ..policy()
        });
        let delay = backoff.next_delay();
        assert!(delay >= Duration::from_millis(100));
        assert!(delay <= Duration::from_millis(120));
    }

    #[tokio::test(start_paused = true)]
    async fn test_breaker_opens_then_cools_down() {
        let mut backoff = Backoff::new(policy());
        for _ in 0..3 {
            backoff.record_failure();
        }
        assert!(backoff.is_open());
        assert_eq!(backoff.next_delay(), Duration::from_secs(5));

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
        assert!(!backoff.is_open());
        assert_eq!(backoff.failures(), 0);
    }
}
