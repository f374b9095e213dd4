//! Weighted, linked, sliding-window rate limiter.
//!
//! A call on rule `r` must fit in every rule of `r`'s linked closure. The
//! check and the debit happen under one lock, so either the whole closure is
//! charged or nothing is. A caller that cannot be admitted sleeps until the
//! earliest instant any blocking rule frees enough weight, then checks the
//! whole closure again.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::rule::{self, RateLimitRule};
use super::window::SlidingWindow;
use crate::domain::id::RuleId;
use crate::error::RateLimitError;

/// Knobs shared by every rule of one limiter.
#[derive(Debug, Clone, PartialEq)]
pub struct ThrottleSettings {
    /// Percentage of each rule's capacity this instance may use (1-100).
    pub share_percentage: f64,
    /// Fraction by which every window is widened.
    pub safety_margin: f64,
    /// Longest single sleep before re-checking.
    pub retry_interval: Duration,
    /// Longest total wait before [`RateLimitError::Timeout`]. `None` waits
    /// forever.
    pub max_wait: Option<Duration>,
}

impl Default for ThrottleSettings {
    fn default() -> Self {
        Self {
            share_percentage: 100.0,
            safety_margin: 0.05,
            retry_interval: Duration::from_millis(100),
            max_wait: Some(Duration::from_secs(30)),
        }
    }
}

/// Proof of admission. Capacity frees itself as the entry ages out of the
/// window, so there is nothing to release.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub struct Permit {
    rule: RuleId,
    weight: u32,
    admitted_at: Instant,
    waited: Duration,
}

impl Permit {
    pub fn rule(&self) -> &RuleId {
        &self.rule
    }

    pub const fn weight(&self) -> u32 {
        self.weight
    }

    pub const fn admitted_at(&self) -> Instant {
        self.admitted_at
    }

    /// Time spent blocked before admission.
    pub const fn waited(&self) -> Duration {
        self.waited
    }
}

#[derive(Debug)]
struct Compiled {
    capacity: u32,
    window: Duration,
    /// `(rule, link weight)`; `None` weight means the request weight.
    closure: Vec<(RuleId, Option<u32>)>,
}

struct Blocked {
    rule: RuleId,
    wait: Duration,
}

pub struct RateLimiter {
    rules: HashMap<RuleId, Compiled>,
    windows: Mutex<HashMap<RuleId, SlidingWindow>>,
    settings: ThrottleSettings,
}

impl RateLimiter {
    /// Build a limiter from a rule set.
    ///
    /// # Errors
    ///
    /// Returns [`RateLimitError::UnknownParent`] or [`RateLimitError::Cycle`]
    /// when the linked-limit graph is not a DAG over known rules.
    pub fn new(
        rules: Vec<RateLimitRule>,
        settings: ThrottleSettings,
    ) -> Result<Self, RateLimitError> {
        let table: HashMap<RuleId, RateLimitRule> =
            rules.into_iter().map(|r| (r.id.clone(), r)).collect();
        rule::validate(&table)?;

        let share = settings.share_percentage.clamp(1.0, 100.0) / 100.0;
        let margin = settings.safety_margin.max(0.0);
        let compiled = table
            .iter()
            .map(|(id, r)| {
                // Truncation is intended: a partial share rounds down.
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                let capacity = ((f64::from(r.capacity) * share).floor() as u32).max(1);
                let compiled = Compiled {
                    capacity,
                    window: r.window.mul_f64(1.0 + margin),
                    closure: rule::closure(id, &table),
                };
                (id.clone(), compiled)
            })
            .collect();

        Ok(Self {
            rules: compiled,
            windows: Mutex::new(HashMap::new()),
            settings,
        })
    }

    pub fn into_shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    #[must_use]
    pub const fn settings(&self) -> &ThrottleSettings {
        &self.settings
    }

    #[must_use]
    pub fn has_rule(&self, id: &RuleId) -> bool {
        self.rules.contains_key(id)
    }

    /// Capacity after applying the share percentage.
    #[must_use]
    pub fn effective_capacity(&self, id: &RuleId) -> Option<u32> {
        self.rules.get(id).map(|r| r.capacity)
    }

    /// Weight currently counted against `id` within its window.
    #[must_use]
    pub fn used(&self, id: &RuleId) -> u32 {
        let Some(compiled) = self.rules.get(id) else {
            return 0;
        };
        let mut windows = self.windows.lock();
        windows.get_mut(id).map_or(0, |w| {
            w.prune(Instant::now(), compiled.window);
            w.used()
        })
    }

    /// Wait until `weight` fits in every rule linked from `id`, then debit it.
    ///
    /// Dropping the returned future before it resolves consumes nothing.
    ///
    /// # Errors
    ///
    /// - [`RateLimitError::UnknownRule`] for an unregistered rule
    /// - [`RateLimitError::WeightExceedsCapacity`] if some rule in the closure
    ///   can never hold the weight
    /// - [`RateLimitError::Timeout`] once the configured wait budget runs out
    pub async fn acquire(&self, id: &RuleId, weight: u32) -> Result<Permit, RateLimitError> {
        let demand = self.demand(id, weight)?;
        let started = Instant::now();
        let deadline = self.settings.max_wait.map(|budget| started + budget);

        loop {
            let blocked = match self.try_commit(&demand) {
                Ok(admitted_at) => {
                    return Ok(Permit {
                        rule: id.clone(),
                        weight,
                        admitted_at,
                        waited: admitted_at.saturating_duration_since(started),
                    });
                }
                Err(blocked) => blocked,
            };

            let now = Instant::now();
            if deadline.is_some_and(|deadline| now >= deadline) {
                let waited = now.saturating_duration_since(started);
                warn!(rule = %id, blocking = %blocked.rule, ?waited, "rate limit wait budget exceeded");
                return Err(RateLimitError::Timeout {
                    rule: id.clone(),
                    waited,
                });
            }

            let mut wake = now + blocked.wait.min(self.settings.retry_interval);
            if let Some(deadline) = deadline {
                wake = wake.min(deadline);
            }
            debug!(
                rule = %id,
                blocking = %blocked.rule,
                wait_ms = blocked.wait.as_millis() as u64,
                "rate limited"
            );
            tokio::time::sleep_until(wake).await;
        }
    }

    /// Admit immediately or return `None` without waiting.
    ///
    /// # Errors
    ///
    /// Same validation errors as [`RateLimiter::acquire`].
    pub fn try_acquire(&self, id: &RuleId, weight: u32) -> Result<Option<Permit>, RateLimitError> {
        let demand = self.demand(id, weight)?;
        Ok(self.try_commit(&demand).ok().map(|admitted_at| Permit {
            rule: id.clone(),
            weight,
            admitted_at,
            waited: Duration::ZERO,
        }))
    }

    /// Resolve the closure into concrete `(rule, weight, capacity, window)`
    /// demands.
    fn demand(
        &self,
        id: &RuleId,
        weight: u32,
    ) -> Result<Vec<(RuleId, u32, u32, Duration)>, RateLimitError> {
        let root = self
            .rules
            .get(id)
            .ok_or_else(|| RateLimitError::UnknownRule(id.clone()))?;

        let mut demand = Vec::with_capacity(root.closure.len());
        for (rule_id, link_weight) in &root.closure {
            let weight = link_weight.unwrap_or(weight);
            let compiled = self
                .rules
                .get(rule_id)
                .ok_or_else(|| RateLimitError::UnknownRule(rule_id.clone()))?;
            if weight > compiled.capacity {
                return Err(RateLimitError::WeightExceedsCapacity {
                    rule: rule_id.clone(),
                    weight,
                    capacity: compiled.capacity,
                });
            }
            demand.push((rule_id.clone(), weight, compiled.capacity, compiled.window));
        }
        Ok(demand)
    }

    /// Debit the whole closure, or report how long until a re-check is due.
    ///
    /// The wait is the minimum across blocking rules: the earliest instant at
    /// which anything changes and a re-check is worth doing.
    fn try_commit(&self, demand: &[(RuleId, u32, u32, Duration)]) -> Result<Instant, Blocked> {
        let now = Instant::now();
        let mut windows = self.windows.lock();

        let mut blocked: Option<Blocked> = None;
        for (id, weight, capacity, window) in demand {
            let log = windows.entry(id.clone()).or_default();
            log.prune(now, *window);
            if let Some(wait) = log.wait_for(now, *window, *capacity, *weight) {
                if blocked.as_ref().map_or(true, |b| wait < b.wait) {
                    blocked = Some(Blocked {
                        rule: id.clone(),
                        wait,
                    });
                }
            }
        }
        if let Some(blocked) = blocked {
            return Err(blocked);
        }

        for (id, weight, _, _) in demand {
            windows.entry(id.clone()).or_default().record(now, *weight);
        }
        Ok(now)
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("rules", &self.rules.len())
            .field("settings", &self.settings)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exact() -> ThrottleSettings {
        ThrottleSettings {
            safety_margin: 0.0,
            max_wait: None,
            ..ThrottleSettings::default()
        }
    }

    fn limiter(rules: Vec<RateLimitRule>, settings: ThrottleSettings) -> RateLimiter {
        RateLimiter::new(rules, settings).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_admits_up_to_capacity_then_blocks() {
        let limiter = limiter(
            vec![RateLimitRule::new("A", 2, Duration::from_secs(1))],
            exact(),
        );
        let id = RuleId::from("A");
        assert!(limiter.try_acquire(&id, 1).unwrap().is_some());
        assert!(limiter.try_acquire(&id, 1).unwrap().is_some());
        assert!(limiter.try_acquire(&id, 1).unwrap().is_none());
        assert_eq!(limiter.used(&id), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_blocked_parent_does_not_charge_child() {
        let limiter = limiter(
            vec![
                RateLimitRule::new("A", 5, Duration::from_secs(1)).linked_to("P", 1),
                RateLimitRule::new("B", 5, Duration::from_secs(1)).linked_to("P", 1),
                RateLimitRule::new("P", 1, Duration::from_secs(1)),
            ],
            exact(),
        );
        let _ = limiter.try_acquire(&RuleId::from("B"), 1).unwrap().unwrap();
        assert!(limiter.try_acquire(&RuleId::from("A"), 1).unwrap().is_none());
        assert_eq!(limiter.used(&RuleId::from("A")), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_waits_for_window_to_roll() {
        let limiter = limiter(
            vec![RateLimitRule::new("A", 1, Duration::from_secs(1))],
            exact(),
        );
        let id = RuleId::from("A");
        let first = limiter.acquire(&id, 1).await.unwrap();
        let second = limiter.acquire(&id, 1).await.unwrap();
        assert_eq!(first.waited(), Duration::ZERO);
        assert_eq!(
            second.admitted_at() - first.admitted_at(),
            Duration::from_secs(1)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_after_wait_budget() {
        let settings = ThrottleSettings {
            max_wait: Some(Duration::from_millis(250)),
            ..exact()
        };
        let limiter = limiter(
            vec![RateLimitRule::new("A", 1, Duration::from_secs(10))],
            settings,
        );
        let id = RuleId::from("A");
        let _ = limiter.acquire(&id, 1).await.unwrap();
        let err = limiter.acquire(&id, 1).await.unwrap_err();
        assert_eq!(
            err,
            RateLimitError::Timeout {
                rule: id.clone(),
                waited: Duration::from_millis(250)
            }
        );
        // The timed-out call consumed nothing.
        assert_eq!(limiter.used(&id), 1);
    }

    #[tokio::test]
    async fn test_unknown_rule_and_oversized_weight() {
        let limiter = limiter(
            vec![RateLimitRule::new("A", 3, Duration::from_secs(1))],
            exact(),
        );
        assert_eq!(
            limiter.try_acquire(&RuleId::from("nope"), 1).unwrap_err(),
            RateLimitError::UnknownRule(RuleId::from("nope"))
        );
        assert!(matches!(
            limiter.acquire(&RuleId::from("A"), 4).await,
            Err(RateLimitError::WeightExceedsCapacity { capacity: 3, .. })
        ));
    }

    #[test]
    fn test_share_percentage_scales_capacity() {
        let settings = ThrottleSettings {
            share_percentage: 50.0,
            ..exact()
        };
        let limiter = limiter(
            vec![
                RateLimitRule::new("A", 10, Duration::from_secs(1)),
                RateLimitRule::new("B", 1, Duration::from_secs(1)),
            ],
            settings,
        );
        assert_eq!(limiter.effective_capacity(&RuleId::from("A")), Some(5));
        // Never rounds a rule down to zero.
        assert_eq!(limiter.effective_capacity(&RuleId::from("B")), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_safety_margin_widens_window() {
        let settings = ThrottleSettings {
            safety_margin: 0.5,
            ..exact()
        };
        let limiter = limiter(
            vec![RateLimitRule::new("A", 1, Duration::from_secs(1))],
            settings,
        );
        let id = RuleId::from("A");
        let first = limiter.acquire(&id, 1).await.unwrap();
        let second = limiter.acquire(&id, 1).await.unwrap();
        assert_eq!(
            second.admitted_at() - first.admitted_at(),
            Duration::from_millis(1500)
        );
    }
}
