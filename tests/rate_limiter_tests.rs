//! Integration tests for the linked sliding-window rate limiter.

mod support;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::time::Instant;

use venuelink::application::throttle::{RateLimitRule, RateLimiter, ThrottleSettings};
use venuelink::domain::RuleId;
use venuelink::error::RateLimitError;

const SECOND: Duration = Duration::from_secs(1);

fn exact(max_wait: Option<Duration>) -> ThrottleSettings {
    ThrottleSettings {
        share_percentage: 100.0,
        safety_margin: 0.0,
        retry_interval: Duration::from_millis(10),
        max_wait,
    }
}

fn endpoint_and_pool() -> Arc<RateLimiter> {
    RateLimiter::new(
        vec![
            RateLimitRule::new("P", 3, SECOND),
            RateLimitRule::new("A", 2, SECOND).linked_to("P", 1),
        ],
        exact(None),
    )
    .unwrap()
    .into_shared()
}

#[tokio::test(start_paused = true)]
async fn third_rapid_acquire_blocks_until_endpoint_window_rolls() {
    let limiter = endpoint_and_pool();
    let a = RuleId::from("A");
    let start = Instant::now();

    limiter.acquire(&a, 1).await.unwrap();
    limiter.acquire(&a, 1).await.unwrap();
    assert_eq!(limiter.used(&RuleId::from("P")), 2);

    let third = limiter.acquire(&a, 1).await.unwrap();
    assert!(start.elapsed() >= SECOND, "admitted after {:?}", start.elapsed());
    assert!(third.waited() >= SECOND);
}

#[tokio::test(start_paused = true)]
async fn exhausted_parent_blocks_child_without_charging_it() {
    let limiter = endpoint_and_pool();
    let a = RuleId::from("A");
    let p = RuleId::from("P");
    let start = Instant::now();

    limiter.acquire(&p, 1).await.unwrap();
    limiter.acquire(&p, 1).await.unwrap();
    limiter.acquire(&a, 1).await.unwrap();
    assert_eq!(limiter.used(&p), 3);

    // A itself has room, P does not.
    assert!(limiter.try_acquire(&a, 1).unwrap().is_none());
    assert_eq!(limiter.used(&a), 1);

    let blocked = limiter.acquire(&a, 1).await.unwrap();
    assert!(start.elapsed() >= SECOND);
    assert!(blocked.waited() >= SECOND);
}

#[tokio::test(start_paused = true)]
async fn wait_budget_exhaustion_is_a_timeout() {
    let limiter = RateLimiter::new(
        vec![RateLimitRule::new("A", 1, Duration::from_secs(10))],
        exact(Some(Duration::from_millis(500))),
    )
    .unwrap();
    let a = RuleId::from("A");

    limiter.acquire(&a, 1).await.unwrap();
    let err = limiter.acquire(&a, 1).await.unwrap_err();
    assert!(matches!(err, RateLimitError::Timeout { .. }), "{err:?}");
    assert_eq!(limiter.used(&a), 1);
}

#[tokio::test(start_paused = true)]
async fn cancelled_acquire_consumes_nothing() {
    let limiter = endpoint_and_pool();
    let a = RuleId::from("A");
    limiter.acquire(&a, 2).await.unwrap();

    let waiting = tokio::time::timeout(Duration::from_millis(200), limiter.acquire(&a, 1)).await;
    assert!(waiting.is_err());
    assert_eq!(limiter.used(&a), 2);
    assert_eq!(limiter.used(&RuleId::from("P")), 1);
}

#[tokio::test(start_paused = true)]
async fn polled_then_dropped_acquire_leaves_no_trace() {
    let limiter = endpoint_and_pool();
    let a = RuleId::from("A");
    limiter.acquire(&a, 2).await.unwrap();

    let mut blocked = tokio_test::task::spawn(limiter.acquire(&a, 1));
    tokio_test::assert_pending!(blocked.poll());
    tokio_test::assert_pending!(blocked.poll());
    drop(blocked);

    assert_eq!(limiter.used(&a), 2);
    assert!(limiter.try_acquire(&RuleId::from("P"), 2).unwrap().is_some());
}

/// Admissions per rule inside any window never exceed its capacity, across
/// concurrent callers and linked parents.
#[tokio::test(start_paused = true)]
async fn no_window_ever_exceeds_capacity() {
    let rules = vec![
        RateLimitRule::new("pool", 6, SECOND),
        RateLimitRule::new("a", 3, SECOND).linked_to("pool", 1),
        RateLimitRule::new("b", 4, Duration::from_millis(500)).linked_to("pool", 2),
        RateLimitRule::new("c", 2, Duration::from_millis(300))
            .linked_to("a", 1)
            .linked_to("pool", 1),
    ];
    let capacities: HashMap<RuleId, (u32, Duration)> = rules
        .iter()
        .map(|rule| (rule.id.clone(), (rule.capacity, rule.window)))
        .collect();
    let limiter = RateLimiter::new(rules, exact(None)).unwrap().into_shared();

    // (rule, weight, admitted_at) for every debit, parents included.
    let ledger: Arc<Mutex<Vec<(RuleId, u32, Instant)>>> = Arc::default();
    let mut tasks = Vec::new();
    for seed in 0..12u64 {
        let limiter = Arc::clone(&limiter);
        let ledger = Arc::clone(&ledger);
        tasks.push(tokio::spawn(async move {
            let mut rng = StdRng::seed_from_u64(seed);
            for _ in 0..8 {
                let (root, weight) = match rng.gen_range(0..3) {
                    0 => ("a", rng.gen_range(1..=2)),
                    1 => ("b", rng.gen_range(1..=3)),
                    _ => ("c", 1),
                };
                let permit = limiter.acquire(&RuleId::from(root), weight).await.unwrap();
                let at = permit.admitted_at();
                {
                    let mut ledger = ledger.lock();
                    ledger.push((RuleId::from(root), weight, at));
                    match root {
                        "a" => ledger.push((RuleId::from("pool"), 1, at)),
                        "b" => ledger.push((RuleId::from("pool"), 2, at)),
                        _ => {
                            ledger.push((RuleId::from("a"), 1, at));
                            ledger.push((RuleId::from("pool"), 1, at));
                        }
                    }
                    drop(ledger);
                }
                tokio::time::sleep(Duration::from_millis(rng.gen_range(0..250))).await;
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let ledger = ledger.lock();
    assert!(ledger.iter().any(|(rule, _, _)| rule.as_str() == "c"));
    for (rule, (capacity, window)) in &capacities {
        let debits: Vec<_> = ledger.iter().filter(|(id, _, _)| id == rule).collect();
        for (_, _, at) in &debits {
            let in_window: u32 = debits
                .iter()
                .filter(|(_, _, other)| *other <= *at && at.duration_since(*other) < *window)
                .map(|(_, weight, _)| *weight)
                .sum();
            assert!(
                in_window <= *capacity,
                "rule {rule} admitted {in_window} > {capacity} within {window:?}"
            );
        }
    }
}
