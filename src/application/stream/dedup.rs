//! Time-bounded dedup cache for redelivered stream events.

use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;

use crate::port::outbound::VenueEvent;

/// Remembers event keys for a TTL.
///
/// Venues redeliver private events after reconnects; the same fill or state
/// report must reach subscribers once.
#[derive(Debug)]
pub struct EventDeduplicator {
    seen: DashMap<String, Instant>,
    ttl: Duration,
    max_entries: usize,
}

impl EventDeduplicator {
    #[must_use]
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            seen: DashMap::new(),
            ttl,
            max_entries: max_entries.max(1),
        }
    }

    /// Record the event and report whether it was seen within the TTL.
    pub fn is_duplicate(&self, event: &VenueEvent) -> bool {
        let Some(key) = event.dedup_key() else {
            return false;
        };
        self.check_key(key)
    }

    fn check_key(&self, key: String) -> bool {
        let now = Instant::now();
        if let Some(at) = self.seen.get(&key) {
            if now.saturating_duration_since(*at) < self.ttl {
                return true;
            }
        }
        self.seen.insert(key, now);
        if self.seen.len() > self.max_entries {
            self.gc();
        }
        false
    }

    /// Drop expired entries, then the oldest ones over the size limit.
    pub fn gc(&self) {
        let now = Instant::now();
        let ttl = self.ttl;
        self.seen
            .retain(|_, at| now.saturating_duration_since(*at) < ttl);

        let excess = self.seen.len().saturating_sub(self.max_entries);
        if excess == 0 {
            return;
        }
        let mut entries: Vec<(String, Instant)> = self
            .seen
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();
        entries.sort_by_key(|(_, at)| *at);
        for (key, _) in entries.into_iter().take(excess) {
            self.seen.remove(&key);
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
