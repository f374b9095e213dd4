//! Sliding-window call log for one rate limit rule.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

/// Timestamped log of admitted weight within one window.
#[derive(Debug, Default)]
pub(crate) struct SlidingWindow {
    entries: VecDeque<(Instant, u32)>,
    used: u32,
}

impl SlidingWindow {
    /// Drop entries that left the window.
    pub(crate) fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(&(at, weight)) = self.entries.front() {
            if now.saturating_duration_since(at) < window {
                break;
            }
            self.entries.pop_front();
            self.used -= weight;
        }
    }

    pub(crate) const fn used(&self) -> u32 {
        self.used
    }

    /// How long until `weight` more fits under `capacity`.
    ///
    /// `None` when it fits now. Call [`SlidingWindow::prune`] first.
    pub(crate) fn wait_for(
        &self,
        now: Instant,
        window: Duration,
        capacity: u32,
        weight: u32,
    ) -> Option<Duration> {
        if self.used + weight <= capacity {
            return None;
        }
        let mut remaining = self.used;
        for &(at, entry_weight) in &self.entries {
            remaining -= entry_weight;
            if remaining + weight <= capacity {
                return Some((at + window).saturating_duration_since(now));
            }
        }
        // Unreachable while weight <= capacity; callers check that first.
        Some(window)
    }

    pub(crate) fn record(&mut self, now: Instant, weight: u32) {
        self.entries.push_back((now, weight));
        self.used += weight;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_secs(1);

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire_after_window() {
        let mut window = SlidingWindow::default();
        window.record(Instant::now(), 2);
        tokio::time::advance(Duration::from_millis(999)).await;
        window.prune(Instant::now(), WINDOW);
        assert_eq!(window.used(), 2);
        tokio::time::advance(Duration::from_millis(1)).await;
        window.prune(Instant::now(), WINDOW);
        assert_eq!(window.used(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_oldest_sufficient_entry() {
        let mut window = SlidingWindow::default();
        let start = Instant::now();
        window.record(start, 1);
        tokio::time::advance(Duration::from_millis(300)).await;
        window.record(Instant::now(), 1);

        let now = Instant::now();
        assert_eq!(window.wait_for(now, WINDOW, 3, 1), None);
        assert_eq!(
            window.wait_for(now, WINDOW, 2, 1),
            Some(Duration::from_millis(700))
        );
        // Needs both entries gone.
        assert_eq!(
            window.wait_for(now, WINDOW, 2, 2),
            Some(Duration::from_millis(1000))
        );
    }
}
