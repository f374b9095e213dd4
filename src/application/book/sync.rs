//! Per-pair snapshot/diff reconciliation.
//!
//! ```text
//! Uninitialized -> Snapshotting -> Synced
//!                       ^             |
//!                       +---- gap ----+
//! ```
//!
//! Diffs that arrive while no snapshot is applied are held in a bounded replay
//! buffer keyed by sequence number and replayed, in order, on top of the next
//! snapshot. Once synced, a diff must cover `last + 1`; anything at or below
//! `last` is stale and dropped.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::domain::book::OrderBook;
use crate::domain::error::DomainError;
use crate::domain::id::TradingPair;
use crate::domain::update::OrderBookUpdate;

/// What to do when a diff skips ahead of the local book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum GapPolicy {
    /// Discard the book and fetch a new snapshot immediately.
    Resnapshot,
    /// Hold up to `max_pending` early diffs waiting for the missing ones.
    /// The gap is declared once the hold overflows.
    Reorder { max_pending: usize },
}

impl Default for GapPolicy {
    fn default() -> Self {
        Self::Resnapshot
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncPhase {
    Uninitialized,
    Snapshotting,
    Synced,
}

/// Counters for one pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BookStats {
    pub snapshots: u64,
    pub diffs_applied: u64,
    pub stale_dropped: u64,
    pub rejected: u64,
    pub gaps: u64,
    /// Gaps since the last successfully applied diff.
    pub consecutive_gaps: u64,
    /// Diffs evicted from a full replay buffer.
    pub buffer_evicted: u64,
}

/// Result of offering one diff.
#[derive(Debug)]
pub enum DiffOutcome {
    /// Updates applied to the book, in sequence order.
    Applied(Vec<OrderBookUpdate>),
    /// Held until a snapshot or the missing sequence numbers arrive.
    Buffered,
    /// At or below the last applied sequence.
    Stale,
    /// The book was discarded; a new snapshot is required.
    Gap { expected: u64, received: u64 },
    /// The diff violated a book invariant and was dropped.
    Rejected(DomainError),
}

/// Result of applying a snapshot and replaying buffered diffs on top.
#[derive(Debug, Default)]
pub struct SnapshotOutcome {
    /// The snapshot followed by every replayed diff.
    pub applied: Vec<OrderBookUpdate>,
    /// Set when buffered diffs skip ahead of the snapshot; the book was
    /// discarded again.
    pub gap: Option<(u64, u64)>,
    /// The book was already synced at or past the snapshot's sequence and was
    /// left untouched.
    pub stale: bool,
}

#[derive(Debug)]
pub struct PairSync {
    book: OrderBook,
    phase: SyncPhase,
    pending: BTreeMap<u64, OrderBookUpdate>,
    replay_window: usize,
    policy: GapPolicy,
    stats: BookStats,
}

impl PairSync {
    #[must_use]
    pub fn new(pair: TradingPair, policy: GapPolicy, replay_window: usize) -> Self {
        Self {
            book: OrderBook::new(pair),
            phase: SyncPhase::Uninitialized,
            pending: BTreeMap::new(),
            replay_window: replay_window.max(1),
            policy,
            stats: BookStats::default(),
        }
    }

    #[must_use]
    pub const fn book(&self) -> &OrderBook {
        &self.book
    }

    #[must_use]
    pub const fn phase(&self) -> SyncPhase {
        self.phase
    }

    #[must_use]
    pub const fn stats(&self) -> BookStats {
        self.stats
    }

    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Enter `Snapshotting`. Returns false if a snapshot was already underway.
    pub fn begin_snapshot(&mut self) -> bool {
        if self.phase == SyncPhase::Snapshotting {
            return false;
        }
        self.phase = SyncPhase::Snapshotting;
        true
    }

    /// Drop the book and any held diffs, e.g. after the stream reconnected.
    pub fn reset(&mut self) {
        self.book.clear();
        self.pending.clear();
        self.phase = SyncPhase::Uninitialized;
    }

    /// Offer a diff from the stream.
    pub fn on_diff(&mut self, update: OrderBookUpdate) -> DiffOutcome {
        let last = match (self.phase, self.book.sequence_id()) {
            (SyncPhase::Synced, Some(last)) => last,
            _ => {
                self.hold(update);
                return DiffOutcome::Buffered;
            }
        };

        if update.sequence_id <= last {
            self.stats.stale_dropped += 1;
            trace!(pair = %update.pair, sequence = update.sequence_id, last, "stale diff dropped");
            return DiffOutcome::Stale;
        }

        if !update.covers(last + 1) {
            return match self.policy {
                GapPolicy::Resnapshot => self.gap(last + 1, update),
                GapPolicy::Reorder { max_pending } => {
                    self.hold(update);
                    if self.pending.len() <= max_pending {
                        return DiffOutcome::Buffered;
                    }
                    let received = self
                        .pending
                        .first_key_value()
                        .map_or(last + 1, |(_, held)| held.range_start());
                    self.discard();
                    DiffOutcome::Gap {
                        expected: last + 1,
                        received,
                    }
                }
            };
        }

        if let Err(err) = self.book.apply_diff(&update) {
            self.stats.rejected += 1;
            return DiffOutcome::Rejected(err);
        }
        self.stats.diffs_applied += 1;
        self.stats.consecutive_gaps = 0;
        let mut applied = vec![update];
        applied.extend(self.drain_pending());
        DiffOutcome::Applied(applied)
    }

    /// Seed the book from a snapshot and replay held diffs. A snapshot that
    /// does not advance a synced book is dropped.
    ///
    /// # Errors
    ///
    /// Returns the domain error if the snapshot itself is invalid; the book is
    /// left empty and still `Snapshotting`.
    pub fn on_snapshot(
        &mut self,
        snapshot: OrderBookUpdate,
    ) -> Result<SnapshotOutcome, DomainError> {
        if let (SyncPhase::Synced, Some(last)) = (self.phase, self.book.sequence_id()) {
            if snapshot.sequence_id <= last {
                self.stats.stale_dropped += 1;
                debug!(pair = %snapshot.pair, sequence = snapshot.sequence_id, last, "stale snapshot dropped");
                return Ok(SnapshotOutcome {
                    stale: true,
                    ..SnapshotOutcome::default()
                });
            }
        }
        self.book.apply_snapshot(&snapshot)?;
        self.phase = SyncPhase::Synced;
        self.stats.snapshots += 1;
        debug!(
            pair = %snapshot.pair,
            sequence = snapshot.sequence_id,
            buffered = self.pending.len(),
            "snapshot applied"
        );

        let mut applied = vec![snapshot];
        applied.extend(self.drain_pending());

        let next_held = self
            .pending
            .first_key_value()
            .map(|(_, held)| held.range_start());
        let gap = match (self.policy, next_held, self.book.sequence_id()) {
            (GapPolicy::Resnapshot, Some(received), Some(last)) => {
                self.discard();
                Some((last + 1, received))
            }
            _ => None,
        };
        Ok(SnapshotOutcome {
            applied,
            gap,
            stale: false,
        })
    }

    /// Apply every held diff that now continues the book.
    fn drain_pending(&mut self) -> Vec<OrderBookUpdate> {
        let mut applied = Vec::new();
        while let Some(entry) = self.pending.first_entry() {
            let Some(last) = self.book.sequence_id() else {
                break;
            };
            let update = entry.get();
            if update.sequence_id <= last {
                entry.remove();
                self.stats.stale_dropped += 1;
                continue;
            }
            if !update.covers(last + 1) {
                break;
            }
            let update = entry.remove();
            match self.book.apply_diff(&update) {
                Ok(()) => {
                    self.stats.diffs_applied += 1;
                    applied.push(update);
                }
                Err(_) => self.stats.rejected += 1,
            }
        }
        if !applied.is_empty() {
            self.stats.consecutive_gaps = 0;
        }
        applied
    }

    fn hold(&mut self, update: OrderBookUpdate) {
        self.pending.insert(update.sequence_id, update);
        while self.pending.len() > self.replay_window {
            self.pending.pop_first();
            self.stats.buffer_evicted += 1;
        }
    }

    fn gap(&mut self, expected: u64, update: OrderBookUpdate) -> DiffOutcome {
        let received = update.range_start();
        self.discard();
        // The diff that revealed the gap may continue the next snapshot.
        self.hold(update);
        DiffOutcome::Gap { expected, received }
    }

    fn discard(&mut self) {
        self.book.clear();
        self.phase = SyncPhase::Snapshotting;
        self.stats.gaps += 1;
        self.stats.consecutive_gaps += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::book::PriceLevel;
    use rust_decimal_macros::dec;

    const PAIR: &str = "BTC-USDT";

    fn snapshot(seq: u64) -> OrderBookUpdate {
        OrderBookUpdate::snapshot(
            PAIR,
            seq,
            vec![PriceLevel::new(dec!(100), dec!(1))],
            vec![PriceLevel::new(dec!(101), dec!(1))],
        )
    }

    fn diff(seq: u64, bid_size: rust_decimal::Decimal) -> OrderBookUpdate {
        OrderBookUpdate::diff(
            PAIR,
            seq,
            vec![PriceLevel::new(dec!(100), bid_size)],
            vec![],
        )
    }

    fn synced(policy: GapPolicy) -> PairSync {
        let mut sync = PairSync::new(PAIR.into(), policy, 100);
        sync.begin_snapshot();
        sync.on_snapshot(snapshot(100)).unwrap();
        sync
    }

    #[test]
    fn test_contiguous_diffs_apply() {
        let mut sync = synced(GapPolicy::Resnapshot);
        assert!(matches!(sync.on_diff(diff(101, dec!(2))), DiffOutcome::Applied(_)));
        assert!(matches!(sync.on_diff(diff(102, dec!(3))), DiffOutcome::Applied(_)));
        assert_eq!(sync.book().sequence_id(), Some(102));
        assert_eq!(sync.book().best_bid().unwrap().size(), dec!(3));
    }

    #[test]
    fn test_stale_diff_is_noop() {
        let mut sync = synced(GapPolicy::Resnapshot);
        sync.on_diff(diff(101, dec!(2)));
        let before = sync.book().snapshot(None);
        assert!(matches!(sync.on_diff(diff(101, dec!(9))), DiffOutcome::Stale));
        assert!(matches!(sync.on_diff(diff(99, dec!(9))), DiffOutcome::Stale));
        assert_eq!(sync.book().snapshot(None), before);
        assert_eq!(sync.stats().stale_dropped, 2);
    }

    #[test]
    fn test_gap_discards_book_and_holds_trigger() {
        let mut sync = synced(GapPolicy::Resnapshot);
        sync.on_diff(diff(101, dec!(2)));
        sync.on_diff(diff(102, dec!(2)));
        let outcome = sync.on_diff(diff(104, dec!(5)));
        assert!(matches!(
            outcome,
            DiffOutcome::Gap {
                expected: 103,
                received: 104
            }
        ));
        assert_eq!(sync.phase(), SyncPhase::Snapshotting);
        assert_eq!(sync.book().sequence_id(), None);
        assert_eq!(sync.pending_len(), 1);

        // A fresh snapshot at 103 picks the held diff back up.
        let outcome = sync.on_snapshot(snapshot(103)).unwrap();
        assert!(outcome.gap.is_none());
        assert_eq!(outcome.applied.len(), 2);
        assert_eq!(sync.book().sequence_id(), Some(104));
    }

    #[test]
    fn test_buffered_before_snapshot_replayed_in_order() {
        let mut sync = PairSync::new(PAIR.into(), GapPolicy::Resnapshot, 100);
        sync.begin_snapshot();
        assert!(matches!(sync.on_diff(diff(102, dec!(3))), DiffOutcome::Buffered));
        assert!(matches!(sync.on_diff(diff(99, dec!(7))), DiffOutcome::Buffered));
        assert!(matches!(sync.on_diff(diff(101, dec!(2))), DiffOutcome::Buffered));

        let outcome = sync.on_snapshot(snapshot(100)).unwrap();
        assert!(outcome.gap.is_none());
        let sequences: Vec<u64> = outcome.applied.iter().map(|u| u.sequence_id).collect();
        assert_eq!(sequences, vec![100, 101, 102]);
        assert_eq!(sync.book().best_bid().unwrap().size(), dec!(3));
    }

    #[test]
    fn test_snapshot_behind_buffer_is_gap() {
        let mut sync = PairSync::new(PAIR.into(), GapPolicy::Resnapshot, 100);
        sync.begin_snapshot();
        sync.on_diff(diff(105, dec!(3)));
        let outcome = sync.on_snapshot(snapshot(100)).unwrap();
        assert_eq!(outcome.gap, Some((101, 105)));
        assert_eq!(sync.phase(), SyncPhase::Snapshotting);
    }

    #[test]
    fn test_snapshot_never_moves_synced_book_backwards() {
        let mut sync = synced(GapPolicy::Resnapshot);
        sync.on_diff(diff(101, dec!(2)));
        sync.on_diff(diff(102, dec!(3)));
        let before = sync.book().snapshot(None);

        for seq in [90, 102] {
            let outcome = sync.on_snapshot(snapshot(seq)).unwrap();
            assert!(outcome.stale);
            assert!(outcome.applied.is_empty());
        }
        assert_eq!(sync.book().snapshot(None), before);
        assert_eq!(sync.phase(), SyncPhase::Synced);
        assert_eq!(sync.stats().snapshots, 1);
        assert_eq!(sync.stats().stale_dropped, 2);

        // A newer snapshot still replaces the book.
        let outcome = sync.on_snapshot(snapshot(110)).unwrap();
        assert!(!outcome.stale);
        assert_eq!(sync.book().sequence_id(), Some(110));
    }

    #[test]
    fn test_range_diff_straddling_last_applies() {
        let mut sync = synced(GapPolicy::Resnapshot);
        let outcome = sync.on_diff(diff(105, dec!(4)).with_range_start(99));
        assert!(matches!(outcome, DiffOutcome::Applied(_)));
        assert_eq!(sync.book().sequence_id(), Some(105));
    }

    #[test]
    fn test_reorder_policy_absorbs_out_of_order() {
        let mut sync = synced(GapPolicy::Reorder { max_pending: 4 });
        assert!(matches!(sync.on_diff(diff(103, dec!(3))), DiffOutcome::Buffered));
        assert!(matches!(sync.on_diff(diff(102, dec!(2))), DiffOutcome::Buffered));
        match sync.on_diff(diff(101, dec!(1))) {
            DiffOutcome::Applied(applied) => assert_eq!(applied.len(), 3),
            other => panic!("expected applied, got {other:?}"),
        }
        assert_eq!(sync.book().sequence_id(), Some(103));
        assert_eq!(sync.book().best_bid().unwrap().size(), dec!(3));
    }

    #[test]
    fn test_reorder_overflow_declares_gap() {
        let mut sync = synced(GapPolicy::Reorder { max_pending: 1 });
        assert!(matches!(sync.on_diff(diff(103, dec!(3))), DiffOutcome::Buffered));
        assert!(matches!(
            sync.on_diff(diff(104, dec!(3))),
            DiffOutcome::Gap {
                expected: 101,
                received: 103
            }
        ));
        assert_eq!(sync.stats().gaps, 1);
    }

    #[test]
    fn test_replay_window_evicts_oldest() {
        let mut sync = PairSync::new(PAIR.into(), GapPolicy::Resnapshot, 2);
        sync.on_diff(diff(1, dec!(1)));
        sync.on_diff(diff(2, dec!(1)));
        sync.on_diff(diff(3, dec!(1)));
        assert_eq!(sync.pending_len(), 2);
        assert_eq!(sync.stats().buffer_evicted, 1);
    }
}
