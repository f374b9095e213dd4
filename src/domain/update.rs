//! Order book update messages as produced by venue adapters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::book::PriceLevel;
use super::id::TradingPair;

/// Whether an update carries the whole book or only changed levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateKind {
    /// Full state capture; replaces the book.
    Snapshot,
    /// Incremental change; levels with size zero are removed.
    Diff,
}

/// A snapshot or diff for a single trading pair.
///
/// Venues either stamp each diff with a single sequence number or with a
/// `[first, last]` range. Single-number venues leave `first_sequence_id` empty
/// and the range collapses to `[sequence_id, sequence_id]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBookUpdate {
    pub pair: TradingPair,
    pub kind: UpdateKind,
    /// Last (or only) sequence number covered by this update.
    pub sequence_id: u64,
    /// First sequence number covered, for range-sequenced venues.
    #[serde(default)]
    pub first_sequence_id: Option<u64>,
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
    pub timestamp: DateTime<Utc>,
}

impl OrderBookUpdate {
    /// Build a snapshot update.
    pub fn snapshot(
        pair: impl Into<TradingPair>,
        sequence_id: u64,
        bids: Vec<PriceLevel>,
        asks: Vec<PriceLevel>,
    ) -> Self {
        Self {
            pair: pair.into(),
            kind: UpdateKind::Snapshot,
            sequence_id,
            first_sequence_id: None,
            bids,
            asks,
            timestamp: Utc::now(),
        }
    }

    /// Build a single-sequence diff update.
    pub fn diff(
        pair: impl Into<TradingPair>,
        sequence_id: u64,
        bids: Vec<PriceLevel>,
        asks: Vec<PriceLevel>,
    ) -> Self {
        Self {
            pair: pair.into(),
            kind: UpdateKind::Diff,
            sequence_id,
            first_sequence_id: None,
            bids,
            asks,
            timestamp: Utc::now(),
        }
    }

    /// Mark this diff as covering `[first, self.sequence_id]`.
    #[must_use]
    pub fn with_range_start(mut self, first: u64) -> Self {
        self.first_sequence_id = Some(first);
        self
    }

    /// First sequence number covered by this update.
    #[must_use]
    pub fn range_start(&self) -> u64 {
        self.first_sequence_id
            .unwrap_or(self.sequence_id)
            .min(self.sequence_id)
    }

    /// True when `next` falls inside this update's sequence range.
    #[must_use]
    pub fn covers(&self, next: u64) -> bool {
        self.range_start() <= next && next <= self.sequence_id
    }

    #[must_use]
    pub const fn is_snapshot(&self) -> bool {
        matches!(self.kind, UpdateKind::Snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_sequence_range_collapses() {
        let diff = OrderBookUpdate::diff("BTC-USDT", 42, vec![], vec![]);
        assert_eq!(diff.range_start(), 42);
        assert!(diff.covers(42));
        assert!(!diff.covers(43));
    }

    #[test]
    fn test_range_sequenced_diff_covers_interior() {
        let diff = OrderBookUpdate::diff("BTC-USDT", 110, vec![], vec![]).with_range_start(101);
        assert!(diff.covers(101));
        assert!(diff.covers(105));
        assert!(diff.covers(110));
        assert!(!diff.covers(100));
    }
}
