//! Order book types for market depth representation.
//!
//! - [`PriceLevel`] - A single price level with size
//! - [`OrderBook`] - Live, mutable book owned by the sync engine
//! - [`BookSnapshot`] - Immutable copy handed to external readers
//!
//! Bids are kept sorted descending and asks ascending, so the first element of
//! each side in a snapshot is the best price.
//!
//! # Examples
//!
//! ```
//! use venuelink::domain::book::{OrderBook, PriceLevel};
//! use venuelink::domain::update::OrderBookUpdate;
//! use rust_decimal_macros::dec;
//!
//! let mut book = OrderBook::new("BTC-USDT".into());
//! book.apply_snapshot(&OrderBookUpdate::snapshot(
//!     "BTC-USDT",
//!     100,
//!     vec![PriceLevel::new(dec!(100), dec!(1))],
//!     vec![PriceLevel::new(dec!(101), dec!(2))],
//! ))
//! .unwrap();
//!
//! assert_eq!(book.best_bid().unwrap().price(), dec!(100));
//! assert_eq!(book.best_ask().unwrap().price(), dec!(101));
//! ```

use std::cmp::Reverse;
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::error::DomainError;
use super::id::TradingPair;
use super::update::OrderBookUpdate;

/// A single price level in an order book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceLevel {
    price: Decimal,
    size: Decimal,
}

impl PriceLevel {
    /// Creates a new price level.
    #[must_use]
    pub const fn new(price: Decimal, size: Decimal) -> Self {
        Self { price, size }
    }

    /// Returns the price at this level.
    #[must_use]
    pub const fn price(&self) -> Decimal {
        self.price
    }

    /// Returns the total size resting at this level.
    #[must_use]
    pub const fn size(&self) -> Decimal {
        self.size
    }
}

/// Live order book for one trading pair.
#[derive(Debug, Clone)]
pub struct OrderBook {
    pair: TradingPair,
    bids: BTreeMap<Reverse<Decimal>, Decimal>,
    asks: BTreeMap<Decimal, Decimal>,
    sequence_id: Option<u64>,
    updated_at: Option<DateTime<Utc>>,
}

impl OrderBook {
    /// Creates a new empty book with no applied sequence.
    #[must_use]
    pub const fn new(pair: TradingPair) -> Self {
        Self {
            pair,
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            sequence_id: None,
            updated_at: None,
        }
    }

    #[must_use]
    pub const fn pair(&self) -> &TradingPair {
        &self.pair
    }

    /// Sequence id of the last applied update, if any.
    #[must_use]
    pub const fn sequence_id(&self) -> Option<u64> {
        self.sequence_id
    }

    /// Drop every level and forget the applied sequence.
    pub fn clear(&mut self) {
        self.bids.clear();
        self.asks.clear();
        self.sequence_id = None;
        self.updated_at = None;
    }

    /// Replace the whole book with the snapshot's levels.
    ///
    /// # Errors
    ///
    /// Fails without touching the book if the snapshot belongs to another
    /// pair or carries a negative size.
    pub fn apply_snapshot(&mut self, update: &OrderBookUpdate) -> Result<(), DomainError> {
        self.check(update)?;
        self.bids.clear();
        self.asks.clear();
        for level in &update.bids {
            if !level.size.is_zero() {
                self.bids.insert(Reverse(level.price), level.size);
            }
        }
        for level in &update.asks {
            if !level.size.is_zero() {
                self.asks.insert(level.price, level.size);
            }
        }
        self.sequence_id = Some(update.sequence_id);
        self.updated_at = Some(update.timestamp);
        Ok(())
    }

    /// Apply a diff: size zero removes the level, otherwise the level's size
    /// is replaced (never added to).
    ///
    /// Sequencing is the caller's concern; this only mutates levels.
    ///
    /// # Errors
    ///
    /// Fails without touching the book on pair mismatch or negative size.
    pub fn apply_diff(&mut self, update: &OrderBookUpdate) -> Result<(), DomainError> {
        self.check(update)?;
        for level in &update.bids {
            if level.size.is_zero() {
                self.bids.remove(&Reverse(level.price));
            } else {
                self.bids.insert(Reverse(level.price), level.size);
            }
        }
        for level in &update.asks {
            if level.size.is_zero() {
                self.asks.remove(&level.price);
            } else {
                self.asks.insert(level.price, level.size);
            }
        }
        self.sequence_id = Some(update.sequence_id);
        self.updated_at = Some(update.timestamp);
        Ok(())
    }

    fn check(&self, update: &OrderBookUpdate) -> Result<(), DomainError> {
        if update.pair != self.pair {
            return Err(DomainError::PairMismatch {
                expected: self.pair.clone(),
                received: update.pair.clone(),
            });
        }
        if let Some(level) = update
            .bids
            .iter()
            .chain(update.asks.iter())
            .find(|level| level.size.is_sign_negative() && !level.size.is_zero())
        {
            return Err(DomainError::NegativeSize {
                price: level.price,
                size: level.size,
            });
        }
        Ok(())
    }

    #[must_use]
    pub fn best_bid(&self) -> Option<PriceLevel> {
        self.bids
            .iter()
            .next()
            .map(|(Reverse(price), size)| PriceLevel::new(*price, *size))
    }

    #[must_use]
    pub fn best_ask(&self) -> Option<PriceLevel> {
        self.asks
            .iter()
            .next()
            .map(|(price, size)| PriceLevel::new(*price, *size))
    }

    /// Midpoint between best bid and best ask.
    #[must_use]
    pub fn mid_price(&self) -> Option<Decimal> {
        let bid = self.best_bid()?.price();
        let ask = self.best_ask()?.price();
        Some((bid + ask) / Decimal::TWO)
    }

    #[must_use]
    pub fn bid_depth(&self) -> usize {
        self.bids.len()
    }

    #[must_use]
    pub fn ask_depth(&self) -> usize {
        self.asks.len()
    }

    /// Immutable copy of the book, limited to `depth` levels per side.
    #[must_use]
    pub fn snapshot(&self, depth: Option<usize>) -> BookSnapshot {
        let limit = depth.unwrap_or(usize::MAX);
        BookSnapshot {
            pair: self.pair.clone(),
            sequence_id: self.sequence_id,
            bids: self
                .bids
                .iter()
                .take(limit)
                .map(|(Reverse(price), size)| PriceLevel::new(*price, *size))
                .collect(),
            asks: self
                .asks
                .iter()
                .take(limit)
                .map(|(price, size)| PriceLevel::new(*price, *size))
                .collect(),
            updated_at: self.updated_at,
        }
    }
}

/// Read-only copy of an order book at one sequence point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookSnapshot {
    pub pair: TradingPair,
    pub sequence_id: Option<u64>,
    /// Sorted by price descending.
    pub bids: Vec<PriceLevel>,
    /// Sorted by price ascending.
    pub asks: Vec<PriceLevel>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl BookSnapshot {
    #[must_use]
    pub fn best_bid(&self) -> Option<&PriceLevel> {
        self.bids.first()
    }

    #[must_use]
    pub fn best_ask(&self) -> Option<&PriceLevel> {
        self.asks.first()
    }
}
