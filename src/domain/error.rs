//! Domain validation errors for core domain types.
//!
//! These errors are returned by `try_new` constructors and by operations that
//! would break a domain invariant if they were allowed to proceed.

use rust_decimal::Decimal;
use thiserror::Error;

use super::id::{ClientOrderId, TradingPair};

/// Errors that occur when domain invariants are violated.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Order amount must be positive.
    #[error("order amount must be positive, got {amount}")]
    NonPositiveAmount {
        /// The invalid amount that was provided.
        amount: Decimal,
    },

    /// Limit orders need a positive price.
    #[error("limit order price must be positive, got {price}")]
    NonPositivePrice {
        /// The invalid price that was provided.
        price: Decimal,
    },

    /// An update was routed to the wrong order.
    #[error("update for {received} applied to order {expected}")]
    OrderMismatch {
        /// The order the update was applied to.
        expected: ClientOrderId,
        /// The order named by the update.
        received: ClientOrderId,
    },

    /// A book update was routed to the wrong pair.
    #[error("update for {received} applied to book {expected}")]
    PairMismatch {
        /// The pair of the book.
        expected: TradingPair,
        /// The pair named by the update.
        received: TradingPair,
    },

    /// A price level with a negative size.
    #[error("negative size {size} at price {price}")]
    NegativeSize {
        /// Price of the offending level.
        price: Decimal,
        /// Offending size.
        size: Decimal,
    },
}
