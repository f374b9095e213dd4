//! Builders for domain primitives used across tests.
//!
//! Everything trades `BTC-USDT` unless told otherwise, so tests focus on
//! assertions rather than construction boilerplate.

use rust_decimal::Decimal;

use crate::domain::book::PriceLevel;
use crate::domain::id::TradingPair;
use crate::domain::order::{InFlightOrder, OrderSide, OrderState, OrderUpdate};
use crate::domain::trade::TradeUpdate;
use crate::domain::update::OrderBookUpdate;

pub const PAIR: &str = "BTC-USDT";

pub fn pair() -> TradingPair {
    TradingPair::from(PAIR)
}

/// Parse `(price, size)` string pairs into levels.
///
/// # Panics
///
/// Panics on an unparsable decimal.
pub fn levels(raw: &[(&str, &str)]) -> Vec<PriceLevel> {
    raw.iter()
        .map(|(price, size)| {
            PriceLevel::new(
                price.parse::<Decimal>().unwrap_or_else(|e| panic!("bad price {price}: {e}")),
                size.parse::<Decimal>().unwrap_or_else(|e| panic!("bad size {size}: {e}")),
            )
        })
        .collect()
}

pub fn snapshot(seq: u64, bids: &[(&str, &str)], asks: &[(&str, &str)]) -> OrderBookUpdate {
    OrderBookUpdate::snapshot(pair(), seq, levels(bids), levels(asks))
}

pub fn diff(seq: u64, bids: &[(&str, &str)], asks: &[(&str, &str)]) -> OrderBookUpdate {
    OrderBookUpdate::diff(pair(), seq, levels(bids), levels(asks))
}

/// A buy limit order at 100 for `amount`.
///
/// # Panics
///
/// Panics if `amount` is not positive.
pub fn limit_order(client_order_id: &str, amount: Decimal) -> InFlightOrder {
    InFlightOrder::limit(client_order_id, pair(), OrderSide::Buy, Decimal::ONE_HUNDRED, amount)
        .unwrap_or_else(|e| panic!("invalid test order: {e}"))
}

/// A fill at 100.
pub fn fill(trade_id: &str, client_order_id: &str, amount: Decimal) -> TradeUpdate {
    TradeUpdate::new(trade_id, client_order_id, pair(), Decimal::ONE_HUNDRED, amount)
}

pub fn order_update(client_order_id: &str, state: OrderState) -> OrderUpdate {
    OrderUpdate::new(client_order_id, pair(), state)
}
