//! Exchange-agnostic domain types.
//!
//! - [`id`] - Identifier newtypes (pairs, order ids, trade ids, rule ids)
//! - [`book`] - Order book and immutable book snapshots
//! - [`update`] - Snapshot/diff messages with sequence numbers
//! - [`order`] - In-flight order state machine
//! - [`trade`] - Own fills and public trades
//! - [`session`] - Streaming session tokens
//! - [`error`] - Domain invariant violations

pub mod book;
pub mod error;
pub mod id;
pub mod order;
pub mod session;
pub mod trade;
pub mod update;

pub use book::{BookSnapshot, OrderBook, PriceLevel};
pub use id::{ClientOrderId, ExchangeOrderId, RuleId, TradeId, TradingPair};
pub use order::{
    FillOutcome, InFlightOrder, OrderSide, OrderState, OrderType, OrderUpdate, Transition,
};
pub use session::SessionToken;
pub use trade::{PublicTrade, TradeUpdate};
pub use update::{OrderBookUpdate, UpdateKind};
