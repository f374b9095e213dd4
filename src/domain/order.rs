//! In-flight order state machine.
//!
//! An [`InFlightOrder`] is created when the caller submits an order and then
//! only moves forward:
//!
//! ```text
//! Pending -> Open -> PartiallyFilled -> Filled
//!    \         \            \--------> Cancelled | Failed | Expired
//!     \         \--> PendingCancel --> Cancelled | Filled | ...
//!      \-------------------------------> (any terminal state)
//! ```
//!
//! Terminal states (`Filled`, `Cancelled`, `Failed`, `Expired`) are final.
//! `filled_amount` never decreases and each trade id counts once.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::error::DomainError;
use super::id::{ClientOrderId, ExchangeOrderId, TradeId, TradingPair};
use super::trade::TradeUpdate;

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    Limit,
    LimitMaker,
    Market,
}

/// Lifecycle state of a tracked order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderState {
    /// Submitted, not yet acknowledged by the venue.
    Pending,
    /// Resting on the book with no fills.
    Open,
    PartiallyFilled,
    /// Cancel requested, not yet confirmed.
    PendingCancel,
    Filled,
    Cancelled,
    Failed,
    Expired,
}

impl OrderState {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Filled | Self::Cancelled | Self::Failed | Self::Expired
        )
    }

    /// Whether the state machine permits moving from `self` to `next`.
    ///
    /// Self-transitions are not edges; callers treat them as no-ops.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        use OrderState::{
            Cancelled, Expired, Failed, Filled, Open, PartiallyFilled, Pending, PendingCancel,
        };
        match (self, next) {
            (Filled | Cancelled | Failed | Expired, _) => false,
            (Pending, Pending) => false,
            (Pending, _) => true,
            (Open, Pending | Open) => false,
            (Open, _) => true,
            (PartiallyFilled, PendingCancel | Filled | Cancelled | Failed | Expired) => true,
            (PartiallyFilled, _) => false,
            // A rejected cancel puts the order back on the book.
            (PendingCancel, Open | PartiallyFilled) => true,
            (PendingCancel, Filled | Cancelled | Failed | Expired) => true,
            (PendingCancel, _) => false,
        }
    }
}

impl fmt::Display for OrderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Open => "open",
            Self::PartiallyFilled => "partially_filled",
            Self::PendingCancel => "pending_cancel",
            Self::Filled => "filled",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
            Self::Expired => "expired",
        };
        f.write_str(name)
    }
}

/// A state report for one order, from REST, the private stream or the poller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderUpdate {
    pub client_order_id: ClientOrderId,
    #[serde(default)]
    pub exchange_order_id: Option<ExchangeOrderId>,
    pub pair: TradingPair,
    pub new_state: OrderState,
    pub timestamp: DateTime<Utc>,
    /// Venue-provided reason, kept for failures and rejections.
    #[serde(default)]
    pub reason: Option<String>,
}

impl OrderUpdate {
    pub fn new(
        client_order_id: impl Into<ClientOrderId>,
        pair: impl Into<TradingPair>,
        new_state: OrderState,
    ) -> Self {
        Self {
            client_order_id: client_order_id.into(),
            exchange_order_id: None,
            pair: pair.into(),
            new_state,
            timestamp: Utc::now(),
            reason: None,
        }
    }

    #[must_use]
    pub fn with_exchange_order_id(mut self, id: impl Into<ExchangeOrderId>) -> Self {
        self.exchange_order_id = Some(id.into());
        self
    }

    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// Result of offering a state change to an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Moved { from: OrderState, to: OrderState },
    /// Same state, or the order is already terminal.
    Unchanged,
    /// The edge is not part of the state machine; the order is untouched.
    Illegal { from: OrderState, to: OrderState },
}

impl Transition {
    #[must_use]
    pub const fn moved_to(&self) -> Option<OrderState> {
        match self {
            Self::Moved { to, .. } => Some(*to),
            _ => None,
        }
    }
}

/// Result of offering a fill to an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillOutcome {
    /// The trade id was already recorded.
    Duplicate,
    Applied { transition: Transition },
}

/// An order the client has submitted and still tracks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InFlightOrder {
    client_order_id: ClientOrderId,
    exchange_order_id: Option<ExchangeOrderId>,
    pair: TradingPair,
    side: OrderSide,
    order_type: OrderType,
    price: Option<Decimal>,
    amount: Decimal,
    state: OrderState,
    filled_amount: Decimal,
    filled_quote_amount: Decimal,
    #[serde(default)]
    fees: BTreeMap<String, Decimal>,
    #[serde(default)]
    fills: BTreeSet<TradeId>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    #[serde(default)]
    failure_reason: Option<String>,
}

impl InFlightOrder {
    /// Create a `Pending` order, validating amount and price.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::NonPositiveAmount`] for a zero or negative
    /// amount, and [`DomainError::NonPositivePrice`] for a limit order
    /// without a positive price.
    pub fn try_new(
        client_order_id: impl Into<ClientOrderId>,
        pair: impl Into<TradingPair>,
        side: OrderSide,
        order_type: OrderType,
        price: Option<Decimal>,
        amount: Decimal,
    ) -> Result<Self, DomainError> {
        if amount <= Decimal::ZERO {
            return Err(DomainError::NonPositiveAmount { amount });
        }
        if order_type != OrderType::Market {
            let price = price.unwrap_or(Decimal::ZERO);
            if price <= Decimal::ZERO {
                return Err(DomainError::NonPositivePrice { price });
            }
        }
        let now = Utc::now();
        Ok(Self {
            client_order_id: client_order_id.into(),
            exchange_order_id: None,
            pair: pair.into(),
            side,
            order_type,
            price,
            amount,
            state: OrderState::Pending,
            filled_amount: Decimal::ZERO,
            filled_quote_amount: Decimal::ZERO,
            fees: BTreeMap::new(),
            fills: BTreeSet::new(),
            created_at: now,
            updated_at: now,
            failure_reason: None,
        })
    }

    /// Convenience constructor for a limit order.
    ///
    /// # Errors
    ///
    /// Same as [`InFlightOrder::try_new`].
    pub fn limit(
        client_order_id: impl Into<ClientOrderId>,
        pair: impl Into<TradingPair>,
        side: OrderSide,
        price: Decimal,
        amount: Decimal,
    ) -> Result<Self, DomainError> {
        Self::try_new(
            client_order_id,
            pair,
            side,
            OrderType::Limit,
            Some(price),
            amount,
        )
    }

    #[must_use]
    pub fn with_exchange_order_id(mut self, id: impl Into<ExchangeOrderId>) -> Self {
        self.exchange_order_id = Some(id.into());
        self
    }

    /// Start from a state other than `Pending`, e.g. when the submission
    /// response already acknowledged the order.
    #[must_use]
    pub fn with_initial_state(mut self, state: OrderState) -> Self {
        self.state = state;
        self
    }

    #[must_use]
    pub const fn client_order_id(&self) -> &ClientOrderId {
        &self.client_order_id
    }

    #[must_use]
    pub const fn exchange_order_id(&self) -> Option<&ExchangeOrderId> {
        self.exchange_order_id.as_ref()
    }

    #[must_use]
    pub const fn pair(&self) -> &TradingPair {
        &self.pair
    }

    #[must_use]
    pub const fn side(&self) -> OrderSide {
        self.side
    }

    #[must_use]
    pub const fn order_type(&self) -> OrderType {
        self.order_type
    }

    #[must_use]
    pub const fn price(&self) -> Option<Decimal> {
        self.price
    }

    #[must_use]
    pub const fn amount(&self) -> Decimal {
        self.amount
    }

    #[must_use]
    pub const fn state(&self) -> OrderState {
        self.state
    }

    #[must_use]
    pub const fn filled_amount(&self) -> Decimal {
        self.filled_amount
    }

    #[must_use]
    pub const fn filled_quote_amount(&self) -> Decimal {
        self.filled_quote_amount
    }

    #[must_use]
    pub fn remaining_amount(&self) -> Decimal {
        (self.amount - self.filled_amount).max(Decimal::ZERO)
    }

    /// Fees paid so far, keyed by asset.
    #[must_use]
    pub const fn fees(&self) -> &BTreeMap<String, Decimal> {
        &self.fees
    }

    #[must_use]
    pub fn has_fill(&self, trade_id: &TradeId) -> bool {
        self.fills.contains(trade_id)
    }

    #[must_use]
    pub fn fill_count(&self) -> usize {
        self.fills.len()
    }

    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    #[must_use]
    pub const fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    #[must_use]
    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }

    /// Volume-weighted average fill price.
    #[must_use]
    pub fn average_executed_price(&self) -> Option<Decimal> {
        if self.filled_amount.is_zero() {
            return None;
        }
        Some(self.filled_quote_amount / self.filled_amount)
    }

    /// Record the venue order id if none is known yet.
    ///
    /// Returns true when the id was newly assigned.
    pub fn assign_exchange_order_id(&mut self, id: &ExchangeOrderId) -> bool {
        if self.exchange_order_id.is_some() {
            return false;
        }
        self.exchange_order_id = Some(id.clone());
        true
    }

    /// Apply a state report along legal edges only.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::OrderMismatch`] if the update names another order.
    pub fn apply_order_update(&mut self, update: &OrderUpdate) -> Result<Transition, DomainError> {
        self.check_id(&update.client_order_id)?;
        if let Some(id) = &update.exchange_order_id {
            self.assign_exchange_order_id(id);
        }
        let transition = self.transition_to(update.new_state, update.timestamp);
        if matches!(transition, Transition::Moved { to: OrderState::Failed, .. }) {
            self.failure_reason = update.reason.clone();
        }
        Ok(transition)
    }

    /// Apply a fill. Duplicate trade ids are ignored.
    ///
    /// Fills on terminal orders are still recorded, but the state never
    /// leaves the terminal state.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::OrderMismatch`] if the trade names another order.
    pub fn apply_trade(&mut self, trade: &TradeUpdate) -> Result<FillOutcome, DomainError> {
        self.check_id(&trade.client_order_id)?;
        if !self.fills.insert(trade.trade_id.clone()) {
            return Ok(FillOutcome::Duplicate);
        }
        if let Some(id) = &trade.exchange_order_id {
            self.assign_exchange_order_id(id);
        }

        self.filled_amount += trade.fill_base_amount;
        self.filled_quote_amount += trade.fill_quote_amount;
        if !trade.fee_amount.is_zero() {
            *self.fees.entry(trade.fee_asset.clone()).or_default() += trade.fee_amount;
        }
        self.updated_at = self.updated_at.max(trade.timestamp);

        let target = if self.filled_amount >= self.amount {
            OrderState::Filled
        } else if matches!(self.state, OrderState::Pending | OrderState::Open) {
            OrderState::PartiallyFilled
        } else {
            self.state
        };
        let transition = self.transition_to(target, trade.timestamp);
        Ok(FillOutcome::Applied { transition })
    }

    /// Force the order into `Failed`, e.g. after repeated not-found polls.
    pub fn force_fail(&mut self, reason: impl Into<String>) -> Transition {
        let transition = self.transition_to(OrderState::Failed, Utc::now());
        if transition.moved_to().is_some() {
            self.failure_reason = Some(reason.into());
        }
        transition
    }

    fn transition_to(&mut self, next: OrderState, at: DateTime<Utc>) -> Transition {
        let from = self.state;
        if from == next || from.is_terminal() {
            return Transition::Unchanged;
        }
        if !from.can_transition_to(next) {
            return Transition::Illegal { from, to: next };
        }
        self.state = next;
        self.updated_at = self.updated_at.max(at);
        Transition::Moved { from, to: next }
    }

    fn check_id(&self, id: &ClientOrderId) -> Result<(), DomainError> {
        if *id != self.client_order_id {
            return Err(DomainError::OrderMismatch {
                expected: self.client_order_id.clone(),
                received: id.clone(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn order(amount: Decimal) -> InFlightOrder {
        InFlightOrder::limit("O1", "BTC-USDT", OrderSide::Buy, dec!(100), amount).unwrap()
    }

    fn fill(id: &str, amount: Decimal) -> TradeUpdate {
        TradeUpdate::new(id, "O1", "BTC-USDT", dec!(100), amount)
    }

    #[test]
    fn test_new_order_is_pending() {
        let order = order(dec!(10));
        assert_eq!(order.state(), OrderState::Pending);
        assert_eq!(order.filled_amount(), Decimal::ZERO);
    }

    #[test]
    fn test_rejects_non_positive_amount() {
        let err =
            InFlightOrder::limit("O1", "BTC-USDT", OrderSide::Buy, dec!(1), dec!(0)).unwrap_err();
        assert!(matches!(err, DomainError::NonPositiveAmount { .. }));
    }

    #[test]
    fn test_limit_requires_price() {
        let err = InFlightOrder::try_new(
            "O1",
            "BTC-USDT",
            OrderSide::Sell,
            OrderType::Limit,
            None,
            dec!(1),
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::NonPositivePrice { .. }));
    }

    #[test]
    fn test_market_order_without_price() {
        let order = InFlightOrder::try_new(
            "O1",
            "BTC-USDT",
            OrderSide::Sell,
            OrderType::Market,
            None,
            dec!(1),
        );
        assert!(order.is_ok());
    }

    #[test]
    fn test_partial_then_full_fill() {
        let mut order = order(dec!(10));
        order
            .apply_order_update(&OrderUpdate::new("O1", "BTC-USDT", OrderState::Open))
            .unwrap();

        let first = order.apply_trade(&fill("t1", dec!(4))).unwrap();
        assert_eq!(
            first,
            FillOutcome::Applied {
                transition: Transition::Moved {
                    from: OrderState::Open,
                    to: OrderState::PartiallyFilled
                }
            }
        );

        order.apply_trade(&fill("t2", dec!(6))).unwrap();
        assert_eq!(order.state(), OrderState::Filled);
        assert_eq!(order.filled_amount(), dec!(10));
    }

    #[test]
    fn test_duplicate_trade_does_not_double_count() {
        let mut order = order(dec!(10));
        order.apply_trade(&fill("t1", dec!(4))).unwrap();
        let again = order.apply_trade(&fill("t1", dec!(4))).unwrap();
        assert_eq!(again, FillOutcome::Duplicate);
        assert_eq!(order.filled_amount(), dec!(4));
    }

    #[test]
    fn test_terminal_state_is_final() {
        let mut order = order(dec!(10));
        order
            .apply_order_update(&OrderUpdate::new("O1", "BTC-USDT", OrderState::Cancelled))
            .unwrap();
        let transition = order
            .apply_order_update(&OrderUpdate::new("O1", "BTC-USDT", OrderState::Open))
            .unwrap();
        assert_eq!(transition, Transition::Unchanged);
        assert_eq!(order.state(), OrderState::Cancelled);
    }

    #[test]
    fn test_late_fill_on_cancelled_order_keeps_state() {
        let mut order = order(dec!(10));
        order
            .apply_order_update(&OrderUpdate::new("O1", "BTC-USDT", OrderState::Cancelled))
            .unwrap();
        order.apply_trade(&fill("t1", dec!(3))).unwrap();
        assert_eq!(order.state(), OrderState::Cancelled);
        assert_eq!(order.filled_amount(), dec!(3));
    }

    #[test]
    fn test_partially_filled_cannot_regress_to_open() {
        let mut order = order(dec!(10));
        order.apply_trade(&fill("t1", dec!(1))).unwrap();
        let transition = order
            .apply_order_update(&OrderUpdate::new("O1", "BTC-USDT", OrderState::Open))
            .unwrap();
        assert!(matches!(transition, Transition::Illegal { .. }));
        assert_eq!(order.state(), OrderState::PartiallyFilled);
    }

    #[test]
    fn test_fill_during_pending_cancel_keeps_pending_cancel() {
        let mut order = order(dec!(10)).with_initial_state(OrderState::PendingCancel);
        order.apply_trade(&fill("t1", dec!(2))).unwrap();
        assert_eq!(order.state(), OrderState::PendingCancel);
    }

    #[test]
    fn test_update_assigns_exchange_id_once() {
        let mut order = order(dec!(10));
        order
            .apply_order_update(
                &OrderUpdate::new("O1", "BTC-USDT", OrderState::Open).with_exchange_order_id("E1"),
            )
            .unwrap();
        order
            .apply_order_update(
                &OrderUpdate::new("O1", "BTC-USDT", OrderState::Open).with_exchange_order_id("E2"),
            )
            .unwrap();
        assert_eq!(order.exchange_order_id().unwrap().as_str(), "E1");
    }

    #[test]
    fn test_mismatched_update_rejected() {
        let mut order = order(dec!(10));
        let err = order
            .apply_order_update(&OrderUpdate::new("O2", "BTC-USDT", OrderState::Open))
            .unwrap_err();
        assert!(matches!(err, DomainError::OrderMismatch { .. }));
    }

    #[test]
    fn test_average_price_and_fees() {
        let mut order = order(dec!(10));
        order
            .apply_trade(
                &TradeUpdate::new("t1", "O1", "BTC-USDT", dec!(100), dec!(5))
                    .with_fee("USDT", dec!(0.5)),
            )
            .unwrap();
        order
            .apply_trade(
                &TradeUpdate::new("t2", "O1", "BTC-USDT", dec!(110), dec!(5))
                    .with_fee("USDT", dec!(0.55)),
            )
            .unwrap();
        assert_eq!(order.average_executed_price(), Some(dec!(105)));
        assert_eq!(order.fees().get("USDT"), Some(&dec!(1.05)));
    }

    #[test]
    fn test_force_fail_records_reason() {
        let mut order = order(dec!(10));
        let transition = order.force_fail("not found");
        assert_eq!(transition.moved_to(), Some(OrderState::Failed));
        assert_eq!(order.failure_reason(), Some("not found"));
    }

    #[test]
    fn test_serde_round_trip_preserves_fills() {
        let mut order = order(dec!(10));
        order.apply_trade(&fill("t1", dec!(4))).unwrap();
        let json = serde_json::to_string(&order).unwrap();
        let restored: InFlightOrder = serde_json::from_str(&json).unwrap();
        assert!(restored.has_fill(&TradeId::from("t1")));
        assert_eq!(restored, order);
    }
}
