//! Fills of the client's own orders and public trades on the tape.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::id::{ClientOrderId, ExchangeOrderId, TradeId, TradingPair};
use super::order::OrderSide;

/// One fill of a tracked order.
///
/// `trade_id` deduplicates: applying the same fill twice never changes the
/// order's filled amount.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeUpdate {
    pub trade_id: TradeId,
    pub client_order_id: ClientOrderId,
    #[serde(default)]
    pub exchange_order_id: Option<ExchangeOrderId>,
    pub pair: TradingPair,
    pub fill_price: Decimal,
    pub fill_base_amount: Decimal,
    pub fill_quote_amount: Decimal,
    pub fee_asset: String,
    pub fee_amount: Decimal,
    pub timestamp: DateTime<Utc>,
}

impl TradeUpdate {
    /// Build a fill with quote amount derived from price and size and no fee.
    pub fn new(
        trade_id: impl Into<TradeId>,
        client_order_id: impl Into<ClientOrderId>,
        pair: impl Into<TradingPair>,
        fill_price: Decimal,
        fill_base_amount: Decimal,
    ) -> Self {
        let pair = pair.into();
        let fee_asset = pair
            .split()
            .map(|(_, quote)| quote.to_string())
            .unwrap_or_default();
        Self {
            trade_id: trade_id.into(),
            client_order_id: client_order_id.into(),
            exchange_order_id: None,
            pair,
            fill_price,
            fill_base_amount,
            fill_quote_amount: fill_price * fill_base_amount,
            fee_asset,
            fee_amount: Decimal::ZERO,
            timestamp: Utc::now(),
        }
    }

    #[must_use]
    pub fn with_fee(mut self, asset: impl Into<String>, amount: Decimal) -> Self {
        self.fee_asset = asset.into();
        self.fee_amount = amount;
        self
    }

    #[must_use]
    pub fn with_exchange_order_id(mut self, id: impl Into<ExchangeOrderId>) -> Self {
        self.exchange_order_id = Some(id.into());
        self
    }
}

/// A public trade printed on the venue tape, relayed without sequencing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublicTrade {
    pub pair: TradingPair,
    pub trade_id: TradeId,
    pub price: Decimal,
    pub amount: Decimal,
    /// Side of the aggressor.
    pub taker_side: OrderSide,
    pub timestamp: DateTime<Utc>,
}
