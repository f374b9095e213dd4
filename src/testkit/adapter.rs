//! A small JSON venue for exercising the engines end to end.
//!
//! Streams carry objects tagged by `type` (`diff`, `snapshot`,
//! `public_trade`, `order`, `fill`, `session_expired`, `pong`, `ack`).
//! REST routes:
//!
//! | call            | route                     | rule       |
//! |-----------------|---------------------------|------------|
//! | book snapshot   | `GET /depth/{pair}`       | `depth`    |
//! | open session    | `POST /session`           | `session`  |
//! | renew session   | `PUT /session/{token}`    | `session`  |
//! | close session   | `DELETE /session/{token}` | `session`  |
//! | order status    | `GET /order/{id}`         | `orders`   |
//! | symbols         | `GET /symbols`            | `symbols`  |

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::domain::book::PriceLevel;
use crate::domain::id::TradingPair;
use crate::domain::order::{InFlightOrder, OrderSide, OrderState, OrderUpdate};
use crate::domain::session::SessionToken;
use crate::domain::trade::{PublicTrade, TradeUpdate};
use crate::domain::update::OrderBookUpdate;
use crate::error::AdapterError;
use crate::port::outbound::{
    ExchangeAdapter, OrderStatus, RestRequest, RestResponse, StreamChannel, VenueEvent,
};

pub const DEPTH_RULE: &str = "depth";
pub const SESSION_RULE: &str = "session";
pub const ORDER_RULE: &str = "orders";
pub const SYMBOL_RULE: &str = "symbols";

#[derive(Debug, Clone)]
pub struct JsonVenueAdapter {
    ws_base: String,
    sessions: bool,
    symbol_map: bool,
    snapshot_weight: u32,
}

impl JsonVenueAdapter {
    /// Adapter with private sessions enabled and no symbol map.
    pub fn new(ws_base: impl Into<String>) -> Self {
        Self {
            ws_base: ws_base.into(),
            sessions: true,
            symbol_map: false,
            snapshot_weight: 1,
        }
    }

    /// Venue whose private stream needs no session token.
    #[must_use]
    pub const fn without_sessions(mut self) -> Self {
        self.sessions = false;
        self
    }

    #[must_use]
    pub const fn with_symbol_map(mut self) -> Self {
        self.symbol_map = true;
        self
    }

    #[must_use]
    pub const fn with_snapshot_weight(mut self, weight: u32) -> Self {
        self.snapshot_weight = weight;
        self
    }
}

impl Default for JsonVenueAdapter {
    fn default() -> Self {
        Self::new("ws://venue.test")
    }
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireMessage {
    Diff(WireBook),
    Snapshot(WireBook),
    PublicTrade(WirePublicTrade),
    Order(WireOrder),
    Fill(WireFill),
    SessionExpired,
    Pong,
    Ack,
}

#[derive(Deserialize)]
struct WireBook {
    pair: String,
    seq: u64,
    #[serde(default)]
    first_seq: Option<u64>,
    #[serde(default)]
    bids: Vec<(Decimal, Decimal)>,
    #[serde(default)]
    asks: Vec<(Decimal, Decimal)>,
}

#[derive(Deserialize)]
struct WirePublicTrade {
    pair: String,
    trade_id: String,
    price: Decimal,
    amount: Decimal,
    side: OrderSide,
    #[serde(default)]
    ts: Option<i64>,
}

#[derive(Deserialize)]
struct WireOrder {
    client_order_id: String,
    #[serde(default)]
    exchange_order_id: Option<String>,
    pair: String,
    state: OrderState,
    #[serde(default)]
    ts: Option<i64>,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Deserialize)]
struct WireFill {
    trade_id: String,
    client_order_id: String,
    #[serde(default)]
    exchange_order_id: Option<String>,
    pair: String,
    price: Decimal,
    amount: Decimal,
    #[serde(default)]
    fee: Option<(String, Decimal)>,
    #[serde(default)]
    ts: Option<i64>,
}

#[derive(Deserialize)]
struct WireSnapshot {
    seq: u64,
    #[serde(default)]
    bids: Vec<(Decimal, Decimal)>,
    #[serde(default)]
    asks: Vec<(Decimal, Decimal)>,
}

#[derive(Deserialize)]
struct WireToken {
    token: String,
    expires_in_ms: u64,
}

#[derive(Deserialize)]
struct WireStatusTrade {
    trade_id: String,
    price: Decimal,
    amount: Decimal,
    #[serde(default)]
    fee: Option<(String, Decimal)>,
}

#[derive(Deserialize)]
struct WireOrderStatus {
    state: OrderState,
    #[serde(default)]
    exchange_order_id: Option<String>,
    #[serde(default)]
    trades: Vec<WireStatusTrade>,
}

#[derive(Deserialize)]
struct WireSymbol {
    symbol: String,
    pair: String,
}

fn levels(raw: Vec<(Decimal, Decimal)>) -> Vec<PriceLevel> {
    raw.into_iter()
        .map(|(price, size)| PriceLevel::new(price, size))
        .collect()
}

fn timestamp(ts: Option<i64>) -> DateTime<Utc> {
    ts.and_then(DateTime::from_timestamp_millis)
        .unwrap_or_else(Utc::now)
}

fn malformed(err: impl std::fmt::Display) -> AdapterError {
    AdapterError::Malformed(err.to_string())
}

fn book_update(book: WireBook, snapshot: bool) -> OrderBookUpdate {
    let bids = levels(book.bids);
    let asks = levels(book.asks);
    if snapshot {
        return OrderBookUpdate::snapshot(book.pair, book.seq, bids, asks);
    }
    let diff = OrderBookUpdate::diff(book.pair, book.seq, bids, asks);
    match book.first_seq {
        Some(first) => diff.with_range_start(first),
        None => diff,
    }
}

fn fill_update(fill: WireFill) -> TradeUpdate {
    let mut trade = TradeUpdate::new(
        fill.trade_id,
        fill.client_order_id,
        fill.pair,
        fill.price,
        fill.amount,
    );
    if let Some((asset, amount)) = fill.fee {
        trade = trade.with_fee(asset, amount);
    }
    if let Some(id) = fill.exchange_order_id {
        trade = trade.with_exchange_order_id(id);
    }
    trade.timestamp = timestamp(fill.ts);
    trade
}

fn order_update(order: WireOrder) -> OrderUpdate {
    let mut update = OrderUpdate::new(order.client_order_id, order.pair, order.state);
    if let Some(id) = order.exchange_order_id {
        update = update.with_exchange_order_id(id);
    }
    if let Some(reason) = order.reason {
        update = update.with_reason(reason);
    }
    update.timestamp = timestamp(order.ts);
    update
}

impl ExchangeAdapter for JsonVenueAdapter {
    fn name(&self) -> &str {
        "json-venue"
    }

    fn stream_url(&self, channel: StreamChannel, token: Option<&SessionToken>) -> String {
        match (channel, token) {
            (StreamChannel::Private, Some(token)) => {
                format!("{}/private?token={}", self.ws_base, token.value())
            }
            (channel, _) => format!("{}/{channel}", self.ws_base),
        }
    }

    fn build_subscribe_requests(
        &self,
        channel: StreamChannel,
        pairs: &[TradingPair],
    ) -> Vec<String> {
        match channel {
            StreamChannel::Public if pairs.is_empty() => Vec::new(),
            StreamChannel::Public => {
                let pairs: Vec<&str> = pairs.iter().map(TradingPair::as_str).collect();
                vec![json!({"op": "subscribe", "channel": "book", "pairs": pairs}).to_string()]
            }
            StreamChannel::Private => {
                vec![json!({"op": "subscribe", "channel": "account"}).to_string()]
            }
        }
    }

    fn parse_message(
        &self,
        _channel: StreamChannel,
        text: &str,
    ) -> Result<Vec<VenueEvent>, AdapterError> {
        let message: WireMessage = serde_json::from_str(text).map_err(malformed)?;
        let event = match message {
            WireMessage::Diff(book) => VenueEvent::BookDiff(book_update(book, false)),
            WireMessage::Snapshot(book) => VenueEvent::BookSnapshot(book_update(book, true)),
            WireMessage::PublicTrade(trade) => VenueEvent::PublicTrade(PublicTrade {
                pair: TradingPair::from(trade.pair),
                trade_id: trade.trade_id.into(),
                price: trade.price,
                amount: trade.amount,
                taker_side: trade.side,
                timestamp: timestamp(trade.ts),
            }),
            WireMessage::Order(order) => VenueEvent::Order(order_update(order)),
            WireMessage::Fill(fill) => VenueEvent::Trade(fill_update(fill)),
            WireMessage::SessionExpired => VenueEvent::SessionExpired,
            WireMessage::Pong => VenueEvent::Pong,
            WireMessage::Ack => return Ok(Vec::new()),
        };
        Ok(vec![event])
    }

    fn snapshot_request(&self, pair: &TradingPair) -> RestRequest {
        RestRequest::get(format!("/depth/{pair}"), DEPTH_RULE).with_weight(self.snapshot_weight)
    }

    fn parse_snapshot(
        &self,
        pair: &TradingPair,
        response: &RestResponse,
    ) -> Result<OrderBookUpdate, AdapterError> {
        let body: WireSnapshot = response.json().map_err(malformed)?;
        Ok(OrderBookUpdate::snapshot(
            pair.clone(),
            body.seq,
            levels(body.bids),
            levels(body.asks),
        ))
    }

    fn session_open_request(&self) -> Option<RestRequest> {
        self.sessions
            .then(|| RestRequest::post("/session", SESSION_RULE).authenticated())
    }

    fn parse_session_token(&self, response: &RestResponse) -> Result<SessionToken, AdapterError> {
        let body: WireToken = response.json().map_err(malformed)?;
        Ok(SessionToken::new(
            body.token,
            std::time::Duration::from_millis(body.expires_in_ms),
        ))
    }

    fn session_renew_request(&self, token: &SessionToken) -> Option<RestRequest> {
        Some(RestRequest::put(format!("/session/{}", token.value()), SESSION_RULE).authenticated())
    }

    fn session_close_request(&self, token: &SessionToken) -> Option<RestRequest> {
        Some(
            RestRequest::delete(format!("/session/{}", token.value()), SESSION_RULE)
                .authenticated(),
        )
    }

    fn order_status_request(&self, order: &InFlightOrder) -> RestRequest {
        RestRequest::get(format!("/order/{}", order.client_order_id()), ORDER_RULE).authenticated()
    }

    fn parse_order_status(
        &self,
        order: &InFlightOrder,
        response: &RestResponse,
    ) -> Result<OrderStatus, AdapterError> {
        if response.status == 404 {
            return Ok(OrderStatus::NotFound);
        }
        if !response.is_success() {
            return Err(AdapterError::Malformed(format!(
                "order status answered {}",
                response.status
            )));
        }
        let body: WireOrderStatus = response.json().map_err(malformed)?;
        let mut update = OrderUpdate::new(
            order.client_order_id().clone(),
            order.pair().clone(),
            body.state,
        );
        if let Some(id) = &body.exchange_order_id {
            update = update.with_exchange_order_id(id.as_str());
        }
        let trades = body
            .trades
            .into_iter()
            .map(|trade| {
                fill_update(WireFill {
                    trade_id: trade.trade_id,
                    client_order_id: order.client_order_id().to_string(),
                    exchange_order_id: body.exchange_order_id.clone(),
                    pair: order.pair().to_string(),
                    price: trade.price,
                    amount: trade.amount,
                    fee: trade.fee,
                    ts: None,
                })
            })
            .collect();
        Ok(OrderStatus::Found { update, trades })
    }

    fn symbol_map_request(&self) -> Option<RestRequest> {
        self.symbol_map
            .then(|| RestRequest::get("/symbols", SYMBOL_RULE))
    }

    fn parse_symbol_map(
        &self,
        response: &RestResponse,
    ) -> Result<Vec<(String, TradingPair)>, AdapterError> {
        let body: Vec<WireSymbol> = response.json().map_err(malformed)?;
        Ok(body
            .into_iter()
            .map(|entry| (entry.symbol, TradingPair::from(entry.pair)))
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Wire builders
// ---------------------------------------------------------------------------

/// `[price, size]` pairs as strings, e.g. `&[("100.5", "2")]`.
fn wire_levels(levels: &[(&str, &str)]) -> Value {
    Value::Array(
        levels
            .iter()
            .map(|(price, size)| json!([price, size]))
            .collect(),
    )
}

/// A single-sequence diff frame.
pub fn diff_json(pair: &str, seq: u64, bids: &[(&str, &str)], asks: &[(&str, &str)]) -> Value {
    json!({
        "type": "diff",
        "pair": pair,
        "seq": seq,
        "bids": wire_levels(bids),
        "asks": wire_levels(asks),
    })
}

/// A diff frame covering `[first, last]`.
pub fn range_diff_json(
    pair: &str,
    first: u64,
    last: u64,
    bids: &[(&str, &str)],
    asks: &[(&str, &str)],
) -> Value {
    let mut frame = diff_json(pair, last, bids, asks);
    frame["first_seq"] = json!(first);
    frame
}

/// Body of `GET /depth/{pair}`.
pub fn snapshot_body(seq: u64, bids: &[(&str, &str)], asks: &[(&str, &str)]) -> Value {
    json!({"seq": seq, "bids": wire_levels(bids), "asks": wire_levels(asks)})
}

/// Body of `POST /session`.
pub fn token_body(token: &str, expires_in_ms: u64) -> Value {
    json!({"token": token, "expires_in_ms": expires_in_ms})
}

/// An order state frame with a fixed venue timestamp.
pub fn order_json(client_order_id: &str, pair: &str, state: &str, ts: i64) -> Value {
    json!({
        "type": "order",
        "client_order_id": client_order_id,
        "pair": pair,
        "state": state,
        "ts": ts,
    })
}

/// A fill frame.
pub fn fill_json(trade_id: &str, client_order_id: &str, pair: &str, price: &str, amount: &str) -> Value {
    json!({
        "type": "fill",
        "trade_id": trade_id,
        "client_order_id": client_order_id,
        "pair": pair,
        "price": price,
        "amount": amount,
    })
}

/// Body of `GET /order/{id}`. `trades` are `(trade_id, price, amount)`.
pub fn order_status_body(state: &str, trades: &[(&str, &str, &str)]) -> Value {
    let trades: Vec<Value> = trades
        .iter()
        .map(|(id, price, amount)| json!({"trade_id": id, "price": price, "amount": amount}))
        .collect();
    json!({"state": state, "trades": trades})
}
