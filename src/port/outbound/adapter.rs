//! Venue adapter port.
//!
//! One adapter per venue translates between venue payloads and the domain
//! types. The sync engines only ever talk to a `dyn ExchangeAdapter`, so no
//! engine depends on a concrete venue.

use crate::domain::id::TradingPair;
use crate::domain::order::{InFlightOrder, OrderUpdate};
use crate::domain::session::SessionToken;
use crate::domain::trade::{PublicTrade, TradeUpdate};
use crate::domain::update::OrderBookUpdate;
use crate::error::AdapterError;

use super::transport::{RestRequest, RestResponse};

/// Which streaming connection a message belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamChannel {
    /// Market data: book diffs and public trades.
    Public,
    /// Authenticated account events.
    Private,
}

impl StreamChannel {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Private => "private",
        }
    }
}

impl std::fmt::Display for StreamChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded streaming message.
#[derive(Debug, Clone, PartialEq)]
pub enum VenueEvent {
    BookDiff(OrderBookUpdate),
    /// Some venues push full snapshots over the stream.
    BookSnapshot(OrderBookUpdate),
    PublicTrade(PublicTrade),
    Order(OrderUpdate),
    Trade(TradeUpdate),
    /// The venue says the session token is no longer valid.
    SessionExpired,
    /// Application-level heartbeat reply.
    Pong,
}

impl VenueEvent {
    /// Key used to drop redelivered private events.
    ///
    /// Market data has its own sequencing and returns `None`.
    #[must_use]
    pub fn dedup_key(&self) -> Option<String> {
        match self {
            Self::Trade(trade) => Some(format!("trade:{}", trade.trade_id)),
            Self::Order(update) => Some(format!(
                "order:{}:{}:{}",
                update.client_order_id,
                update.new_state,
                update.timestamp.timestamp_nanos_opt().unwrap_or_default()
            )),
            _ => None,
        }
    }
}

/// Result of asking the venue about one order.
#[derive(Debug, Clone, PartialEq)]
pub enum OrderStatus {
    /// The venue knows the order; `trades` carries any fills it reported.
    Found {
        update: OrderUpdate,
        trades: Vec<TradeUpdate>,
    },
    /// The venue does not (yet) know the order.
    NotFound,
}

/// Venue-specific payload building and parsing.
///
/// Parsing failures are [`AdapterError::Malformed`]; the engines log them and
/// drop the message.
pub trait ExchangeAdapter: Send + Sync {
    /// Short venue name used in logs.
    fn name(&self) -> &str;

    /// URL of the streaming endpoint. Private channels may embed the session
    /// token.
    fn stream_url(&self, channel: StreamChannel, token: Option<&SessionToken>) -> String;

    /// Payloads to send after every (re)connect.
    fn build_subscribe_requests(&self, channel: StreamChannel, pairs: &[TradingPair])
        -> Vec<String>;

    /// Decode one text frame into zero or more events.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::Malformed`] when the frame cannot be decoded.
    fn parse_message(
        &self,
        channel: StreamChannel,
        text: &str,
    ) -> Result<Vec<VenueEvent>, AdapterError>;

    /// Application-level ping. `None` means protocol ping frames are used.
    fn ping_payload(&self) -> Option<String> {
        None
    }

    fn snapshot_request(&self, pair: &TradingPair) -> RestRequest;

    /// # Errors
    ///
    /// Returns [`AdapterError::Malformed`] on an unreadable snapshot body.
    fn parse_snapshot(
        &self,
        pair: &TradingPair,
        response: &RestResponse,
    ) -> Result<OrderBookUpdate, AdapterError>;

    /// Request that opens a private session. `None` for venues without
    /// session tokens.
    fn session_open_request(&self) -> Option<RestRequest>;

    /// # Errors
    ///
    /// Returns [`AdapterError::Malformed`] if no token can be read.
    fn parse_session_token(&self, response: &RestResponse) -> Result<SessionToken, AdapterError>;

    /// Request that extends a session. `None` when tokens cannot be renewed
    /// and must be reacquired instead.
    fn session_renew_request(&self, token: &SessionToken) -> Option<RestRequest>;

    /// Token after a successful renewal. Most venues keep the same value.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::Malformed`] if the renewal body is unreadable.
    fn parse_renewed_token(
        &self,
        token: &SessionToken,
        _response: &RestResponse,
    ) -> Result<SessionToken, AdapterError> {
        Ok(token.renewed(None))
    }

    fn session_close_request(&self, _token: &SessionToken) -> Option<RestRequest> {
        None
    }

    fn order_status_request(&self, order: &InFlightOrder) -> RestRequest;

    /// # Errors
    ///
    /// Returns [`AdapterError::Malformed`] if the body is unreadable.
    fn parse_order_status(
        &self,
        order: &InFlightOrder,
        response: &RestResponse,
    ) -> Result<OrderStatus, AdapterError>;

    /// Request listing the venue's symbols. `None` means venue symbols equal
    /// trading pair names.
    fn symbol_map_request(&self) -> Option<RestRequest> {
        None
    }

    /// Parse `(venue symbol, trading pair)` entries.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::Malformed`] if the body is unreadable.
    fn parse_symbol_map(
        &self,
        _response: &RestResponse,
    ) -> Result<Vec<(String, TradingPair)>, AdapterError> {
        Err(AdapterError::Unsupported("symbol map"))
    }
}
