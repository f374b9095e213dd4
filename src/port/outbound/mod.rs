//! Outbound ports: what the sync engines need from the outside world.

pub mod adapter;
pub mod auth;
pub mod transport;

pub use adapter::{ExchangeAdapter, OrderStatus, StreamChannel, VenueEvent};
pub use auth::{AuthProvider, NoAuth};
pub use transport::{
    HttpMethod, RestRequest, RestResponse, RestTransport, StreamConnector, StreamHandle,
    StreamMessage,
};
