//! Venuelink - venue-agnostic exchange connectivity.
//!
//! The sync engines a multi-exchange trading client needs underneath every
//! venue connector:
//!
//! - **Rate limiting** - weighted sliding-window rules linked into a DAG, so
//!   one call debits its endpoint budget and every shared pool above it
//! - **Order book sync** - REST snapshots reconciled with sequenced stream
//!   diffs, with gap detection and re-snapshotting
//! - **Stream lifecycle** - session tokens, renewal, heartbeats and
//!   reconnection with backoff for public and private streams
//! - **Order reconciliation** - one authoritative in-flight order table fed
//!   by stream events and a REST backup poll
//!
//! Venue specifics live behind [`port::outbound::ExchangeAdapter`]; the
//! network lives behind [`port::outbound::RestTransport`] and
//! [`port::outbound::StreamConnector`].
//!
//! # Modules
//!
//! - [`domain`] - Exchange-agnostic types: books, updates, orders, sessions
//! - [`port`] - Collaborator contracts
//! - [`application`] - The engines and the [`application::connector::Connector`]
//!   that wires them
//! - [`adapter`] - `reqwest` and `tokio-tungstenite` transports
//! - [`infrastructure`] - Configuration, logging and the order journal
//! - [`error`] - Error types for the crate
//!
//! # Features
//!
//! - `testkit` - Scripted transports and a JSON test venue for integration
//!   tests
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use venuelink::adapter::outbound::{HttpTransport, WebSocketConnector};
//! use venuelink::application::connector::{Collaborators, Connector};
//! use venuelink::infrastructure::config::Config;
//! use venuelink::port::outbound::ExchangeAdapter;
//!
//! # async fn run(adapter: Arc<dyn ExchangeAdapter>) -> venuelink::error::Result<()> {
//! let config = Config::load("venuelink.toml")?;
//! config.init_logging();
//!
//! let timeout = Duration::from_millis(config.venue.request_timeout_ms);
//! let connector = Connector::new(
//!     config.connector_settings(),
//!     Collaborators {
//!         adapter,
//!         rest: Arc::new(HttpTransport::new(config.venue.rest_url.clone(), timeout)),
//!         streams: Arc::new(WebSocketConnector::new()),
//!         auth: None,
//!     },
//! )?;
//! connector.start();
//! // ...
//! connector.stop().await;
//! # Ok(())
//! # }
//! ```

pub mod adapter;
pub mod application;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod port;

#[cfg(any(test, feature = "testkit"))]
pub mod testkit;
