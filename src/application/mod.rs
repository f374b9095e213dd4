//! Application layer: the venue-agnostic sync engines.
//!
//! - [`throttle`] - rate limiter and rate-limited REST gateway
//! - [`book`] - order book snapshot/diff sync
//! - [`stream`] - authenticated stream lifecycle
//! - [`order`] - order reconciliation and backup polling
//! - [`symbol`] - per-connector symbol map
//! - [`connector`] - wires the engines into one connector

pub mod book;
pub mod connector;
pub mod order;
pub mod stream;
pub mod symbol;
pub mod throttle;
