//! Shared test utilities available to both unit and integration tests.
//!
//! Enabled via `#[cfg(test)]` (unit tests) or the `testkit` feature
//! (integration tests).
//!
//! # Modules
//!
//! - [`transport`] - `ScriptedRest` and `ChannelConnector` test transports.
//! - [`adapter`] - `JsonVenueAdapter`, a tiny JSON venue, and frame builders.
//! - [`domain`] - Builders for pairs, levels, book updates, orders and fills.
//! - [`config`] - Canonical test settings and a full TOML config.

pub mod adapter;
pub mod config;
pub mod domain;
pub mod transport;
