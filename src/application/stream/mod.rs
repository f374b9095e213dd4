//! Streaming session management.
//!
//! - [`StreamLifecycleManager`] - acquire, renew, heartbeat, reconnect
//! - [`Backoff`] - reconnect delays with jitter and a circuit breaker
//! - [`EventDeduplicator`] - drops redelivered private events

mod backoff;
mod dedup;
mod manager;

pub use backoff::{Backoff, BackoffPolicy};
pub use dedup::EventDeduplicator;
pub use manager::{LifecycleState, StreamEvent, StreamLifecycleManager, StreamSettings};
