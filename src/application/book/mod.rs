//! Order book synchronization.
//!
//! - [`PairSync`] - the per-pair `Uninitialized -> Snapshotting -> Synced`
//!   state machine
//! - [`OrderBookSyncEngine`] - snapshot fetching, stream routing and
//!   subscriber fan-out

mod engine;
mod sync;

pub use engine::{BookSyncSettings, OrderBookSyncEngine};
pub use sync::{BookStats, DiffOutcome, GapPolicy, PairSync, SnapshotOutcome, SyncPhase};
