//! Order state reconciliation.
//!
//! - [`OrderTracker`] - authoritative in-flight order table
//! - [`OrderEvent`] - lifecycle notifications
//! - [`BackupPoller`] - REST backstop against lost stream messages

mod cache;
mod event;
mod poller;
mod tracker;

pub use event::OrderEvent;
pub use poller::BackupPoller;
pub use tracker::{OrderTracker, PollReport, TrackerSettings};
