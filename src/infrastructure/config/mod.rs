//! Configuration sections, loading and logging init.

pub mod book;
pub mod logging;
pub mod order;
pub mod settings;
pub mod stream;
pub mod throttle;
pub mod venue;

pub use settings::Config;
