//! Request throttling.
//!
//! - [`RateLimiter`] - weighted sliding-window budgets with linked parent pools
//! - [`RestGateway`] - the rate-limited, signed REST path

mod gateway;
mod limiter;
mod rule;
mod window;

pub use gateway::RestGateway;
pub use limiter::{Permit, RateLimiter, ThrottleSettings};
pub use rule::{LinkedLimit, RateLimitRule};
