//! Port definitions for the hexagonal boundary.

pub mod outbound;
