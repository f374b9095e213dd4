//! Infrastructure layer.
//!
//! Technical concerns that support the engines without containing sync
//! logic.
//!
//! # Submodules
//!
//! - [`config`] - Configuration loading, validation and logging init
//! - [`journal`] - Crash-recovery journal of in-flight orders

pub mod config;
pub mod journal;
