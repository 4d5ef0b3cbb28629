//! Cloud Foundry acceptance harness
//!
//! Drives the `cf` CLI and deployed applications through declarative
//! scenarios, waiting for eventually-consistent state with bounded polls and
//! cleaning up every platform resource a scenario creates.

pub mod cli;
pub mod commands;
pub mod common;
pub mod exec;
pub mod platform;
pub mod poll;
pub mod resources;
pub mod scenario;

// Re-export commonly used types for tests
pub use common::{Config, Error, Result};
