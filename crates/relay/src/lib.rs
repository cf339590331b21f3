//! Outbox relay and sweeper.
//!
//! The relay drains pending outbox entries and publishes them on the
//! bus; the sweeper handles the slow paths: reclaiming abandoned
//! claims, resetting retryable failures, and purging delivered entries.

pub mod config;
pub mod relay;
pub mod sweeper;

pub use config::RelayConfig;
pub use relay::{CycleStats, OutboxRelay};
pub use sweeper::{OutboxSweeper, SweepStats};
