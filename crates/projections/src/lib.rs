//! Read-model projections.
//!
//! A projection consumes domain events from the bus and maintains an
//! in-memory view optimized for queries. Projections are idempotent:
//! each handler tracks the event ids it has applied and skips
//! duplicates, because the relay delivers at least once, not exactly
//! once.

pub mod error;
pub mod ledger;
pub mod projection;
pub mod views;

pub use error::{ProjectionError, Result};
pub use ledger::ProcessedLedger;
pub use projection::{Projection, ProjectionHandler};
pub use views::{OrderSummaryView, StockLevelsView};
