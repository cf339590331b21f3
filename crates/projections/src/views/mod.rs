//! Concrete read-model views.

pub mod order_summary;
pub mod stock_levels;

pub use order_summary::{OrderSummary, OrderSummaryView};
pub use stock_levels::{StockLevel, StockLevelsView};
