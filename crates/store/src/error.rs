//! Store error types.

use common::{AggregateId, Version};
use thiserror::Error;

/// Errors that can occur during persistence operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The storage row was not at the version this write required.
    ///
    /// Someone else committed first. The caller must reload the aggregate
    /// and re-run its command; the store never retries on its own.
    #[error("concurrency conflict on aggregate {aggregate_id}: stored version is not {expected}")]
    ConcurrencyConflict {
        aggregate_id: AggregateId,
        expected: Version,
    },

    /// An insert collided with an existing row for the same id.
    #[error("aggregate {0} already exists")]
    AlreadyExists(AggregateId),

    /// A status column held a value outside the outbox state machine.
    #[error("unknown outbox status: {0}")]
    UnknownStatus(String),

    /// Database error from sqlx.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Migration error.
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// JSON serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
