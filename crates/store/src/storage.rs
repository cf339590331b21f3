//! Engine abstraction for aggregate rows and outbox staging.

use async_trait::async_trait;
use common::{AggregateId, Version};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::outbox::OutboxEntry;

/// One persisted aggregate, as stored.
///
/// The version column always holds the version after the last committed
/// mutation and is the single value the concurrency check compares
/// against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateRow {
    pub id: AggregateId,
    pub aggregate_type: String,
    pub state: serde_json::Value,
    pub version: Version,
}

/// Storage engine contract.
///
/// An engine provides transactions and the row-level operations the
/// [`crate::AggregateStore`] and [`crate::TransactionCoordinator`] are
/// built on. Writes are conditional on the stored version; the engine
/// reports how many rows matched and leaves the conflict decision to the
/// caller.
#[async_trait]
pub trait Storage: Send + Sync + 'static {
    /// An open transaction. All staged writes commit or roll back together.
    type Tx: Send;

    async fn begin(&self) -> Result<Self::Tx>;

    async fn commit(&self, tx: Self::Tx) -> Result<()>;

    async fn rollback(&self, tx: Self::Tx) -> Result<()>;

    /// Inserts a new aggregate row.
    ///
    /// Fails with [`crate::StoreError::AlreadyExists`] when a row with the
    /// same id is already present.
    async fn insert_row(&self, tx: &mut Self::Tx, row: &AggregateRow) -> Result<()>;

    /// Updates an aggregate row only if it currently holds `expected`.
    ///
    /// Returns the number of rows affected: 0 means the version check
    /// lost, 1 means the write went through.
    async fn update_row(
        &self,
        tx: &mut Self::Tx,
        row: &AggregateRow,
        expected: Version,
    ) -> Result<u64>;

    /// Deletes an aggregate row only if it currently holds `expected`.
    async fn delete_row(
        &self,
        tx: &mut Self::Tx,
        aggregate_type: &str,
        id: AggregateId,
        expected: Version,
    ) -> Result<u64>;

    /// Reads one aggregate row outside any transaction.
    async fn fetch_row(&self, aggregate_type: &str, id: AggregateId) -> Result<Option<AggregateRow>>;

    /// Stages outbox entries inside the transaction.
    ///
    /// The entries become visible to the relay only when the transaction
    /// commits; a rollback discards them together with the row write.
    async fn stage_outbox(&self, tx: &mut Self::Tx, entries: &[OutboxEntry]) -> Result<()>;
}
