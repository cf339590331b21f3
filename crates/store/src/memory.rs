//! In-memory storage engine for tests and prototyping.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use common::{AggregateId, EventId, Version};
use tokio::sync::RwLock;

use crate::error::{Result, StoreError};
use crate::outbox::{OutboxEntry, OutboxStatus, OutboxStore, StatusCounts};
use crate::storage::{AggregateRow, Storage};

#[derive(Default)]
struct MemoryInner {
    aggregates: HashMap<AggregateId, AggregateRow>,
    outbox: Vec<OutboxEntry>,
}

#[derive(Debug, Clone)]
enum StagedOp {
    Insert(AggregateRow),
    Update {
        row: AggregateRow,
        expected: Version,
    },
    Delete {
        aggregate_type: String,
        id: AggregateId,
        expected: Version,
    },
    Outbox(Vec<OutboxEntry>),
}

/// A staged set of writes, applied atomically on commit.
pub struct MemoryTx {
    ops: Vec<StagedOp>,
}

/// Hash-map backed engine with the same transactional semantics as the
/// Postgres implementation.
///
/// Writes are staged per transaction and applied under one lock at
/// commit, where every version check is re-verified. Two transactions
/// racing on the same aggregate therefore resolve exactly as they do in
/// Postgres: one commits, the other gets a concurrency conflict.
#[derive(Clone, Default)]
pub struct InMemoryStorage {
    inner: Arc<RwLock<MemoryInner>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored aggregates. Test helper.
    pub async fn aggregate_count(&self) -> usize {
        self.inner.read().await.aggregates.len()
    }
}

fn verify(inner: &MemoryInner, op: &StagedOp) -> Result<()> {
    match op {
        StagedOp::Insert(row) => {
            if inner.aggregates.contains_key(&row.id) {
                return Err(StoreError::AlreadyExists(row.id));
            }
        }
        StagedOp::Update { row, expected } => {
            let current = inner
                .aggregates
                .get(&row.id)
                .filter(|r| r.aggregate_type == row.aggregate_type);
            if current.map(|r| r.version) != Some(*expected) {
                return Err(StoreError::ConcurrencyConflict {
                    aggregate_id: row.id,
                    expected: *expected,
                });
            }
        }
        StagedOp::Delete {
            aggregate_type,
            id,
            expected,
        } => {
            let current = inner
                .aggregates
                .get(id)
                .filter(|r| &r.aggregate_type == aggregate_type);
            if current.map(|r| r.version) != Some(*expected) {
                return Err(StoreError::ConcurrencyConflict {
                    aggregate_id: *id,
                    expected: *expected,
                });
            }
        }
        StagedOp::Outbox(_) => {}
    }
    Ok(())
}

#[async_trait]
impl Storage for InMemoryStorage {
    type Tx = MemoryTx;

    async fn begin(&self) -> Result<Self::Tx> {
        Ok(MemoryTx { ops: Vec::new() })
    }

    async fn commit(&self, tx: Self::Tx) -> Result<()> {
        let mut inner = self.inner.write().await;

        // Checks made while the transaction was open may have gone stale.
        for op in &tx.ops {
            verify(&inner, op)?;
        }

        for op in tx.ops {
            match op {
                StagedOp::Insert(row) | StagedOp::Update { row, .. } => {
                    inner.aggregates.insert(row.id, row);
                }
                StagedOp::Delete { id, .. } => {
                    inner.aggregates.remove(&id);
                }
                StagedOp::Outbox(entries) => {
                    inner.outbox.extend(entries);
                }
            }
        }
        Ok(())
    }

    async fn rollback(&self, tx: Self::Tx) -> Result<()> {
        drop(tx);
        Ok(())
    }

    async fn insert_row(&self, tx: &mut Self::Tx, row: &AggregateRow) -> Result<()> {
        let inner = self.inner.read().await;
        verify(&inner, &StagedOp::Insert(row.clone()))?;
        tx.ops.push(StagedOp::Insert(row.clone()));
        Ok(())
    }

    async fn update_row(
        &self,
        tx: &mut Self::Tx,
        row: &AggregateRow,
        expected: Version,
    ) -> Result<u64> {
        let op = StagedOp::Update {
            row: row.clone(),
            expected,
        };
        let inner = self.inner.read().await;
        if verify(&inner, &op).is_err() {
            return Ok(0);
        }
        tx.ops.push(op);
        Ok(1)
    }

    async fn delete_row(
        &self,
        tx: &mut Self::Tx,
        aggregate_type: &str,
        id: AggregateId,
        expected: Version,
    ) -> Result<u64> {
        let op = StagedOp::Delete {
            aggregate_type: aggregate_type.to_string(),
            id,
            expected,
        };
        let inner = self.inner.read().await;
        if verify(&inner, &op).is_err() {
            return Ok(0);
        }
        tx.ops.push(op);
        Ok(1)
    }

    async fn fetch_row(
        &self,
        aggregate_type: &str,
        id: AggregateId,
    ) -> Result<Option<AggregateRow>> {
        let inner = self.inner.read().await;
        Ok(inner
            .aggregates
            .get(&id)
            .filter(|r| r.aggregate_type == aggregate_type)
            .cloned())
    }

    async fn stage_outbox(&self, tx: &mut Self::Tx, entries: &[OutboxEntry]) -> Result<()> {
        tx.ops.push(StagedOp::Outbox(entries.to_vec()));
        Ok(())
    }
}

#[async_trait]
impl OutboxStore for InMemoryStorage {
    async fn fetch_pending(&self, limit: i64) -> Result<Vec<OutboxEntry>> {
        let inner = self.inner.read().await;
        let mut pending: Vec<OutboxEntry> = inner
            .outbox
            .iter()
            .filter(|e| e.status == OutboxStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by_key(|e| e.created_at);
        pending.truncate(limit.max(0) as usize);
        Ok(pending)
    }

    async fn claim(&self, id: EventId) -> Result<bool> {
        let mut inner = self.inner.write().await;
        match inner
            .outbox
            .iter_mut()
            .find(|e| e.id == id && e.status == OutboxStatus::Pending)
        {
            Some(entry) => {
                entry.status = OutboxStatus::Processing;
                entry.claimed_at = Some(Utc::now());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn mark_processed(&self, id: EventId) -> Result<()> {
        let mut inner = self.inner.write().await;
        // Only a live claim may acknowledge; a worker whose claim was
        // reclaimed has lost the right to move this entry.
        if let Some(entry) = inner
            .outbox
            .iter_mut()
            .find(|e| e.id == id && e.status == OutboxStatus::Processing)
        {
            entry.status = OutboxStatus::Processed;
            entry.processed_at = Some(Utc::now());
            entry.claimed_at = None;
            entry.last_error = None;
        }
        Ok(())
    }

    async fn mark_failed(&self, id: EventId, error: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        if let Some(entry) = inner
            .outbox
            .iter_mut()
            .find(|e| e.id == id && e.status == OutboxStatus::Processing)
        {
            entry.status = OutboxStatus::Failed;
            entry.retry_count += 1;
            entry.last_error = Some(error.to_string());
            entry.claimed_at = None;
        }
        Ok(())
    }

    async fn reset_failed(&self, max_retries: i32) -> Result<u64> {
        let mut inner = self.inner.write().await;
        let mut reset = 0;
        for entry in inner
            .outbox
            .iter_mut()
            .filter(|e| e.status == OutboxStatus::Failed && e.retry_count < max_retries)
        {
            entry.status = OutboxStatus::Pending;
            reset += 1;
        }
        Ok(reset)
    }

    async fn reclaim_stuck(&self, claim_timeout: Duration) -> Result<u64> {
        let cutoff = Utc::now() - claim_timeout;
        let mut inner = self.inner.write().await;
        let mut reclaimed = 0;
        for entry in inner.outbox.iter_mut().filter(|e| {
            e.status == OutboxStatus::Processing && e.claimed_at.is_some_and(|at| at < cutoff)
        }) {
            entry.status = OutboxStatus::Pending;
            entry.claimed_at = None;
            reclaimed += 1;
        }
        Ok(reclaimed)
    }

    async fn purge_processed(&self, retention: Duration) -> Result<u64> {
        let cutoff = Utc::now() - retention;
        let mut inner = self.inner.write().await;
        let before = inner.outbox.len();
        inner.outbox.retain(|e| {
            !(e.status == OutboxStatus::Processed && e.processed_at.is_some_and(|at| at < cutoff))
        });
        Ok((before - inner.outbox.len()) as u64)
    }

    async fn get(&self, id: EventId) -> Result<Option<OutboxEntry>> {
        let inner = self.inner.read().await;
        Ok(inner.outbox.iter().find(|e| e.id == id).cloned())
    }

    async fn status_counts(&self) -> Result<StatusCounts> {
        let inner = self.inner.read().await;
        let mut counts = StatusCounts::default();
        for entry in &inner.outbox {
            match entry.status {
                OutboxStatus::Pending => counts.pending += 1,
                OutboxStatus::Processing => counts.processing += 1,
                OutboxStatus::Processed => counts.processed += 1,
                OutboxStatus::Failed => counts.failed += 1,
            }
        }
        Ok(counts)
    }
}
