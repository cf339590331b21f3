//! Slow-path maintenance for the outbox.

use std::sync::Arc;

use chrono::Duration;
use store::{OutboxStore, Result};
use tokio::sync::watch;

/// What one sweep did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    /// Stuck `Processing` entries returned to `Pending`.
    pub reclaimed: u64,
    /// `Failed` entries with retries remaining returned to `Pending`.
    pub reset: u64,
    /// Old `Processed` entries deleted.
    pub purged: u64,
}

/// Periodic outbox maintenance.
///
/// Runs three repairs per pass: reclaims claims abandoned by dead
/// workers, resets retryable failures, and purges delivered entries
/// past retention. Entries that exhausted their retry budget are left
/// `Failed` for an operator to inspect.
pub struct OutboxSweeper<S: OutboxStore> {
    outbox: Arc<S>,
    max_retries: i32,
    claim_timeout: Duration,
    retention: Duration,
}

impl<S: OutboxStore> OutboxSweeper<S> {
    pub fn new(
        outbox: Arc<S>,
        max_retries: i32,
        claim_timeout: Duration,
        retention: Duration,
    ) -> Self {
        Self {
            outbox,
            max_retries,
            claim_timeout,
            retention,
        }
    }

    /// Runs one maintenance pass.
    #[tracing::instrument(skip(self))]
    pub async fn run_sweep(&self) -> Result<SweepStats> {
        let stats = SweepStats {
            reclaimed: self.outbox.reclaim_stuck(self.claim_timeout).await?,
            reset: self.outbox.reset_failed(self.max_retries).await?,
            purged: self.outbox.purge_processed(self.retention).await?,
        };

        if stats.reclaimed > 0 {
            metrics::counter!("sweeper_reclaimed_total").increment(stats.reclaimed);
        }
        if stats.reset > 0 {
            metrics::counter!("sweeper_reset_total").increment(stats.reset);
        }

        let counts = self.outbox.status_counts().await?;
        metrics::gauge!("outbox_pending").set(counts.pending as f64);
        metrics::gauge!("outbox_failed").set(counts.failed as f64);

        if stats != SweepStats::default() {
            tracing::info!(
                reclaimed = stats.reclaimed,
                reset = stats.reset,
                purged = stats.purged,
                pending = counts.pending,
                failed = counts.failed,
                "sweep finished"
            );
        }
        Ok(stats)
    }

    /// Sweeps until the shutdown flag flips.
    pub async fn run(
        &self,
        sweep_interval: std::time::Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(sweep_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = self.run_sweep().await {
                        tracing::error!(error = %err, "sweep failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        tracing::info!("sweeper shutting down");
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::RequestContext;
    use domain::DomainEvent;
    use domain::event::EventPayload;
    use serde::Serialize;
    use store::{InMemoryStorage, OutboxEntry, OutboxStatus, Storage};

    #[derive(Serialize)]
    struct Swept;

    impl EventPayload for Swept {
        fn event_type(&self) -> &'static str {
            "Swept"
        }
    }

    async fn seed_entry(storage: &InMemoryStorage) -> OutboxEntry {
        let event = DomainEvent::from_payload(
            common::AggregateId::new(),
            "Order",
            &Swept,
            &RequestContext::empty(),
        )
        .unwrap();
        let entry = OutboxEntry::from_event(&event).unwrap();
        let mut tx = storage.begin().await.unwrap();
        storage.stage_outbox(&mut tx, &[entry.clone()]).await.unwrap();
        storage.commit(tx).await.unwrap();
        entry
    }

    fn sweeper(storage: &Arc<InMemoryStorage>) -> OutboxSweeper<InMemoryStorage> {
        OutboxSweeper::new(
            Arc::clone(storage),
            3,
            Duration::zero(),
            Duration::hours(24),
        )
    }

    #[tokio::test]
    async fn abandoned_claim_is_reclaimed() {
        let storage = Arc::new(InMemoryStorage::new());
        let entry = seed_entry(&storage).await;
        assert!(storage.claim(entry.id).await.unwrap());

        let stats = sweeper(&storage).run_sweep().await.unwrap();
        assert_eq!(stats.reclaimed, 1);

        let stored = storage.get(entry.id).await.unwrap().unwrap();
        assert_eq!(stored.status, OutboxStatus::Pending);
    }

    #[tokio::test]
    async fn retryable_failure_is_reset_but_poison_stays_failed() {
        let storage = Arc::new(InMemoryStorage::new());
        let retryable = seed_entry(&storage).await;
        let poison = seed_entry(&storage).await;

        for _ in 0..3 {
            storage.claim(poison.id).await.unwrap();
            storage.mark_failed(poison.id, "permanent").await.unwrap();
            storage.reset_failed(3).await.unwrap();
        }

        storage.claim(retryable.id).await.unwrap();
        storage.mark_failed(retryable.id, "transient").await.unwrap();

        let stats = sweeper(&storage).run_sweep().await.unwrap();
        assert_eq!(stats.reset, 1);

        assert_eq!(
            storage.get(retryable.id).await.unwrap().unwrap().status,
            OutboxStatus::Pending
        );
        assert_eq!(
            storage.get(poison.id).await.unwrap().unwrap().status,
            OutboxStatus::Failed
        );
    }

    #[tokio::test]
    async fn delivered_entries_are_purged_after_retention() {
        let storage = Arc::new(InMemoryStorage::new());
        let entry = seed_entry(&storage).await;
        storage.claim(entry.id).await.unwrap();
        storage.mark_processed(entry.id).await.unwrap();

        // Within retention, kept.
        assert_eq!(sweeper(&storage).run_sweep().await.unwrap().purged, 0);

        let eager = OutboxSweeper::new(Arc::clone(&storage), 3, Duration::zero(), Duration::zero());
        assert_eq!(eager.run_sweep().await.unwrap().purged, 1);
        assert!(storage.get(entry.id).await.unwrap().is_none());
    }
}
