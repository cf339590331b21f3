//! The relay loop: claim, publish, acknowledge.

use std::sync::Arc;

use bus::EventPublisher;
use store::{OutboxStore, Result};
use tokio::sync::watch;

/// What one relay cycle did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleStats {
    /// Pending entries returned by the poll.
    pub fetched: usize,
    /// Entries published and marked processed.
    pub published: usize,
    /// Entries whose publish failed and were marked failed.
    pub failed: usize,
    /// Entries another worker claimed between poll and claim.
    pub skipped: usize,
}

/// Drains the outbox onto the bus.
///
/// Each entry is claimed before publishing, so several relay instances
/// can poll the same table without double-publishing. Delivery is
/// at-least-once: a crash after publish but before the acknowledgement
/// leaves the entry claimed, and the sweeper will eventually return it
/// for another round. Handlers deduplicate on the event id.
pub struct OutboxRelay<S: OutboxStore> {
    outbox: Arc<S>,
    publisher: Arc<dyn EventPublisher>,
    batch_size: i64,
}

impl<S: OutboxStore> OutboxRelay<S> {
    pub fn new(outbox: Arc<S>, publisher: Arc<dyn EventPublisher>, batch_size: i64) -> Self {
        Self {
            outbox,
            publisher,
            batch_size,
        }
    }

    /// Runs one poll-claim-publish cycle.
    #[tracing::instrument(skip(self))]
    pub async fn run_cycle(&self) -> Result<CycleStats> {
        let started = std::time::Instant::now();
        let pending = self.outbox.fetch_pending(self.batch_size).await?;
        let mut stats = CycleStats {
            fetched: pending.len(),
            ..CycleStats::default()
        };

        for entry in pending {
            if !self.outbox.claim(entry.id).await? {
                stats.skipped += 1;
                continue;
            }

            let event = match entry.to_event() {
                Ok(event) => event,
                Err(err) => {
                    // Unreadable payload; park it, retries will not help
                    // but the failure stays visible with its error.
                    tracing::error!(
                        entry_id = %entry.id,
                        error = %err,
                        "outbox payload failed to deserialize"
                    );
                    self.outbox
                        .mark_failed(entry.id, &format!("payload deserialize: {err}"))
                        .await?;
                    stats.failed += 1;
                    continue;
                }
            };

            match self.publisher.publish(&event).await {
                Ok(()) => {
                    self.outbox.mark_processed(entry.id).await?;
                    metrics::counter!("relay_published_total").increment(1);
                    stats.published += 1;
                }
                Err(err) => {
                    tracing::warn!(
                        entry_id = %entry.id,
                        event_type = %entry.event_type,
                        retry_count = entry.retry_count,
                        error = %err,
                        "publish failed, entry marked for retry"
                    );
                    self.outbox.mark_failed(entry.id, &err.to_string()).await?;
                    metrics::counter!("relay_publish_failures_total").increment(1);
                    stats.failed += 1;
                }
            }
        }

        metrics::histogram!("relay_cycle_duration_seconds").record(started.elapsed().as_secs_f64());

        if stats != CycleStats::default() {
            tracing::debug!(
                fetched = stats.fetched,
                published = stats.published,
                failed = stats.failed,
                skipped = stats.skipped,
                "relay cycle finished"
            );
        }
        Ok(stats)
    }

    /// Polls until the shutdown flag flips.
    pub async fn run(
        &self,
        poll_interval: std::time::Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = self.run_cycle().await {
                        tracing::error!(error = %err, "relay cycle failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        tracing::info!("relay shutting down");
                        break;
                    }
                }
            }
        }
    }
}
