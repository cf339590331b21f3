//! Unit-of-work coordination across aggregates.

use std::sync::Arc;

use bus::EventPublisher;
use domain::{DomainEvent, PendingEvents};
use futures_util::future::BoxFuture;

use crate::error::StoreError;
use crate::storage::Storage;

/// An open unit of work.
///
/// Carries the engine transaction every write in the unit goes through,
/// the pending-event buffers to empty once the unit commits, and the
/// events to publish after commit when the store runs in direct mode.
/// Obtained from [`TransactionCoordinator::run_in_transaction`] and
/// passed to [`crate::AggregateStore::save_in`].
pub struct TxContext<S: Storage> {
    pub(crate) tx: S::Tx,
    pub(crate) post_commit: Vec<DomainEvent>,
    pub(crate) publisher: Option<Arc<dyn EventPublisher>>,
    pub(crate) flush_on_commit: Vec<PendingEvents>,
}

impl<S: Storage> TxContext<S> {
    pub(crate) fn new(tx: S::Tx) -> Self {
        Self {
            tx,
            post_commit: Vec::new(),
            publisher: None,
            flush_on_commit: Vec::new(),
        }
    }
}

/// Publishes events that were held back until their transaction committed.
///
/// Failures are logged and swallowed: the state change is already
/// durable and must not be reported as failed. Read models lag until
/// the aggregate is touched again.
pub(crate) async fn publish_after_commit(publisher: &dyn EventPublisher, events: &[DomainEvent]) {
    for event in events {
        if let Err(err) = publisher.publish(event).await {
            tracing::error!(
                event_id = %event.event_id,
                event_type = %event.event_type,
                error = %err,
                "post-commit publish failed, read models may be stale"
            );
            metrics::counter!("store_post_commit_publish_failures_total").increment(1);
        }
    }
}

/// Runs units of work: one transaction, any number of aggregates.
///
/// All writes made through the context commit or roll back together, so
/// a command spanning several aggregates (an order plus the stock rows
/// it reserves) stays atomic. Pending-event buffers are emptied and
/// direct-mode events go out only after the commit succeeds.
pub struct TransactionCoordinator<S: Storage> {
    storage: Arc<S>,
}

impl<S: Storage> TransactionCoordinator<S> {
    pub fn new(storage: Arc<S>) -> Self {
        Self { storage }
    }

    /// Runs `work` inside a transaction.
    ///
    /// Commits when `work` returns `Ok`, rolls back otherwise. The error
    /// type only has to be convertible from [`StoreError`] so domain
    /// errors flow out unchanged. A commit that loses a version race
    /// also surfaces as an error, with nothing applied and every saved
    /// aggregate's events still buffered.
    #[tracing::instrument(skip_all)]
    pub async fn run_in_transaction<T, E, F>(&self, work: F) -> Result<T, E>
    where
        T: Send,
        E: From<StoreError> + Send,
        F: for<'t> FnOnce(&'t mut TxContext<S>) -> BoxFuture<'t, Result<T, E>> + Send,
    {
        let tx = self.storage.begin().await.map_err(E::from)?;
        let mut ctx = TxContext::new(tx);

        match work(&mut ctx).await {
            Ok(value) => {
                let TxContext {
                    tx,
                    post_commit,
                    publisher,
                    flush_on_commit,
                } = ctx;
                self.storage.commit(tx).await.map_err(E::from)?;
                for buffer in &flush_on_commit {
                    buffer.clear();
                }
                if let Some(publisher) = publisher {
                    publish_after_commit(publisher.as_ref(), &post_commit).await;
                }
                Ok(value)
            }
            Err(err) => {
                let TxContext { tx, .. } = ctx;
                if let Err(rollback_err) = self.storage.rollback(tx).await {
                    tracing::error!(error = %rollback_err, "transaction rollback failed");
                }
                Err(err)
            }
        }
    }
}
