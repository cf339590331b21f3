//! The aggregate store: versioned reads and conditional writes.

use std::sync::Arc;

use bus::EventPublisher;
use common::{AggregateId, Version};
use domain::Aggregate;

use crate::coordinator::{TxContext, publish_after_commit};
use crate::error::{Result, StoreError};
use crate::outbox::OutboxEntry;
use crate::storage::{AggregateRow, Storage};

/// How a save makes its events visible to subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PersistenceMode {
    /// Events are published on the bus right after the commit.
    ///
    /// Lower latency, but a crash between commit and publish loses the
    /// notification. Use only where read models tolerate that gap.
    Direct,

    /// Events are written to the outbox inside the same transaction and
    /// published later by the relay. A committed state change is never
    /// observed without its events eventually following.
    #[default]
    Outbox,
}

enum Delivery {
    Outbox,
    Direct(Arc<dyn EventPublisher>),
}

/// Persists aggregates as versioned state rows.
///
/// Every save is conditional on the stored version matching the version
/// the aggregate was loaded at. A lost check surfaces as
/// [`StoreError::ConcurrencyConflict`] and is never retried here; the
/// command layer reloads and re-runs, because the conflicting commit may
/// have changed the outcome of domain validation.
pub struct AggregateStore<S: Storage> {
    storage: Arc<S>,
    delivery: Delivery,
}

impl<S: Storage> AggregateStore<S> {
    /// Creates a store in the default outbox mode.
    pub fn new(storage: Arc<S>) -> Self {
        Self {
            storage,
            delivery: Delivery::Outbox,
        }
    }

    /// Creates a store in direct mode.
    ///
    /// Direct mode cannot exist without a publisher: committed events
    /// must always have somewhere to go, so the publisher is part of
    /// the constructor rather than an optional attachment.
    pub fn direct(storage: Arc<S>, publisher: Arc<dyn EventPublisher>) -> Self {
        Self {
            storage,
            delivery: Delivery::Direct(publisher),
        }
    }

    pub fn mode(&self) -> PersistenceMode {
        match self.delivery {
            Delivery::Outbox => PersistenceMode::Outbox,
            Delivery::Direct(_) => PersistenceMode::Direct,
        }
    }

    /// Loads an aggregate by id.
    ///
    /// The version column is authoritative: it overwrites whatever the
    /// serialized state carried.
    #[tracing::instrument(skip(self), fields(aggregate_type = A::aggregate_type()))]
    pub async fn get_by_id<A: Aggregate>(&self, id: AggregateId) -> Result<Option<A>> {
        let Some(row) = self.storage.fetch_row(A::aggregate_type(), id).await? else {
            return Ok(None);
        };
        let mut aggregate: A = serde_json::from_value(row.state)?;
        aggregate.set_version(row.version);
        Ok(Some(aggregate))
    }

    /// Persists an aggregate inside an open unit of work.
    ///
    /// A save with no pending events is a no-op. Otherwise the row is
    /// inserted (never persisted before) or conditionally updated and
    /// the events are staged per the persistence mode. The pending
    /// buffer is emptied when the unit of work commits; a rollback
    /// leaves it intact, so a retried save cannot silently drop the
    /// mutation.
    pub async fn save_in<A: Aggregate>(
        &self,
        aggregate: &mut A,
        ctx: &mut TxContext<S>,
    ) -> Result<()> {
        let events = aggregate.pending_events();
        if events.is_empty() {
            tracing::debug!(
                aggregate_id = %aggregate.id(),
                "save with no pending events, nothing to do"
            );
            return Ok(());
        }

        // The version the row last committed at. Every pending event
        // bumped the in-memory version by one past it.
        let expected = Version::new(aggregate.version().as_i64() - events.len() as i64);
        let row = AggregateRow {
            id: aggregate.id(),
            aggregate_type: A::aggregate_type().to_string(),
            state: serde_json::to_value(&*aggregate)?,
            version: aggregate.version(),
        };

        if expected == Version::initial() {
            self.storage.insert_row(&mut ctx.tx, &row).await?;
        } else {
            let affected = self.storage.update_row(&mut ctx.tx, &row, expected).await?;
            if affected == 0 {
                metrics::counter!("store_concurrency_conflicts_total").increment(1);
                tracing::warn!(
                    aggregate_id = %row.id,
                    aggregate_type = %row.aggregate_type,
                    expected = %expected,
                    "concurrency conflict, aggregate was modified since load"
                );
                return Err(StoreError::ConcurrencyConflict {
                    aggregate_id: row.id,
                    expected,
                });
            }
        }

        match &self.delivery {
            Delivery::Outbox => {
                let entries = events
                    .iter()
                    .map(OutboxEntry::from_event)
                    .collect::<Result<Vec<_>>>()?;
                self.storage.stage_outbox(&mut ctx.tx, &entries).await?;
            }
            Delivery::Direct(publisher) => {
                ctx.post_commit.extend(events);
                ctx.publisher.get_or_insert_with(|| Arc::clone(publisher));
            }
        }

        ctx.flush_on_commit.push(aggregate.pending().clone());
        Ok(())
    }

    /// Persists one aggregate in its own transaction.
    #[tracing::instrument(skip_all, fields(aggregate_type = A::aggregate_type(), aggregate_id = %aggregate.id()))]
    pub async fn save<A: Aggregate>(&self, aggregate: &mut A) -> Result<()> {
        let tx = self.storage.begin().await?;
        let mut ctx = TxContext::new(tx);

        match self.save_in(aggregate, &mut ctx).await {
            Ok(()) => {
                let TxContext {
                    tx,
                    post_commit,
                    publisher,
                    flush_on_commit,
                } = ctx;
                self.storage.commit(tx).await?;
                for buffer in &flush_on_commit {
                    buffer.clear();
                }
                if let Some(publisher) = publisher {
                    publish_after_commit(publisher.as_ref(), &post_commit).await;
                }
                Ok(())
            }
            Err(err) => {
                let TxContext { tx, .. } = ctx;
                if let Err(rollback_err) = self.storage.rollback(tx).await {
                    tracing::error!(error = %rollback_err, "rollback failed after save error");
                }
                Err(err)
            }
        }
    }

    /// Deletes an aggregate inside an open unit of work.
    ///
    /// Conditional on the stored version, like any other write: deleting
    /// a copy someone else has since modified is a conflict.
    pub async fn delete_in<A: Aggregate>(
        &self,
        aggregate: &A,
        ctx: &mut TxContext<S>,
    ) -> Result<()> {
        let expected =
            Version::new(aggregate.version().as_i64() - aggregate.pending_events().len() as i64);
        let affected = self
            .storage
            .delete_row(&mut ctx.tx, A::aggregate_type(), aggregate.id(), expected)
            .await?;
        if affected == 0 {
            return Err(StoreError::ConcurrencyConflict {
                aggregate_id: aggregate.id(),
                expected,
            });
        }
        Ok(())
    }

    /// Deletes one aggregate in its own transaction.
    pub async fn delete<A: Aggregate>(&self, aggregate: &A) -> Result<()> {
        let tx = self.storage.begin().await?;
        let mut ctx = TxContext::new(tx);

        match self.delete_in(aggregate, &mut ctx).await {
            Ok(()) => {
                let TxContext { tx, .. } = ctx;
                self.storage.commit(tx).await
            }
            Err(err) => {
                let TxContext { tx, .. } = ctx;
                if let Err(rollback_err) = self.storage.rollback(tx).await {
                    tracing::error!(error = %rollback_err, "rollback failed after delete error");
                }
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryStorage;
    use crate::outbox::{OutboxStatus, OutboxStore};
    use async_trait::async_trait;
    use bus::{EventBus, EventHandler, HandlerError};
    use common::RequestContext;
    use domain::DomainEvent;
    use domain::order::{CustomerId, Money, Order, OrderItem};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn widget() -> OrderItem {
        OrderItem::new("SKU-1", "Widget", 2, Money::from_cents(500))
    }

    fn place_order() -> Order {
        Order::place(CustomerId::new(), vec![widget()], &RequestContext::empty()).unwrap()
    }

    fn outbox_store() -> (Arc<InMemoryStorage>, AggregateStore<InMemoryStorage>) {
        let storage = Arc::new(InMemoryStorage::new());
        let store = AggregateStore::new(Arc::clone(&storage));
        (storage, store)
    }

    struct CountingHandler {
        count: AtomicUsize,
    }

    #[async_trait]
    impl EventHandler for CountingHandler {
        fn name(&self) -> &'static str {
            "CountingHandler"
        }

        async fn handle(&self, _event: &DomainEvent) -> std::result::Result<(), HandlerError> {
            self.count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn save_and_reload_preserves_state_and_version() {
        let (_, store) = outbox_store();
        let mut order = place_order();
        let id = order.id();

        store.save(&mut order).await.unwrap();
        assert!(order.pending_events().is_empty());

        let loaded: Order = store.get_by_id(id).await.unwrap().unwrap();
        assert_eq!(loaded.version(), Version::new(1));
        assert_eq!(loaded.item_count(), 1);
        assert!(loaded.pending_events().is_empty());
    }

    #[tokio::test]
    async fn get_by_id_returns_none_for_unknown_aggregate() {
        let (_, store) = outbox_store();
        let loaded: Option<Order> = store.get_by_id(AggregateId::new()).await.unwrap();
        assert!(loaded.is_none());
    }

    #[tokio::test]
    async fn save_with_no_pending_events_is_a_noop() {
        let (storage, store) = outbox_store();
        let mut order = place_order();
        store.save(&mut order).await.unwrap();

        store.save(&mut order).await.unwrap();
        assert_eq!(storage.status_counts().await.unwrap().pending, 1);
    }

    #[tokio::test]
    async fn outbox_mode_stages_one_entry_per_event() {
        let (storage, store) = outbox_store();
        let mut order = place_order();
        let event_id = order.pending_events()[0].event_id;

        store.save(&mut order).await.unwrap();

        let entry = storage.get(event_id).await.unwrap().unwrap();
        assert_eq!(entry.status, OutboxStatus::Pending);
        assert_eq!(entry.event_type, "OrderPlaced");
        assert_eq!(entry.aggregate_id, order.id());
    }

    #[tokio::test]
    async fn stale_copy_save_is_a_conflict() {
        let (_, store) = outbox_store();
        let mut order = place_order();
        let id = order.id();
        store.save(&mut order).await.unwrap();

        let mut fresh: Order = store.get_by_id(id).await.unwrap().unwrap();
        let mut stale: Order = store.get_by_id(id).await.unwrap().unwrap();

        fresh
            .add_item(
                OrderItem::new("SKU-2", "Gadget", 1, Money::from_cents(900)),
                &RequestContext::empty(),
            )
            .unwrap();
        store.save(&mut fresh).await.unwrap();

        stale
            .add_item(
                OrderItem::new("SKU-3", "Gizmo", 1, Money::from_cents(700)),
                &RequestContext::empty(),
            )
            .unwrap();
        let err = store.save(&mut stale).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::ConcurrencyConflict {
                aggregate_id,
                expected,
            } if aggregate_id == id && expected == Version::new(1)
        ));

        // The loser keeps its event buffered for a reload-and-retry.
        assert_eq!(stale.pending_events().len(), 1);

        // The winner's write is intact.
        let loaded: Order = store.get_by_id(id).await.unwrap().unwrap();
        assert_eq!(loaded.version(), Version::new(2));
        assert_eq!(loaded.item_count(), 2);
    }

    #[tokio::test]
    async fn conflicting_save_stages_no_outbox_entries() {
        let (storage, store) = outbox_store();
        let mut order = place_order();
        let id = order.id();
        store.save(&mut order).await.unwrap();

        let mut fresh: Order = store.get_by_id(id).await.unwrap().unwrap();
        let mut stale: Order = store.get_by_id(id).await.unwrap().unwrap();
        fresh.fulfill(&RequestContext::empty()).unwrap();
        store.save(&mut fresh).await.unwrap();

        stale.cancel("changed my mind", &RequestContext::empty()).unwrap();
        assert!(store.save(&mut stale).await.is_err());

        // Only OrderPlaced and OrderFulfilled made it out.
        let counts = storage.status_counts().await.unwrap();
        assert_eq!(counts.pending, 2);
    }

    #[tokio::test]
    async fn duplicate_insert_is_already_exists() {
        let (_, store) = outbox_store();
        let mut order = place_order();
        store.save(&mut order).await.unwrap();

        // Forge an aggregate that believes it was never persisted but
        // collides with the existing row's id.
        let mut duplicate: Order = store.get_by_id(order.id()).await.unwrap().unwrap();
        duplicate.fulfill(&RequestContext::empty()).unwrap();
        duplicate.set_version(Version::new(1));
        let err = store.save(&mut duplicate).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(id) if id == order.id()));
    }

    #[tokio::test]
    async fn delete_requires_current_version() {
        let (_, store) = outbox_store();
        let mut order = place_order();
        let id = order.id();
        store.save(&mut order).await.unwrap();

        let stale: Order = store.get_by_id(id).await.unwrap().unwrap();
        let mut fresh: Order = store.get_by_id(id).await.unwrap().unwrap();
        fresh.fulfill(&RequestContext::empty()).unwrap();
        store.save(&mut fresh).await.unwrap();

        let err = store.delete(&stale).await.unwrap_err();
        assert!(matches!(err, StoreError::ConcurrencyConflict { .. }));

        store.delete(&fresh).await.unwrap();
        let gone: Option<Order> = store.get_by_id(id).await.unwrap();
        assert!(gone.is_none());
    }

    #[tokio::test]
    async fn direct_mode_stages_nothing_in_the_outbox() {
        let storage = Arc::new(InMemoryStorage::new());
        let store = AggregateStore::direct(Arc::clone(&storage), Arc::new(EventBus::new()));
        assert_eq!(store.mode(), PersistenceMode::Direct);

        let mut order = place_order();
        store.save(&mut order).await.unwrap();

        assert_eq!(storage.status_counts().await.unwrap().pending, 0);
        let loaded: Order = store.get_by_id(order.id()).await.unwrap().unwrap();
        assert_eq!(loaded.version(), Version::new(1));
    }

    #[tokio::test]
    async fn direct_mode_publishes_after_commit() {
        let storage = Arc::new(InMemoryStorage::new());
        let bus = Arc::new(EventBus::new());
        let handler = Arc::new(CountingHandler {
            count: AtomicUsize::new(0),
        });
        bus.subscribe("OrderPlaced", handler.clone()).await;

        let store = AggregateStore::direct(storage, bus);
        let mut order = place_order();
        store.save(&mut order).await.unwrap();

        assert_eq!(handler.count.load(Ordering::SeqCst), 1);
        assert!(order.pending_events().is_empty());
    }
}
