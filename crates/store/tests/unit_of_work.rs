//! Multi-aggregate units of work over the in-memory engine.
//!
//! The canonical scenario: placing an order decrements stock on every
//! product it contains, and either all of it commits or none of it.

use std::sync::Arc;

use common::RequestContext;
use domain::{
    Aggregate, CustomerId, Money, Order, OrderError, OrderItem, OrderState, Product, ProductError,
};
use futures_util::FutureExt;
use store::{AggregateStore, InMemoryStorage, OutboxStore, StoreError, TransactionCoordinator};
use thiserror::Error;

#[derive(Debug, Error)]
enum CheckoutError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Order(#[from] OrderError),
    #[error(transparent)]
    Product(#[from] ProductError),
}

struct Harness {
    storage: Arc<InMemoryStorage>,
    store: Arc<AggregateStore<InMemoryStorage>>,
    coordinator: TransactionCoordinator<InMemoryStorage>,
}

fn harness() -> Harness {
    let storage = Arc::new(InMemoryStorage::new());
    Harness {
        storage: Arc::clone(&storage),
        store: Arc::new(AggregateStore::new(Arc::clone(&storage))),
        coordinator: TransactionCoordinator::new(storage),
    }
}

async fn seed_product(h: &Harness, sku: &str, stock: u32) -> Product {
    let mut product = Product::create(
        sku.into(),
        "Widget",
        Money::from_cents(500),
        stock,
        &RequestContext::empty(),
    )
    .unwrap();
    h.store.save(&mut product).await.unwrap();
    h.store.get_by_id(product.id()).await.unwrap().unwrap()
}

#[tokio::test]
async fn checkout_commits_order_and_stock_together() {
    let h = harness();
    let mut product = seed_product(&h, "SKU-1", 10).await;
    let product_id = product.id();

    let ctx = RequestContext::with_correlation("checkout-1");
    let store = Arc::clone(&h.store);
    let order_id = h
        .coordinator
        .run_in_transaction(move |tx| {
            async move {
                let mut order = Order::place(
                    CustomerId::new(),
                    vec![OrderItem::new("SKU-1", "Widget", 4, Money::from_cents(500))],
                    &ctx,
                )?;

                product.decrement_stock(4, &ctx)?;

                store.save_in(&mut order, tx).await?;
                store.save_in(&mut product, tx).await?;
                Ok::<_, CheckoutError>(order.id())
            }
            .boxed()
        })
        .await
        .unwrap();

    let order: Order = h.store.get_by_id(order_id).await.unwrap().unwrap();
    assert_eq!(order.item_count(), 1);

    let product: Product = h.store.get_by_id(product_id).await.unwrap().unwrap();
    assert_eq!(product.stock(), 6);

    // OrderPlaced + StockDecremented both staged.
    assert_eq!(h.storage.status_counts().await.unwrap().pending, 2);
}

#[tokio::test]
async fn insufficient_stock_rolls_back_the_whole_checkout() {
    let h = harness();
    let mut product = seed_product(&h, "SKU-1", 2).await;
    let product_id = product.id();
    let pending_before = h.storage.status_counts().await.unwrap().pending;

    let store = Arc::clone(&h.store);
    let result: Result<common::AggregateId, CheckoutError> = h
        .coordinator
        .run_in_transaction(move |tx| {
            async move {
                let mut order = Order::place(
                    CustomerId::new(),
                    vec![OrderItem::new("SKU-1", "Widget", 4, Money::from_cents(500))],
                    &RequestContext::empty(),
                )?;

                // The order row is written before the stock check fails.
                store.save_in(&mut order, tx).await?;
                product.decrement_stock(4, &RequestContext::empty())?;
                store.save_in(&mut product, tx).await?;
                Ok(order.id())
            }
            .boxed()
        })
        .await;

    assert!(matches!(
        result,
        Err(CheckoutError::Product(ProductError::InsufficientStock { .. }))
    ));

    // Nothing committed: no order row, untouched stock, no outbox entries.
    let product: Product = h.store.get_by_id(product_id).await.unwrap().unwrap();
    assert_eq!(product.stock(), 2);
    assert_eq!(
        h.storage.status_counts().await.unwrap().pending,
        pending_before
    );
    assert_eq!(h.storage.aggregate_count().await, 1);
}

#[tokio::test]
async fn conflict_on_the_second_save_rolls_back_the_first() {
    let h = harness();
    let mut product = seed_product(&h, "SKU-1", 10).await;
    let product_id = product.id();

    // Another request wins a restock before our checkout commits.
    let mut stale: Product = h.store.get_by_id(product_id).await.unwrap().unwrap();
    product.restock(5, &RequestContext::empty()).unwrap();
    h.store.save(&mut product).await.unwrap();
    let pending_before = h.storage.status_counts().await.unwrap().pending;

    let store = Arc::clone(&h.store);
    let result: Result<common::AggregateId, CheckoutError> = h
        .coordinator
        .run_in_transaction(move |tx| {
            async move {
                let mut order = Order::place(
                    CustomerId::new(),
                    vec![OrderItem::new("SKU-1", "Widget", 4, Money::from_cents(500))],
                    &RequestContext::empty(),
                )?;
                store.save_in(&mut order, tx).await?;

                // The stale stock row loses the version check.
                stale.decrement_stock(4, &RequestContext::empty())?;
                store.save_in(&mut stale, tx).await?;
                Ok(order.id())
            }
            .boxed()
        })
        .await;

    assert!(matches!(
        result,
        Err(CheckoutError::Store(StoreError::ConcurrencyConflict { .. }))
    ));

    // The order insert from the same unit is gone too.
    assert_eq!(h.storage.aggregate_count().await, 1);
    assert_eq!(
        h.storage.status_counts().await.unwrap().pending,
        pending_before
    );
    let current: Product = h.store.get_by_id(product_id).await.unwrap().unwrap();
    assert_eq!(current.stock(), 15);
}

#[tokio::test]
async fn commit_conflict_keeps_the_pending_buffer() {
    let h = harness();
    let mut order = Order::place(
        CustomerId::new(),
        vec![OrderItem::new("SKU-1", "Widget", 1, Money::from_cents(500))],
        &RequestContext::empty(),
    )
    .unwrap();
    let order_id = order.id();
    h.store.save(&mut order).await.unwrap();

    let mut loser: Order = h.store.get_by_id(order_id).await.unwrap().unwrap();
    loser
        .cancel("out of stock", &RequestContext::empty())
        .unwrap();
    let buffered = loser.pending().clone();

    // The cancel passes its version check at staging time; a fulfil
    // commits in between, so the unit's own commit loses the race.
    let store = Arc::clone(&h.store);
    let result: Result<(), CheckoutError> = h
        .coordinator
        .run_in_transaction(move |tx| {
            async move {
                store.save_in(&mut loser, tx).await?;

                let mut winner: Order = store.get_by_id(order_id).await?.unwrap();
                winner.fulfill(&RequestContext::empty())?;
                store.save(&mut winner).await?;
                Ok(())
            }
            .boxed()
        })
        .await;

    assert!(matches!(
        result,
        Err(CheckoutError::Store(StoreError::ConcurrencyConflict { .. }))
    ));

    // The rolled-back cancel is still buffered, not silently dropped.
    assert_eq!(buffered.len(), 1);

    let stored: Order = h.store.get_by_id(order_id).await.unwrap().unwrap();
    assert_eq!(stored.state(), OrderState::Fulfilled);
    assert_eq!(stored.version(), common::Version::new(2));
}

#[tokio::test]
async fn committed_unit_empties_every_pending_buffer() {
    let h = harness();
    let mut product = seed_product(&h, "SKU-1", 10).await;

    let mut order = Order::place(
        CustomerId::new(),
        vec![OrderItem::new("SKU-1", "Widget", 2, Money::from_cents(500))],
        &RequestContext::empty(),
    )
    .unwrap();
    let order_buffer = order.pending().clone();
    let product_buffer = product.pending().clone();

    let store = Arc::clone(&h.store);
    h.coordinator
        .run_in_transaction(move |tx| {
            async move {
                product.decrement_stock(2, &RequestContext::empty())?;
                store.save_in(&mut order, tx).await?;
                store.save_in(&mut product, tx).await?;
                Ok::<_, CheckoutError>(())
            }
            .boxed()
        })
        .await
        .unwrap();

    assert!(order_buffer.is_empty());
    assert!(product_buffer.is_empty());
}
