//! Order summary read model.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::AggregateId;
use domain::{CustomerId, Money, ORDER_EVENT_TYPES, OrderEvent, OrderState};
use tokio::sync::RwLock;

use crate::Result;
use crate::projection::Projection;

/// One order as the view sees it.
#[derive(Debug, Clone)]
pub struct OrderSummary {
    pub order_id: AggregateId,
    pub customer_id: CustomerId,
    pub state: OrderState,
    pub item_count: usize,
    pub total_amount: Money,
    pub placed_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Per-order summaries with a derived open-revenue figure.
///
/// The open-revenue total is computed lazily and cached; any applied
/// event invalidates the cache, so queries never see a figure that
/// predates the last write.
#[derive(Clone, Default)]
pub struct OrderSummaryView {
    orders: Arc<RwLock<HashMap<AggregateId, OrderSummary>>>,
    open_revenue_cache: Arc<RwLock<Option<Money>>>,
}

impl OrderSummaryView {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, order_id: AggregateId) -> Option<OrderSummary> {
        self.orders.read().await.get(&order_id).cloned()
    }

    pub async fn by_customer(&self, customer_id: CustomerId) -> Vec<OrderSummary> {
        self.orders
            .read()
            .await
            .values()
            .filter(|o| o.customer_id == customer_id)
            .cloned()
            .collect()
    }

    pub async fn by_state(&self, state: OrderState) -> Vec<OrderSummary> {
        self.orders
            .read()
            .await
            .values()
            .filter(|o| o.state == state)
            .cloned()
            .collect()
    }

    pub async fn count(&self) -> usize {
        self.orders.read().await.len()
    }

    /// Total value of all open orders.
    pub async fn open_revenue(&self) -> Money {
        if let Some(cached) = *self.open_revenue_cache.read().await {
            return cached;
        }

        let total = self
            .orders
            .read()
            .await
            .values()
            .filter(|o| o.state == OrderState::Open)
            .fold(Money::zero(), |acc, o| acc + o.total_amount);

        *self.open_revenue_cache.write().await = Some(total);
        total
    }

    async fn invalidate_cache(&self) {
        *self.open_revenue_cache.write().await = None;
    }
}

#[async_trait]
impl Projection for OrderSummaryView {
    fn name(&self) -> &'static str {
        "OrderSummaryView"
    }

    fn event_types(&self) -> &'static [&'static str] {
        ORDER_EVENT_TYPES
    }

    async fn apply(&self, event: &domain::DomainEvent) -> Result<()> {
        let order_event: OrderEvent = event.typed_payload()?;
        let order_id = event.aggregate_id;

        {
            let mut orders = self.orders.write().await;
            match order_event {
                OrderEvent::OrderPlaced(data) => {
                    orders.insert(
                        order_id,
                        OrderSummary {
                            order_id,
                            customer_id: data.customer_id,
                            state: OrderState::Open,
                            item_count: data.items.len(),
                            total_amount: data.total_amount,
                            placed_at: data.placed_at,
                            updated_at: event.occurred_at,
                        },
                    );
                }
                OrderEvent::OrderItemAdded(data) => {
                    if let Some(order) = orders.get_mut(&order_id) {
                        order.item_count += 1;
                        order.total_amount = data.total_amount;
                        order.updated_at = event.occurred_at;
                    }
                }
                OrderEvent::OrderItemRemoved(data) => {
                    if let Some(order) = orders.get_mut(&order_id) {
                        order.item_count = order.item_count.saturating_sub(1);
                        order.total_amount = data.total_amount;
                        order.updated_at = event.occurred_at;
                    }
                }
                OrderEvent::OrderFulfilled(data) => {
                    if let Some(order) = orders.get_mut(&order_id) {
                        order.state = OrderState::Fulfilled;
                        order.updated_at = data.fulfilled_at;
                    }
                }
                OrderEvent::OrderCancelled(data) => {
                    if let Some(order) = orders.get_mut(&order_id) {
                        order.state = OrderState::Cancelled;
                        order.updated_at = data.cancelled_at;
                    }
                }
            }
        }

        self.invalidate_cache().await;
        Ok(())
    }

    async fn reset(&self) {
        self.orders.write().await.clear();
        self.invalidate_cache().await;
    }
}
