//! Order aggregate implementation.

use std::collections::HashMap;

use chrono::Utc;
use common::{AggregateId, RequestContext, Version};
use serde::{Deserialize, Serialize};

use crate::aggregate::{Aggregate, AggregateRoot, PendingEvents};

use super::{
    CustomerId, Money, OrderError, OrderEvent, OrderItem, OrderState, ProductId,
    events::{
        OrderCancelledData, OrderFulfilledData, OrderItemAddedData, OrderItemRemovedData,
        OrderPlacedData,
    },
};

/// Order aggregate root.
///
/// Every command validates its invariants first and fails without side
/// effects; on success it records exactly one event (bumping the version)
/// and then applies the state change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    root: AggregateRoot,

    /// Customer who placed the order.
    customer_id: CustomerId,

    /// Current lifecycle state.
    state: OrderState,

    /// Items in the order, keyed by product ID.
    items: HashMap<ProductId, OrderItem>,

    /// Total amount of the order.
    total_amount: Money,
}

impl Aggregate for Order {
    fn aggregate_type() -> &'static str {
        "Order"
    }

    fn id(&self) -> AggregateId {
        self.root.id()
    }

    fn version(&self) -> Version {
        self.root.version()
    }

    fn set_version(&mut self, version: Version) {
        self.root.set_version(version);
    }

    fn pending(&self) -> &PendingEvents {
        self.root.pending()
    }
}

// Query methods
impl Order {
    /// Returns the customer ID.
    pub fn customer_id(&self) -> CustomerId {
        self.customer_id
    }

    /// Returns the current state.
    pub fn state(&self) -> OrderState {
        self.state
    }

    /// Returns all items in the order.
    pub fn items(&self) -> impl Iterator<Item = &OrderItem> {
        self.items.values()
    }

    /// Returns an item by product ID.
    pub fn get_item(&self, product_id: &ProductId) -> Option<&OrderItem> {
        self.items.get(product_id)
    }

    /// Returns the number of items.
    pub fn item_count(&self) -> usize {
        self.items.len()
    }

    /// Returns the total amount.
    pub fn total_amount(&self) -> Money {
        self.total_amount
    }

    /// Returns true if the order has items.
    pub fn has_items(&self) -> bool {
        !self.items.is_empty()
    }
}

// Command methods
impl Order {
    /// Places a new order. The factory: version 0 -> 1, one event buffered.
    pub fn place(
        customer_id: CustomerId,
        items: Vec<OrderItem>,
        ctx: &RequestContext,
    ) -> Result<Order, OrderError> {
        if items.is_empty() {
            return Err(OrderError::NoItems);
        }
        for item in &items {
            Self::validate_item(item)?;
        }

        let order_id = AggregateId::new();
        let total_amount = items
            .iter()
            .fold(Money::zero(), |acc, item| acc + item.total_price());
        let item_map: HashMap<ProductId, OrderItem> = items
            .iter()
            .cloned()
            .map(|item| (item.product_id.clone(), item))
            .collect();

        let mut order = Order {
            root: AggregateRoot::new(order_id),
            customer_id,
            state: OrderState::Open,
            items: item_map,
            total_amount,
        };

        order.root.record(
            Self::aggregate_type(),
            &OrderEvent::OrderPlaced(OrderPlacedData {
                order_id,
                customer_id,
                items,
                total_amount,
                placed_at: Utc::now(),
            }),
            ctx,
        )?;

        Ok(order)
    }

    /// Adds an item to the order.
    pub fn add_item(&mut self, item: OrderItem, ctx: &RequestContext) -> Result<(), OrderError> {
        if !self.state.can_modify_items() {
            return Err(OrderError::InvalidStateTransition {
                current_state: self.state,
                action: "add an item to",
            });
        }
        Self::validate_item(&item)?;
        if self.items.contains_key(&item.product_id) {
            return Err(OrderError::ItemAlreadyPresent {
                product_id: item.product_id.to_string(),
            });
        }

        let new_total = self.total_amount + item.total_price();
        self.root.record(
            Self::aggregate_type(),
            &OrderEvent::OrderItemAdded(OrderItemAddedData {
                item: item.clone(),
                total_amount: new_total,
            }),
            ctx,
        )?;

        self.items.insert(item.product_id.clone(), item);
        self.total_amount = new_total;
        Ok(())
    }

    /// Removes an item from the order.
    pub fn remove_item(
        &mut self,
        product_id: &ProductId,
        ctx: &RequestContext,
    ) -> Result<(), OrderError> {
        if !self.state.can_modify_items() {
            return Err(OrderError::InvalidStateTransition {
                current_state: self.state,
                action: "remove an item from",
            });
        }
        let Some(item) = self.items.get(product_id) else {
            return Err(OrderError::ItemNotFound {
                product_id: product_id.to_string(),
            });
        };

        let new_total = self.total_amount - item.total_price();
        self.root.record(
            Self::aggregate_type(),
            &OrderEvent::OrderItemRemoved(OrderItemRemovedData {
                product_id: product_id.clone(),
                total_amount: new_total,
            }),
            ctx,
        )?;

        self.items.remove(product_id);
        self.total_amount = new_total;
        Ok(())
    }

    /// Marks the order as fulfilled.
    pub fn fulfill(&mut self, ctx: &RequestContext) -> Result<(), OrderError> {
        if self.state != OrderState::Open {
            return Err(OrderError::InvalidStateTransition {
                current_state: self.state,
                action: "fulfill",
            });
        }
        if !self.has_items() {
            return Err(OrderError::NoItems);
        }

        self.root.record(
            Self::aggregate_type(),
            &OrderEvent::OrderFulfilled(OrderFulfilledData {
                fulfilled_at: Utc::now(),
            }),
            ctx,
        )?;

        self.state = OrderState::Fulfilled;
        Ok(())
    }

    /// Cancels the order.
    pub fn cancel(
        &mut self,
        reason: impl Into<String>,
        ctx: &RequestContext,
    ) -> Result<(), OrderError> {
        if self.state.is_terminal() {
            return Err(OrderError::InvalidStateTransition {
                current_state: self.state,
                action: "cancel",
            });
        }

        self.root.record(
            Self::aggregate_type(),
            &OrderEvent::OrderCancelled(OrderCancelledData {
                reason: reason.into(),
                cancelled_at: Utc::now(),
            }),
            ctx,
        )?;

        self.state = OrderState::Cancelled;
        Ok(())
    }

    fn validate_item(item: &OrderItem) -> Result<(), OrderError> {
        if item.quantity == 0 {
            return Err(OrderError::InvalidQuantity {
                quantity: item.quantity,
            });
        }
        if !item.unit_price.is_positive() {
            return Err(OrderError::InvalidPrice {
                price: item.unit_price.cents(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn widget() -> OrderItem {
        OrderItem::new("SKU-001", "Widget", 2, Money::from_cents(1000))
    }

    fn gadget() -> OrderItem {
        OrderItem::new("SKU-002", "Gadget", 1, Money::from_cents(500))
    }

    fn place_order() -> Order {
        Order::place(CustomerId::new(), vec![widget()], &RequestContext::empty()).unwrap()
    }

    #[test]
    fn place_buffers_one_event_at_version_one() {
        let order = place_order();
        assert_eq!(order.version(), Version::new(1));
        assert_eq!(order.pending_events().len(), 1);
        assert_eq!(order.pending_events()[0].event_type, "OrderPlaced");
        assert_eq!(order.pending_events()[0].aggregate_id, order.id());
        assert_eq!(order.state(), OrderState::Open);
        assert_eq!(order.total_amount().cents(), 2000);
    }

    #[test]
    fn place_with_no_items_fails() {
        let result = Order::place(CustomerId::new(), vec![], &RequestContext::empty());
        assert!(matches!(result, Err(OrderError::NoItems)));
    }

    #[test]
    fn place_with_zero_quantity_fails() {
        let item = OrderItem::new("SKU-001", "Widget", 0, Money::from_cents(1000));
        let result = Order::place(CustomerId::new(), vec![item], &RequestContext::empty());
        assert!(matches!(result, Err(OrderError::InvalidQuantity { .. })));
    }

    #[test]
    fn add_item_bumps_version_and_total() {
        let mut order = place_order();
        order.add_item(gadget(), &RequestContext::empty()).unwrap();

        assert_eq!(order.version(), Version::new(2));
        assert_eq!(order.pending_events().len(), 2);
        assert_eq!(order.item_count(), 2);
        assert_eq!(order.total_amount().cents(), 2500);
    }

    #[test]
    fn add_duplicate_item_fails_without_mutation() {
        let mut order = place_order();
        let version_before = order.version();
        let result = order.add_item(widget(), &RequestContext::empty());

        assert!(matches!(result, Err(OrderError::ItemAlreadyPresent { .. })));
        assert_eq!(order.version(), version_before);
        assert_eq!(order.pending_events().len(), 1);
        assert_eq!(order.item_count(), 1);
    }

    #[test]
    fn remove_item_updates_total() {
        let mut order = place_order();
        order.add_item(gadget(), &RequestContext::empty()).unwrap();
        order
            .remove_item(&ProductId::from("SKU-001"), &RequestContext::empty())
            .unwrap();

        assert_eq!(order.item_count(), 1);
        assert_eq!(order.total_amount().cents(), 500);
        assert_eq!(order.version(), Version::new(3));
    }

    #[test]
    fn remove_missing_item_fails() {
        let mut order = place_order();
        let result = order.remove_item(&ProductId::from("SKU-999"), &RequestContext::empty());
        assert!(matches!(result, Err(OrderError::ItemNotFound { .. })));
    }

    #[test]
    fn fulfill_moves_to_terminal_state() {
        let mut order = place_order();
        order.fulfill(&RequestContext::empty()).unwrap();

        assert_eq!(order.state(), OrderState::Fulfilled);
        assert!(order.state().is_terminal());
        assert_eq!(order.pending_events()[1].event_type, "OrderFulfilled");
    }

    #[test]
    fn cannot_modify_after_fulfill() {
        let mut order = place_order();
        order.fulfill(&RequestContext::empty()).unwrap();

        let result = order.add_item(gadget(), &RequestContext::empty());
        assert!(matches!(
            result,
            Err(OrderError::InvalidStateTransition { .. })
        ));
    }

    #[test]
    fn cannot_cancel_fulfilled_order() {
        let mut order = place_order();
        order.fulfill(&RequestContext::empty()).unwrap();

        let result = order.cancel("too late", &RequestContext::empty());
        assert!(matches!(
            result,
            Err(OrderError::InvalidStateTransition { .. })
        ));
    }

    #[test]
    fn cancel_records_reason() {
        let mut order = place_order();
        order
            .cancel("customer request", &RequestContext::empty())
            .unwrap();

        assert_eq!(order.state(), OrderState::Cancelled);
        let events = order.pending_events();
        let payload: OrderEvent = events[1].typed_payload().unwrap();
        match payload {
            OrderEvent::OrderCancelled(data) => assert_eq!(data.reason, "customer request"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn metadata_carries_request_context() {
        let ctx = RequestContext::with_correlation("corr-9").for_user("user-3");
        let order = Order::place(CustomerId::new(), vec![widget()], &ctx).unwrap();

        let events = order.pending_events();
        let meta = &events[0].metadata;
        assert_eq!(meta.correlation_id.as_deref(), Some("corr-9"));
        assert_eq!(meta.user_id.as_deref(), Some("user-3"));
    }

    #[test]
    fn reconstituted_order_has_no_pending_events() {
        let order = place_order();
        let json = serde_json::to_string(&order).unwrap();
        let reconstituted: Order = serde_json::from_str(&json).unwrap();

        assert_eq!(reconstituted.id(), order.id());
        assert_eq!(reconstituted.version(), order.version());
        assert!(reconstituted.pending_events().is_empty());
    }
}
