//! Order domain events.

use chrono::{DateTime, Utc};
use common::AggregateId;
use serde::{Deserialize, Serialize};

use crate::event::EventPayload;

use super::{CustomerId, Money, OrderItem, ProductId};

/// Event type names emitted by the order aggregate.
///
/// Consumers register with the event bus under these names.
pub const ORDER_EVENT_TYPES: &[&str] = &[
    "OrderPlaced",
    "OrderItemAdded",
    "OrderItemRemoved",
    "OrderFulfilled",
    "OrderCancelled",
];

/// Events that can occur on an order aggregate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum OrderEvent {
    /// Order was placed with an initial set of items.
    OrderPlaced(OrderPlacedData),

    /// Item was added to the order.
    OrderItemAdded(OrderItemAddedData),

    /// Item was removed from the order.
    OrderItemRemoved(OrderItemRemovedData),

    /// Order was fulfilled (terminal).
    OrderFulfilled(OrderFulfilledData),

    /// Order was cancelled (terminal).
    OrderCancelled(OrderCancelledData),
}

impl EventPayload for OrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            OrderEvent::OrderPlaced(_) => "OrderPlaced",
            OrderEvent::OrderItemAdded(_) => "OrderItemAdded",
            OrderEvent::OrderItemRemoved(_) => "OrderItemRemoved",
            OrderEvent::OrderFulfilled(_) => "OrderFulfilled",
            OrderEvent::OrderCancelled(_) => "OrderCancelled",
        }
    }
}

/// Data for the OrderPlaced event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderPlacedData {
    /// The unique order ID.
    pub order_id: AggregateId,

    /// The customer who placed the order.
    pub customer_id: CustomerId,

    /// Items the order was placed with.
    pub items: Vec<OrderItem>,

    /// Total amount at placement time.
    pub total_amount: Money,

    /// When the order was placed.
    pub placed_at: DateTime<Utc>,
}

/// Data for the OrderItemAdded event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderItemAddedData {
    /// The item that was added.
    pub item: OrderItem,

    /// Order total after the addition.
    pub total_amount: Money,
}

/// Data for the OrderItemRemoved event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderItemRemovedData {
    /// The product that was removed.
    pub product_id: ProductId,

    /// Order total after the removal.
    pub total_amount: Money,
}

/// Data for the OrderFulfilled event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderFulfilledData {
    /// When the order was fulfilled.
    pub fulfilled_at: DateTime<Utc>,
}

/// Data for the OrderCancelled event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderCancelledData {
    /// Why the order was cancelled.
    pub reason: String,

    /// When the order was cancelled.
    pub cancelled_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_type_names_match_registry() {
        let event = OrderEvent::OrderCancelled(OrderCancelledData {
            reason: "test".to_string(),
            cancelled_at: Utc::now(),
        });
        assert!(ORDER_EVENT_TYPES.contains(&event.event_type()));
    }

    #[test]
    fn events_roundtrip_through_json() {
        let event = OrderEvent::OrderItemRemoved(OrderItemRemovedData {
            product_id: ProductId::from("SKU-001"),
            total_amount: Money::from_cents(500),
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "OrderItemRemoved");
        let back: OrderEvent = serde_json::from_value(json).unwrap();
        assert!(matches!(back, OrderEvent::OrderItemRemoved(_)));
    }
}
