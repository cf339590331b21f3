//! Order aggregate and related types.

mod aggregate;
mod events;
mod state;
mod value_objects;

pub use aggregate::Order;
pub use events::{
    ORDER_EVENT_TYPES, OrderCancelledData, OrderEvent, OrderFulfilledData, OrderItemAddedData,
    OrderItemRemovedData, OrderPlacedData,
};
pub use state::OrderState;
pub use value_objects::{CustomerId, Money, OrderItem, ProductId};

use thiserror::Error;

/// Errors that can occur during order operations.
///
/// A command that fails leaves the aggregate untouched: no state change,
/// no version bump, no event buffered.
#[derive(Debug, Error)]
pub enum OrderError {
    /// An order needs at least one item.
    #[error("Order must contain at least one item")]
    NoItems,

    /// Item quantity must be positive.
    #[error("Invalid quantity: {quantity}")]
    InvalidQuantity { quantity: u32 },

    /// Item price must be positive.
    #[error("Invalid price: {price} cents")]
    InvalidPrice { price: i64 },

    /// The item is already part of the order.
    #[error("Item already in order: {product_id}")]
    ItemAlreadyPresent { product_id: String },

    /// The item is not part of the order.
    #[error("Item not found in order: {product_id}")]
    ItemNotFound { product_id: String },

    /// The order's state does not allow the attempted action.
    #[error("Cannot {action} an order in {current_state} state")]
    InvalidStateTransition {
        current_state: OrderState,
        action: &'static str,
    },

    /// The event payload could not be encoded.
    #[error("Failed to encode event payload: {0}")]
    Payload(#[from] serde_json::Error),
}
