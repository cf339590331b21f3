//! Domain layer: versioned aggregates that buffer the events their
//! mutations produce.
//!
//! This crate provides:
//! - The [`Aggregate`] trait and [`AggregateRoot`] pending-event buffer
//! - The [`DomainEvent`] envelope with correlation metadata
//! - Two concrete aggregates: [`Order`] and [`Product`]
//!
//! Events here are side effects of state changes, not the source of
//! truth; persistence of both is the store crate's concern.

pub mod aggregate;
pub mod event;
pub mod order;
pub mod product;

pub use aggregate::{Aggregate, AggregateRoot, PendingEvents};
pub use event::{DomainEvent, EventMetadata, EventPayload};
pub use order::{
    CustomerId, Money, ORDER_EVENT_TYPES, Order, OrderError, OrderEvent, OrderItem, OrderState,
    ProductId,
};
pub use product::{PRODUCT_EVENT_TYPES, Product, ProductError, ProductEvent};
