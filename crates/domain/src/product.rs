//! Product aggregate tracking stock levels.

use chrono::{DateTime, Utc};
use common::{AggregateId, RequestContext, Version};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::aggregate::{Aggregate, AggregateRoot, PendingEvents};
use crate::event::EventPayload;
use crate::order::{Money, ProductId};

/// Event type names emitted by the product aggregate.
pub const PRODUCT_EVENT_TYPES: &[&str] = &["ProductCreated", "StockDecremented", "ProductRestocked"];

/// Events that can occur on a product aggregate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ProductEvent {
    /// Product was registered in the catalog.
    ProductCreated(ProductCreatedData),

    /// Stock was decremented for an order.
    StockDecremented(StockDecrementedData),

    /// Stock was replenished.
    ProductRestocked(ProductRestockedData),
}

impl EventPayload for ProductEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ProductEvent::ProductCreated(_) => "ProductCreated",
            ProductEvent::StockDecremented(_) => "StockDecremented",
            ProductEvent::ProductRestocked(_) => "ProductRestocked",
        }
    }
}

/// Data for the ProductCreated event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductCreatedData {
    pub product_id: AggregateId,
    pub sku: ProductId,
    pub name: String,
    pub unit_price: Money,
    pub initial_stock: u32,
    pub created_at: DateTime<Utc>,
}

/// Data for the StockDecremented event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockDecrementedData {
    pub sku: ProductId,
    pub quantity: u32,
    pub remaining_stock: u32,
}

/// Data for the ProductRestocked event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductRestockedData {
    pub sku: ProductId,
    pub quantity: u32,
    pub new_stock: u32,
}

/// Errors that can occur during product operations.
#[derive(Debug, Error)]
pub enum ProductError {
    /// Not enough stock to satisfy the request.
    #[error("Insufficient stock for {sku}: requested {requested}, available {available}")]
    InsufficientStock {
        sku: String,
        requested: u32,
        available: u32,
    },

    /// Quantity must be positive.
    #[error("Invalid quantity: {quantity}")]
    InvalidQuantity { quantity: u32 },

    /// The event payload could not be encoded.
    #[error("Failed to encode event payload: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Product aggregate root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    root: AggregateRoot,
    sku: ProductId,
    name: String,
    unit_price: Money,
    stock: u32,
}

impl Aggregate for Product {
    fn aggregate_type() -> &'static str {
        "Product"
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

impl Product {
    /// Registers a new product. The factory: version 0 -> 1.
    pub fn create(
        sku: ProductId,
        name: impl Into<String>,
        unit_price: Money,
        initial_stock: u32,
        ctx: &RequestContext,
    ) -> Result<Product, ProductError> {
        let product_id = AggregateId::new();
        let name = name.into();

        let mut product = Product {
            root: AggregateRoot::new(product_id),
            sku: sku.clone(),
            name: name.clone(),
            unit_price,
            stock: initial_stock,
        };

        product.root.record(
            Self::aggregate_type(),
            &ProductEvent::ProductCreated(ProductCreatedData {
                product_id,
                sku,
                name,
                unit_price,
                initial_stock,
                created_at: Utc::now(),
            }),
            ctx,
        )?;

        Ok(product)
    }

    pub fn sku(&self) -> &ProductId {
        &self.sku
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn unit_price(&self) -> Money {
        self.unit_price
    }

    pub fn stock(&self) -> u32 {
        self.stock
    }

    /// Decrements stock, failing if not enough is available.
    pub fn decrement_stock(
        &mut self,
        quantity: u32,
        ctx: &RequestContext,
    ) -> Result<(), ProductError> {
        if quantity == 0 {
            return Err(ProductError::InvalidQuantity { quantity });
        }
        if quantity > self.stock {
            return Err(ProductError::InsufficientStock {
                sku: self.sku.to_string(),
                requested: quantity,
                available: self.stock,
            });
        }

        let remaining = self.stock - quantity;
        self.root.record(
            Self::aggregate_type(),
            &ProductEvent::StockDecremented(StockDecrementedData {
                sku: self.sku.clone(),
                quantity,
                remaining_stock: remaining,
            }),
            ctx,
        )?;

        self.stock = remaining;
        Ok(())
    }

    /// Replenishes stock.
    pub fn restock(&mut self, quantity: u32, ctx: &RequestContext) -> Result<(), ProductError> {
        if quantity == 0 {
            return Err(ProductError::InvalidQuantity { quantity });
        }

        let new_stock = self.stock + quantity;
        self.root.record(
            Self::aggregate_type(),
            &ProductEvent::ProductRestocked(ProductRestockedData {
                sku: self.sku.clone(),
                quantity,
                new_stock,
            }),
            ctx,
        )?;

        self.stock = new_stock;
        Ok(())
    }
}
