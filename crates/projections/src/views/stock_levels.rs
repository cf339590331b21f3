//! Stock level read model.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use domain::{PRODUCT_EVENT_TYPES, ProductEvent, ProductId};
use tokio::sync::RwLock;

use crate::Result;
use crate::projection::Projection;

/// Current stock for one SKU.
#[derive(Debug, Clone)]
pub struct StockLevel {
    pub sku: ProductId,
    pub name: String,
    pub available: u32,
}

/// Stock on hand per SKU.
///
/// Each product event carries the resulting stock figure, so applying
/// an event is a plain overwrite and reordering within one SKU cannot
/// accumulate drift.
#[derive(Clone, Default)]
pub struct StockLevelsView {
    levels: Arc<RwLock<HashMap<ProductId, StockLevel>>>,
}

impl StockLevelsView {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn available(&self, sku: &ProductId) -> Option<u32> {
        self.levels.read().await.get(sku).map(|l| l.available)
    }

    pub async fn get(&self, sku: &ProductId) -> Option<StockLevel> {
        self.levels.read().await.get(sku).cloned()
    }

    /// SKUs at or below the threshold, for replenishment alerts.
    pub async fn low_stock(&self, threshold: u32) -> Vec<StockLevel> {
        self.levels
            .read()
            .await
            .values()
            .filter(|l| l.available <= threshold)
            .cloned()
            .collect()
    }

    pub async fn count(&self) -> usize {
        self.levels.read().await.len()
    }
}

#[async_trait]
impl Projection for StockLevelsView {
    fn name(&self) -> &'static str {
        "StockLevelsView"
    }

    fn event_types(&self) -> &'static [&'static str] {
        PRODUCT_EVENT_TYPES
    }

    async fn apply(&self, event: &domain::DomainEvent) -> Result<()> {
        let product_event: ProductEvent = event.typed_payload()?;
        let mut levels = self.levels.write().await;

        match product_event {
            ProductEvent::ProductCreated(data) => {
                levels.insert(
                    data.sku.clone(),
                    StockLevel {
                        sku: data.sku,
                        name: data.name,
                        available: data.initial_stock,
                    },
                );
            }
            ProductEvent::StockDecremented(data) => {
                if let Some(level) = levels.get_mut(&data.sku) {
                    level.available = data.remaining_stock;
                }
            }
            ProductEvent::ProductRestocked(data) => {
                if let Some(level) = levels.get_mut(&data.sku) {
                    level.available = data.new_stock;
                }
            }
        }
        Ok(())
    }

    async fn reset(&self) {
        self.levels.write().await.clear();
    }
}
