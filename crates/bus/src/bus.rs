//! The in-process event bus.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use domain::DomainEvent;
use tokio::sync::RwLock;

use crate::error::{BusError, HandlerFailure, Result};
use crate::handler::{EventHandler, EventPublisher};

/// In-process event bus with an explicit event-type -> handler registry.
///
/// Delivery is synchronous and in registration order. A failing handler
/// never prevents delivery to the handlers after it; each failure is
/// logged and collected, and `publish` reports them all at once so the
/// caller (relay or command path) can decide on retry.
#[derive(Clone, Default)]
pub struct EventBus {
    handlers: Arc<RwLock<HashMap<String, Vec<Arc<dyn EventHandler>>>>>,
}

impl EventBus {
    /// Creates a bus with an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler for one event type.
    ///
    /// Handlers for the same type are invoked in the order they were
    /// registered.
    pub async fn subscribe(&self, event_type: impl Into<String>, handler: Arc<dyn EventHandler>) {
        let event_type = event_type.into();
        let mut handlers = self.handlers.write().await;
        handlers.entry(event_type).or_default().push(handler);
    }

    /// Registers one handler for several event types at once.
    pub async fn subscribe_many(&self, event_types: &[&str], handler: Arc<dyn EventHandler>) {
        for event_type in event_types {
            self.subscribe(*event_type, Arc::clone(&handler)).await;
        }
    }

    /// Returns the number of handlers registered for an event type.
    pub async fn handler_count(&self, event_type: &str) -> usize {
        self.handlers
            .read()
            .await
            .get(event_type)
            .map_or(0, Vec::len)
    }
}

#[async_trait]
impl EventPublisher for EventBus {
    async fn publish(&self, event: &DomainEvent) -> Result<()> {
        let handlers: Vec<Arc<dyn EventHandler>> = {
            let registry = self.handlers.read().await;
            registry.get(&event.event_type).cloned().unwrap_or_default()
        };

        if handlers.is_empty() {
            tracing::debug!(
                event_type = %event.event_type,
                event_id = %event.event_id,
                "no handlers registered, event dropped by bus"
            );
            return Ok(());
        }

        let attempted = handlers.len();
        let mut failures = Vec::new();

        for handler in handlers {
            if let Err(err) = handler.handle(event).await {
                tracing::warn!(
                    handler = handler.name(),
                    event_type = %event.event_type,
                    event_id = %event.event_id,
                    error = %err,
                    "event handler failed"
                );
                metrics::counter!("bus_handler_failures_total").increment(1);
                failures.push(HandlerFailure {
                    handler: handler.name().to_string(),
                    message: err.to_string(),
                });
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(BusError::HandlerFailures {
                event_id: event.event_id,
                event_type: event.event_type.clone(),
                attempted,
                failures,
            })
        }
    }
}
