//! Handler and publisher contracts.

use async_trait::async_trait;
use domain::DomainEvent;

use crate::error::Result;

/// Error type handlers may return; the bus only logs and collects it.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// A subscriber receiving events for the types it registered under.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Returns the handler's name, used in failure logs.
    fn name(&self) -> &'static str;

    /// Handles one event. The event is shared; handlers clone what they keep.
    async fn handle(&self, event: &DomainEvent) -> std::result::Result<(), HandlerError>;
}

/// Anything that can publish a domain event to subscribers.
///
/// Implemented by [`crate::EventBus`]; a broker-backed transport adapter
/// can implement it for cross-process fanout.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publishes one event to every handler registered for its type.
    async fn publish(&self, event: &DomainEvent) -> Result<()>;
}
