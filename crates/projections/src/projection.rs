//! The projection trait and its bus adapter.

use std::sync::Arc;

use async_trait::async_trait;
use bus::{EventHandler, HandlerError};
use domain::DomainEvent;

use crate::Result;
use crate::ledger::ProcessedLedger;

/// A read model fed by domain events.
#[async_trait]
pub trait Projection: Send + Sync + 'static {
    /// Name used in logs and as the handler name on the bus.
    fn name(&self) -> &'static str;

    /// Event types this projection consumes. Used when subscribing.
    fn event_types(&self) -> &'static [&'static str];

    /// Applies one event to the view.
    async fn apply(&self, event: &DomainEvent) -> Result<()>;

    /// Drops all view state, ready for a rebuild.
    async fn reset(&self);
}

/// Adapts a [`Projection`] to the bus, adding duplicate suppression.
///
/// Delivery is at-least-once: a relay retry or a reclaimed claim can
/// hand the same event to the bus twice. The handler keeps a bounded
/// [`ProcessedLedger`] of applied event ids and skips anything it has
/// already applied. The ledger is only written after a successful
/// apply, so a failed apply stays eligible for redelivery.
pub struct ProjectionHandler<P> {
    projection: Arc<P>,
    ledger: ProcessedLedger,
}

impl<P: Projection> ProjectionHandler<P> {
    pub fn new(projection: Arc<P>) -> Self {
        Self {
            projection,
            ledger: ProcessedLedger::default(),
        }
    }

    /// Overrides the number of event ids remembered for deduplication.
    pub fn with_ledger_capacity(projection: Arc<P>, capacity: usize) -> Self {
        Self {
            projection,
            ledger: ProcessedLedger::new(capacity),
        }
    }

    pub fn projection(&self) -> &Arc<P> {
        &self.projection
    }
}

#[async_trait]
impl<P: Projection> EventHandler for ProjectionHandler<P> {
    fn name(&self) -> &'static str {
        self.projection.name()
    }

    async fn handle(&self, event: &DomainEvent) -> std::result::Result<(), HandlerError> {
        if self.ledger.contains(event.event_id).await {
            tracing::debug!(
                projection = self.projection.name(),
                event_id = %event.event_id,
                event_type = %event.event_type,
                "duplicate event skipped"
            );
            metrics::counter!("projection_duplicates_skipped_total").increment(1);
            return Ok(());
        }

        self.projection.apply(event).await?;
        self.ledger.record(event.event_id).await;
        metrics::counter!("projection_events_applied_total").increment(1);
        Ok(())
    }
}
