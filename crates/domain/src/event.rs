//! Domain event envelope and metadata.

use chrono::{DateTime, Utc};
use common::{AggregateId, EventId, RequestContext};
use serde::{Deserialize, Serialize};

/// Trait for typed event payloads.
///
/// Each aggregate defines its events as a tagged enum implementing this
/// trait. Consumers match on the deserialized enum rather than relying on
/// runtime type identity across serialization boundaries.
pub trait EventPayload: Serialize {
    /// Returns the event type name (e.g. "OrderPlaced").
    fn event_type(&self) -> &'static str;
}

/// Correlation metadata attached to every event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMetadata {
    /// Correlates all events caused by one external request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,

    /// The command or event that directly caused this event.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub causation_id: Option<String>,

    /// The user on whose behalf the mutation ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

impl From<&RequestContext> for EventMetadata {
    fn from(ctx: &RequestContext) -> Self {
        Self {
            correlation_id: ctx.correlation_id.clone(),
            causation_id: ctx.causation_id.clone(),
            user_id: ctx.user_id.clone(),
        }
    }
}

/// A domain event with everything needed to store and deliver it.
///
/// Events are facts: the id and timestamp are assigned at creation time,
/// not at publish time, and the payload is never mutated after creation.
/// Consumers receive clones, so the original payload stays intact no
/// matter what a handler does with its copy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainEvent {
    /// Globally unique identifier, assigned at creation, never reused.
    pub event_id: EventId,

    /// The type of the event (e.g. "OrderPlaced", "StockDecremented").
    pub event_type: String,

    /// The aggregate that emitted this event.
    pub aggregate_id: AggregateId,

    /// The type of the emitting aggregate (e.g. "Order").
    pub aggregate_type: String,

    /// When the event was created.
    pub occurred_at: DateTime<Utc>,

    /// The event payload as JSON.
    pub payload: serde_json::Value,

    /// Correlation/causation/user identifiers.
    pub metadata: EventMetadata,
}

impl DomainEvent {
    /// Creates an event from a typed payload.
    ///
    /// Fails only if the payload cannot be serialized to JSON.
    pub fn from_payload<E: EventPayload>(
        aggregate_id: AggregateId,
        aggregate_type: &str,
        payload: &E,
        ctx: &RequestContext,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            event_id: EventId::new(),
            event_type: payload.event_type().to_string(),
            aggregate_id,
            aggregate_type: aggregate_type.to_string(),
            occurred_at: Utc::now(),
            payload: serde_json::to_value(payload)?,
            metadata: EventMetadata::from(ctx),
        })
    }

    /// Deserializes the payload into a typed event enum.
    pub fn typed_payload<E: serde::de::DeserializeOwned>(&self) -> Result<E, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }
}
