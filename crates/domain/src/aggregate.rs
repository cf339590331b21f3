//! Core aggregate trait and the pending-event root.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use common::{AggregateId, RequestContext, Version};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::event::{DomainEvent, EventPayload};

/// Trait for state-stored aggregates.
///
/// An aggregate is a versioned entity whose state is persisted as a row.
/// Mutations buffer the events they produce; the store captures the
/// buffer during a save and clears it once the transaction has
/// committed. Events are side effects of state changes, not the source
/// of truth.
pub trait Aggregate: Serialize + DeserializeOwned + Send + Sync + Sized {
    /// Returns the aggregate type name.
    ///
    /// Used as the aggregate_type column and for event routing.
    fn aggregate_type() -> &'static str;

    /// Returns the aggregate's unique identifier.
    fn id(&self) -> AggregateId;

    /// Returns the current in-memory version.
    ///
    /// While events are pending this is exactly one greater than the
    /// version last confirmed in storage.
    fn version(&self) -> Version;

    /// Sets the version. Called by the store when reconstituting.
    fn set_version(&mut self, version: Version);

    /// Returns the pending-event buffer handle.
    ///
    /// The store keeps a clone of the handle across the commit so it can
    /// empty the buffer once the events are actually durable.
    fn pending(&self) -> &PendingEvents;

    /// Returns a snapshot of the events buffered since the aggregate was
    /// loaded or created.
    fn pending_events(&self) -> Vec<DomainEvent> {
        self.pending().snapshot()
    }

    /// Empties the pending-event buffer.
    ///
    /// Called by the store after a commit, never by domain code. A
    /// rolled-back save leaves the buffer intact so a retry cannot
    /// silently drop the mutation.
    fn clear_pending_events(&mut self) {
        self.pending().clear();
    }
}

/// Shared handle to an aggregate's buffered events.
///
/// Cloning the handle shares the buffer; the store relies on this to
/// clear the events of every aggregate saved in a unit of work after
/// the unit commits, without holding a borrow of the aggregates
/// themselves.
#[derive(Debug, Clone, Default)]
pub struct PendingEvents {
    events: Arc<Mutex<Vec<DomainEvent>>>,
}

impl PendingEvents {
    fn lock(&self) -> MutexGuard<'_, Vec<DomainEvent>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns a copy of the buffered events, in emission order.
    pub fn snapshot(&self) -> Vec<DomainEvent> {
        self.lock().clone()
    }

    /// Returns the number of buffered events.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns true if nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Empties the buffer.
    pub fn clear(&self) {
        self.lock().clear();
    }

    fn push(&self, event: DomainEvent) {
        self.lock().push(event);
    }

    /// Returns an independent buffer holding a copy of the same events.
    fn detach(&self) -> Self {
        Self {
            events: Arc::new(Mutex::new(self.snapshot())),
        }
    }
}

/// Identity, version, and pending-event buffer shared by every aggregate.
///
/// Aggregates embed a root and delegate the [`Aggregate`] accessors to it.
/// [`AggregateRoot::record`] is the single place a version is bumped and an
/// event buffered, so the two can never drift apart.
///
/// The buffer is not serialized: a reconstituted aggregate always starts
/// with zero pending events.
#[derive(Debug, Serialize, Deserialize)]
pub struct AggregateRoot {
    id: AggregateId,
    version: Version,
    #[serde(skip)]
    pending: PendingEvents,
}

impl Clone for AggregateRoot {
    /// A cloned root gets its own buffer; mutating the clone must not
    /// grow the original's pending events.
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            version: self.version,
            pending: self.pending.detach(),
        }
    }
}

impl AggregateRoot {
    /// Creates a root for a brand-new aggregate at version 0.
    pub fn new(id: AggregateId) -> Self {
        Self {
            id,
            version: Version::initial(),
            pending: PendingEvents::default(),
        }
    }

    pub fn id(&self) -> AggregateId {
        self.id
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    pub fn pending(&self) -> &PendingEvents {
        &self.pending
    }

    pub fn pending_events(&self) -> Vec<DomainEvent> {
        self.pending.snapshot()
    }

    pub fn clear_pending_events(&mut self) {
        self.pending.clear();
    }

    /// Records one mutation: bumps the version and buffers the event.
    ///
    /// Must be called after the command has validated its invariants and
    /// before the state change is applied, so a serialization failure
    /// leaves the aggregate untouched. The recorded event always carries
    /// this aggregate's identity; no aggregate can emit on behalf of
    /// another.
    pub fn record<E: EventPayload>(
        &mut self,
        aggregate_type: &str,
        payload: &E,
        ctx: &RequestContext,
    ) -> Result<(), serde_json::Error> {
        let event = DomainEvent::from_payload(self.id, aggregate_type, payload, ctx)?;
        self.version = self.version.next();
        self.pending.push(event);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Serialize, Deserialize)]
    #[serde(tag = "type", content = "data")]
    enum TestEvent {
        Bumped { amount: i32 },
    }

    impl EventPayload for TestEvent {
        fn event_type(&self) -> &'static str {
            "Bumped"
        }
    }

    #[test]
    fn new_root_starts_at_version_zero() {
        let root = AggregateRoot::new(AggregateId::new());
        assert_eq!(root.version(), Version::initial());
        assert!(root.pending_events().is_empty());
    }

    #[test]
    fn record_bumps_version_and_buffers_event() {
        let mut root = AggregateRoot::new(AggregateId::new());
        root.record("Test", &TestEvent::Bumped { amount: 1 }, &RequestContext::empty())
            .unwrap();

        assert_eq!(root.version(), Version::new(1));
        assert_eq!(root.pending_events().len(), 1);
        assert_eq!(root.pending_events()[0].event_type, "Bumped");
        assert_eq!(root.pending_events()[0].aggregate_id, root.id());
    }

    #[test]
    fn clear_empties_buffer_but_keeps_version() {
        let mut root = AggregateRoot::new(AggregateId::new());
        root.record("Test", &TestEvent::Bumped { amount: 1 }, &RequestContext::empty())
            .unwrap();
        root.clear_pending_events();

        assert!(root.pending_events().is_empty());
        assert_eq!(root.version(), Version::new(1));
    }

    #[test]
    fn buffer_handle_observes_later_clears() {
        let mut root = AggregateRoot::new(AggregateId::new());
        root.record("Test", &TestEvent::Bumped { amount: 1 }, &RequestContext::empty())
            .unwrap();

        let handle = root.pending().clone();
        assert_eq!(handle.len(), 1);

        root.clear_pending_events();
        assert!(handle.is_empty());
    }

    #[test]
    fn cloned_root_gets_an_independent_buffer() {
        let mut root = AggregateRoot::new(AggregateId::new());
        root.record("Test", &TestEvent::Bumped { amount: 1 }, &RequestContext::empty())
            .unwrap();

        let copy = root.clone();
        root.clear_pending_events();

        assert_eq!(copy.pending_events().len(), 1);
    }

    #[test]
    fn pending_buffer_is_not_serialized() {
        let mut root = AggregateRoot::new(AggregateId::new());
        root.record("Test", &TestEvent::Bumped { amount: 1 }, &RequestContext::empty())
            .unwrap();

        let json = serde_json::to_string(&root).unwrap();
        let reconstituted: AggregateRoot = serde_json::from_str(&json).unwrap();

        assert_eq!(reconstituted.version(), Version::new(1));
        assert!(reconstituted.pending_events().is_empty());
    }
}
