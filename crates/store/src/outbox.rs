//! Transactional outbox entries and the relay-facing store contract.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use common::{AggregateId, EventId};
use domain::DomainEvent;
use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

/// Lifecycle of an outbox entry.
///
/// `Pending -> Processing -> Processed` on the happy path. A publish
/// failure moves the entry to `Failed`; the sweeper moves it back to
/// `Pending` while retries remain, after which it stays `Failed` as a
/// poison entry awaiting manual intervention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OutboxStatus {
    Pending,
    Processing,
    Processed,
    Failed,
}

impl OutboxStatus {
    /// The value stored in the status column.
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "PENDING",
            OutboxStatus::Processing => "PROCESSING",
            OutboxStatus::Processed => "PROCESSED",
            OutboxStatus::Failed => "FAILED",
        }
    }

    /// Parses a status column value.
    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "PENDING" => Ok(OutboxStatus::Pending),
            "PROCESSING" => Ok(OutboxStatus::Processing),
            "PROCESSED" => Ok(OutboxStatus::Processed),
            "FAILED" => Ok(OutboxStatus::Failed),
            other => Err(StoreError::UnknownStatus(other.to_string())),
        }
    }
}

impl std::fmt::Display for OutboxStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One event staged for delivery.
///
/// The entry's id is the event's id, so delivery is traceable end to end
/// and downstream consumers can deduplicate on it. The payload is the
/// full serialized [`DomainEvent`]; the relay deserializes it back for
/// publishing without touching the aggregates table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxEntry {
    pub id: EventId,
    pub aggregate_id: AggregateId,
    pub aggregate_type: String,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub status: OutboxStatus,
    pub retry_count: i32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub claimed_at: Option<DateTime<Utc>>,
}

impl OutboxEntry {
    /// Builds a pending entry carrying the event.
    pub fn from_event(event: &DomainEvent) -> Result<Self> {
        Ok(Self {
            id: event.event_id,
            aggregate_id: event.aggregate_id,
            aggregate_type: event.aggregate_type.clone(),
            event_type: event.event_type.clone(),
            payload: serde_json::to_value(event)?,
            status: OutboxStatus::Pending,
            retry_count: 0,
            last_error: None,
            created_at: event.occurred_at,
            processed_at: None,
            claimed_at: None,
        })
    }

    /// Recovers the carried event for publishing.
    pub fn to_event(&self) -> Result<DomainEvent> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }
}

/// Entry counts per status, for operational visibility.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub pending: u64,
    pub processing: u64,
    pub processed: u64,
    pub failed: u64,
}

/// Outbox operations used by the relay and the sweeper.
///
/// Claiming is the concurrency gate: `claim` flips an entry from
/// `Pending` to `Processing` atomically, so two relay instances polling
/// the same table never publish the same entry twice.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Returns pending entries, oldest first.
    async fn fetch_pending(&self, limit: i64) -> Result<Vec<OutboxEntry>>;

    /// Atomically claims a pending entry for processing.
    ///
    /// Returns false when the entry was no longer pending, which simply
    /// means another worker got there first.
    async fn claim(&self, id: EventId) -> Result<bool>;

    /// Marks a claimed entry as delivered.
    ///
    /// Only moves entries that are still `Processing`. An acknowledgement
    /// arriving after the claim was reclaimed is ignored; the entry
    /// belongs to whichever worker holds the current claim.
    async fn mark_processed(&self, id: EventId) -> Result<()>;

    /// Records a publish failure: bumps the retry count and parks the
    /// entry as `Failed` with the error message.
    ///
    /// Like [`OutboxStore::mark_processed`], this requires a live claim;
    /// a late nack cannot fail an entry another worker has delivered.
    async fn mark_failed(&self, id: EventId, error: &str) -> Result<()>;

    /// Moves failed entries with retries remaining back to `Pending`.
    ///
    /// Entries at or above `max_retries` stay `Failed`. Returns how many
    /// entries were reset.
    async fn reset_failed(&self, max_retries: i32) -> Result<u64>;

    /// Returns stuck `Processing` entries to `Pending`.
    ///
    /// An entry claimed longer ago than `claim_timeout` belongs to a
    /// worker that died mid-publish. Reclaiming may cause a duplicate
    /// delivery; handlers are idempotent for exactly this reason.
    async fn reclaim_stuck(&self, claim_timeout: Duration) -> Result<u64>;

    /// Deletes `Processed` entries older than `retention`.
    async fn purge_processed(&self, retention: Duration) -> Result<u64>;

    /// Reads one entry by id.
    async fn get(&self, id: EventId) -> Result<Option<OutboxEntry>>;

    /// Counts entries per status.
    async fn status_counts(&self) -> Result<StatusCounts>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::RequestContext;
    use domain::event::EventPayload;

    #[derive(Serialize)]
    struct Noted {
        text: String,
    }

    impl EventPayload for Noted {
        fn event_type(&self) -> &'static str {
            "Noted"
        }
    }

    #[test]
    fn status_roundtrip() {
        for status in [
            OutboxStatus::Pending,
            OutboxStatus::Processing,
            OutboxStatus::Processed,
            OutboxStatus::Failed,
        ] {
            assert_eq!(OutboxStatus::parse(status.as_str()).unwrap(), status);
        }
        assert!(OutboxStatus::parse("DONE").is_err());
    }

    #[test]
    fn entry_carries_the_event_intact() {
        let event = DomainEvent::from_payload(
            AggregateId::new(),
            "Note",
            &Noted {
                text: "hello".to_string(),
            },
            &RequestContext::with_correlation("corr-9"),
        )
        .unwrap();

        let entry = OutboxEntry::from_event(&event).unwrap();
        assert_eq!(entry.id, event.event_id);
        assert_eq!(entry.status, OutboxStatus::Pending);
        assert_eq!(entry.retry_count, 0);
        assert_eq!(entry.created_at, event.occurred_at);

        let recovered = entry.to_event().unwrap();
        assert_eq!(recovered.event_id, event.event_id);
        assert_eq!(recovered.event_type, "Noted");
        assert_eq!(
            recovered.metadata.correlation_id.as_deref(),
            Some("corr-9")
        );
    }
}
