//! Bounded ledger of applied event ids.

use std::collections::{HashSet, VecDeque};

use common::EventId;
use tokio::sync::Mutex;

#[derive(Default)]
struct LedgerInner {
    seen: HashSet<EventId>,
    order: VecDeque<EventId>,
}

/// Remembers the last N event ids a projection has applied.
///
/// Bounded so it cannot grow without limit; when full, the oldest id is
/// forgotten first. A duplicate arriving after its id has been evicted
/// will be applied again, which is why duplicates are expected to
/// cluster near their original delivery (relay retries, reclaimed
/// claims) rather than arrive arbitrarily late.
///
/// The ledger is process-local. After a restart it starts empty and the
/// whole view is rebuilt anyway, so nothing is lost.
pub struct ProcessedLedger {
    capacity: usize,
    inner: Mutex<LedgerInner>,
}

impl ProcessedLedger {
    /// Default number of remembered event ids.
    pub const DEFAULT_CAPACITY: usize = 10_000;

    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(LedgerInner::default()),
        }
    }

    /// Returns true if the id is remembered as already applied.
    pub async fn contains(&self, id: EventId) -> bool {
        self.inner.lock().await.seen.contains(&id)
    }

    /// Records an id, evicting the oldest when at capacity.
    ///
    /// Called only after the event applied successfully, so a failed
    /// apply can be redelivered without being mistaken for a duplicate.
    pub async fn record(&self, id: EventId) {
        let mut inner = self.inner.lock().await;
        if !inner.seen.insert(id) {
            return;
        }
        inner.order.push_back(id);
        while inner.order.len() > self.capacity {
            if let Some(evicted) = inner.order.pop_front() {
                inner.seen.remove(&evicted);
            }
        }
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.order.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.order.is_empty()
    }

    pub async fn clear(&self) {
        let mut inner = self.inner.lock().await;
        inner.seen.clear();
        inner.order.clear();
    }
}

impl Default for ProcessedLedger {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_and_remembers_ids() {
        let ledger = ProcessedLedger::new(10);
        let id = EventId::new();

        assert!(!ledger.contains(id).await);
        ledger.record(id).await;
        assert!(ledger.contains(id).await);
        assert_eq!(ledger.len().await, 1);
    }

    #[tokio::test]
    async fn recording_twice_does_not_double_count() {
        let ledger = ProcessedLedger::new(10);
        let id = EventId::new();
        ledger.record(id).await;
        ledger.record(id).await;
        assert_eq!(ledger.len().await, 1);
    }

    #[tokio::test]
    async fn oldest_id_is_evicted_at_capacity() {
        let ledger = ProcessedLedger::new(2);
        let first = EventId::new();
        let second = EventId::new();
        let third = EventId::new();

        ledger.record(first).await;
        ledger.record(second).await;
        ledger.record(third).await;

        assert!(!ledger.contains(first).await);
        assert!(ledger.contains(second).await);
        assert!(ledger.contains(third).await);
        assert_eq!(ledger.len().await, 2);
    }
}
