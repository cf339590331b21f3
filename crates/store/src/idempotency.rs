//! Idempotency cache for command deduplication.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct CacheSlot {
    value: serde_json::Value,
    expires_at: DateTime<Utc>,
}

/// Caches command responses by idempotency key.
///
/// A retried command with a known key gets the original response back
/// without re-running; the aggregate is not touched a second time. The
/// cache is process-local, so a retry landing on another instance will
/// re-execute. The version check still prevents a double mutation in
/// that case; only the duplicate-response guarantee weakens.
#[derive(Default)]
pub struct IdempotencyCache {
    entries: RwLock<HashMap<String, CacheSlot>>,
}

impl IdempotencyCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached response for a key, if present and not expired.
    pub async fn get_existing(&self, key: &str) -> Option<serde_json::Value> {
        let entries = self.entries.read().await;
        entries
            .get(key)
            .filter(|slot| slot.expires_at > Utc::now())
            .map(|slot| slot.value.clone())
    }

    /// Stores the response for a key.
    ///
    /// A second store under the same key overwrites; callers store once,
    /// after the command has committed.
    pub async fn store(&self, key: impl Into<String>, value: serde_json::Value, ttl: Duration) {
        let mut entries = self.entries.write().await;
        entries.insert(
            key.into(),
            CacheSlot {
                value,
                expires_at: Utc::now() + ttl,
            },
        );
    }

    /// Drops every expired slot. Returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, slot| slot.expires_at > now);
        before - entries.len()
    }

    /// Returns the number of live slots. Expired slots still waiting for
    /// a purge are counted.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}
