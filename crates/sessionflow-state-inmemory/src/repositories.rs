use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;
use async_trait::async_trait;

use sessionflow_core::{
    domain::repository::ContextStore,
    Clock, ContextKey, ContextRecord, CoreError, SystemClock,
};

/// In-memory implementation of the ContextStore.
///
/// Writes are whole-record upserts, so concurrent writers for one key end in
/// last-writer-wins. A record whose TTL has elapsed reads as absent and is
/// evicted on that read. Records nobody reads again stay until
/// [`purge_expired`](Self::purge_expired) sweeps them.
pub struct InMemoryContextStore {
    records: Arc<RwLock<HashMap<ContextKey, ContextRecord>>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryContextStore {
    /// Create an empty store using the given clock for TTL expiry
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
            clock,
        }
    }

    /// Drop every record whose TTL has elapsed, returning how many were dropped
    pub async fn purge_expired(&self) -> usize {
        let now = self.clock.now_millis();
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, record| !record.is_ttl_elapsed(now));
        let purged = before - records.len();
        if purged > 0 {
            debug!(purged, remaining = records.len(), "Purged expired contexts");
        }
        purged
    }

    /// Number of records held, expired or not
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// Whether the store holds no records
    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

impl Default for InMemoryContextStore {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

#[async_trait]
impl ContextStore for InMemoryContextStore {
    async fn get(&self, key: &ContextKey) -> Result<Option<ContextRecord>, CoreError> {
        let now = self.clock.now_millis();
        {
            let records = self.records.read().await;
            match records.get(key) {
                None => return Ok(None),
                Some(record) if !record.is_ttl_elapsed(now) => return Ok(Some(record.clone())),
                Some(_) => {}
            }
        }

        // Re-check under the write lock, a concurrent put may have refreshed it
        let mut records = self.records.write().await;
        match records.get(key) {
            Some(record) if !record.is_ttl_elapsed(now) => Ok(Some(record.clone())),
            Some(record) => {
                debug!(user_id = %key.user_id, ttl = record.ttl, "Evicting expired context");
                records.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn put(&self, record: &ContextRecord) -> Result<(), CoreError> {
        let mut records = self.records.write().await;
        records.insert(record.key(), record.clone());
        debug!(user_id = %record.user_id, ttl = record.ttl, "Stored context");
        Ok(())
    }
}
