use dashmap::{mapref::entry::Entry, DashMap};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::time::Instant;

use super::{
    decode_fields, encode_fields, lease_key, record_key, LeaseToken, Lookup, SessionStore,
    StoreError,
};
use crate::server::models::SessionRecord;

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

struct StoredHash {
    fields: HashMap<String, String>,
    expires_at: Instant,
}

struct HeldLease {
    owner: LeaseToken,
    expires_at: Instant,
}

/// In-process stand-in for Redis, used for local runs and tests.
///
/// Expired entries are invisible to reads right away and physically removed
/// by a background sweep that stops once the store is dropped.
#[derive(Clone)]
pub struct MemorySessionStore {
    records: Arc<DashMap<String, StoredHash>>,
    leases: Arc<DashMap<String, HeldLease>>,
    key_prefix: String,
}

impl MemorySessionStore {
    pub fn new(key_prefix: impl Into<String>) -> Self {
        let store = Self {
            records: Arc::new(DashMap::new()),
            leases: Arc::new(DashMap::new()),
            key_prefix: key_prefix.into(),
        };

        // Spawn background cleanup task
        let records = Arc::downgrade(&store.records);
        let leases = Arc::downgrade(&store.leases);
        tokio::spawn(async move {
            sweep_expired(records, leases).await;
        });

        tracing::info!("In-memory session store initialized");
        store
    }

    /// Number of live records (for tests and monitoring)
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.records
            .iter()
            .filter(|entry| entry.expires_at > now)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remaining lifetime of a record, if it exists
    pub fn ttl(&self, session_id: &str) -> Option<Duration> {
        let key = record_key(&self.key_prefix, session_id);
        let now = Instant::now();
        self.records
            .get(&key)
            .filter(|entry| entry.expires_at > now)
            .map(|entry| entry.expires_at - now)
    }

    /// Overwrite a single hash field, bypassing record encoding
    #[cfg(test)]
    pub(crate) fn set_raw_field(&self, session_id: &str, field: &str, value: &str) {
        let key = record_key(&self.key_prefix, session_id);
        if let Some(mut entry) = self.records.get_mut(&key) {
            entry.fields.insert(field.to_string(), value.to_string());
        }
    }
}

#[async_trait::async_trait]
impl SessionStore for MemorySessionStore {
    async fn put(&self, record: &SessionRecord, ttl: Duration) -> Result<(), StoreError> {
        let key = record_key(&self.key_prefix, record.session_id());
        let fields = encode_fields(record)
            .into_iter()
            .map(|(name, value)| (name.to_string(), value))
            .collect();

        // Single insert under the shard lock: readers see the old or the new hash, never a mix
        self.records.insert(
            key,
            StoredHash {
                fields,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn get(&self, session_id: &str) -> Result<Lookup, StoreError> {
        let key = record_key(&self.key_prefix, session_id);
        let now = Instant::now();

        match self.records.get(&key) {
            Some(entry) if entry.expires_at > now => decode_fields(&entry.fields),
            _ => Ok(Lookup::Missing),
        }
    }

    async fn delete(&self, session_id: &str) -> Result<(), StoreError> {
        self.records
            .remove(&record_key(&self.key_prefix, session_id));
        Ok(())
    }

    async fn try_lease(
        &self,
        session_id: &str,
        hold: Duration,
    ) -> Result<Option<LeaseToken>, StoreError> {
        let key = lease_key(&self.key_prefix, session_id);
        let now = Instant::now();
        let lease = HeldLease {
            owner: LeaseToken::generate(),
            expires_at: now + hold,
        };
        let token = lease.owner.clone();

        let acquired = match self.leases.entry(key) {
            Entry::Occupied(mut held) => {
                if held.get().expires_at <= now {
                    held.insert(lease);
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(free) => {
                free.insert(lease);
                true
            }
        };
        Ok(acquired.then_some(token))
    }

    async fn release_lease(&self, session_id: &str, token: &LeaseToken) -> Result<(), StoreError> {
        self.leases.remove_if(&lease_key(&self.key_prefix, session_id), |_, held| {
            held.owner == *token
        });
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Background task that periodically drops expired records and leases
async fn sweep_expired(
    records: Weak<DashMap<String, StoredHash>>,
    leases: Weak<DashMap<String, HeldLease>>,
) {
    let mut interval = tokio::time::interval(SWEEP_INTERVAL);
    loop {
        interval.tick().await;
        let (Some(records), Some(leases)) = (records.upgrade(), leases.upgrade()) else {
            break;
        };

        let now = Instant::now();
        let initial_count = records.len();
        records.retain(|_, stored| stored.expires_at > now);
        leases.retain(|_, held| held.expires_at > now);

        let cleaned = initial_count.saturating_sub(records.len());
        if cleaned > 0 {
            tracing::debug!(
                "Cleaned up {} expired sessions, {} remaining",
                cleaned,
                records.len()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record(id: &str) -> SessionRecord {
        SessionRecord::from_parts(
            id.to_string(),
            "at".to_string(),
            "rt".to_string(),
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn test_put_get_delete() {
        let store = MemorySessionStore::new("test:");
        let record = record("SessionA");

        store.put(&record, Duration::from_secs(60)).await.unwrap();
        assert_eq!(store.get("SessionA").await.unwrap(), Lookup::Found(record));

        store.delete("SessionA").await.unwrap();
        assert_eq!(store.get("SessionA").await.unwrap(), Lookup::Missing);

        // deleting again is fine
        store.delete("SessionA").await.unwrap();
    }

    #[tokio::test]
    async fn test_lookup_is_case_insensitive() {
        let store = MemorySessionStore::new("test:");
        store
            .put(&record("MixedCase"), Duration::from_secs(60))
            .await
            .unwrap();

        assert!(matches!(
            store.get("mixedcase").await.unwrap(),
            Lookup::Found(_)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_record_expires_after_ttl_and_put_slides_it() {
        let store = MemorySessionStore::new("test:");
        let record = record("sliding");

        store.put(&record, Duration::from_secs(10)).await.unwrap();
        tokio::time::advance(Duration::from_secs(8)).await;

        // rewrite resets the clock
        store.put(&record, Duration::from_secs(10)).await.unwrap();
        tokio::time::advance(Duration::from_secs(8)).await;
        assert!(matches!(store.get("sliding").await.unwrap(), Lookup::Found(_)));

        tokio::time::advance(Duration::from_secs(3)).await;
        assert_eq!(store.get("sliding").await.unwrap(), Lookup::Missing);
    }

    #[tokio::test]
    async fn test_emptied_field_reads_as_incomplete() {
        let store = MemorySessionStore::new("test:");
        store
            .put(&record("partial"), Duration::from_secs(60))
            .await
            .unwrap();
        store.set_raw_field("partial", "ssid", "");

        assert_eq!(store.get("partial").await.unwrap(), Lookup::Incomplete);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lease_is_exclusive_until_released_or_expired() {
        let store = MemorySessionStore::new("test:");
        let hold = Duration::from_secs(5);

        let first = store.try_lease("s", hold).await.unwrap().unwrap();
        assert!(store.try_lease("S", hold).await.unwrap().is_none());

        store.release_lease("s", &first).await.unwrap();
        assert!(store.try_lease("s", hold).await.unwrap().is_some());

        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(store.try_lease("s", hold).await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_holder_cannot_release_successor_lease() {
        let store = MemorySessionStore::new("test:");
        let hold = Duration::from_secs(5);

        let late = store.try_lease("s", hold).await.unwrap().unwrap();
        tokio::time::advance(Duration::from_secs(6)).await;
        let current = store.try_lease("s", hold).await.unwrap().unwrap();
        assert_ne!(late, current);

        store.release_lease("s", &late).await.unwrap();
        assert!(store.try_lease("s", hold).await.unwrap().is_none());

        store.release_lease("s", &current).await.unwrap();
        assert!(store.try_lease("s", hold).await.unwrap().is_some());
    }
}
