use super::expires_at;
use crate::core::cache::KeyValueCollection;
use crate::core::clock::Clock;
use crate::core::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fjall::PartitionHandle;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

/// Expired entries are swept from the partition once every this many writes.
const SWEEP_EVERY_PUTS: usize = 64;

#[derive(Serialize, Deserialize)]
struct CacheEntry {
    value: Vec<u8>,
    expires_at: Option<DateTime<Utc>>,
}

fn unavailable(e: impl std::fmt::Display) -> Error {
    Error::CacheUnavailable(e.to_string())
}

/// Collection persisted in a fjall partition, shared across restarts.
pub struct DiskCollection {
    partition: PartitionHandle,
    clock: Arc<dyn Clock>,
    puts: AtomicUsize,
}

impl DiskCollection {
    pub fn new(partition: PartitionHandle, clock: Arc<dyn Clock>) -> Self {
        Self {
            partition,
            clock,
            puts: AtomicUsize::new(0),
        }
    }

    /// Drops every expired or unreadable entry and returns how many were removed.
    pub fn sweep_expired(&self) -> Result<usize> {
        let now = self.clock.now();
        let mut stale = Vec::new();
        for item in self.partition.iter() {
            let (key, raw) = item.map_err(unavailable)?;
            let expired = serde_json::from_slice::<CacheEntry>(&raw)
                .map_or(true, |entry| entry.expires_at.is_some_and(|at| at <= now));
            if expired {
                stale.push(key);
            }
        }

        let removed = stale.len();
        for key in stale {
            self.partition.remove(key).map_err(unavailable)?;
        }
        if removed > 0 {
            debug!("Swept {} expired cache entries", removed);
        }
        Ok(removed)
    }
}

#[async_trait]
impl KeyValueCollection for DiskCollection {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let Some(raw) = self.partition.get(key).map_err(unavailable)? else {
            debug!("Cache MISS for key: {}", key);
            return Ok(None);
        };

        let entry: CacheEntry = match serde_json::from_slice(&raw) {
            Ok(entry) => entry,
            Err(e) => {
                debug!("Dropping unreadable cache entry for key {}: {}", key, e);
                self.partition.remove(key).map_err(unavailable)?;
                return Ok(None);
            }
        };

        if entry.expires_at.is_some_and(|at| at <= self.clock.now()) {
            debug!("Cache entry expired for key: {}", key);
            self.partition.remove(key).map_err(unavailable)?;
            return Ok(None);
        }

        debug!("Cache HIT for key: {}", key);
        Ok(Some(entry.value))
    }

    async fn put(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()> {
        let entry = CacheEntry {
            value: value.to_vec(),
            expires_at: expires_at(self.clock.now(), ttl),
        };
        let bytes = serde_json::to_vec(&entry).map_err(unavailable)?;
        self.partition.insert(key, bytes).map_err(unavailable)?;
        debug!("Cache PUT for key: {}", key);

        if self.puts.fetch_add(1, Ordering::Relaxed) % SWEEP_EVERY_PUTS == 0 {
            if let Err(e) = self.sweep_expired() {
                warn!(error = %e, "Failed to sweep expired cache entries");
            }
        }
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.partition.remove(key).map_err(unavailable)?;
        debug!("Cache REMOVE for key: {}", key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::ManualClock;
    use crate::store::open_keyspace;
    use fjall::PartitionCreateOptions;
    use tempfile::tempdir;

    fn collection(path: &std::path::Path, clock: Arc<dyn Clock>) -> DiskCollection {
        let keyspace = open_keyspace(path).unwrap();
        let partition = keyspace
            .open_partition("test", PartitionCreateOptions::default())
            .unwrap();
        DiskCollection::new(partition, clock)
    }

    #[tokio::test]
    async fn test_disk_cache_get_put_remove() {
        let dir = tempdir().unwrap();
        let cache = collection(dir.path(), Arc::new(ManualClock::new(Utc::now())));

        assert!(cache.get("key1").await.unwrap().is_none());

        cache.put("key1", b"123", None).await.unwrap();
        assert_eq!(cache.get("key1").await.unwrap(), Some(b"123".to_vec()));

        cache.remove("key1").await.unwrap();
        assert!(cache.get("key1").await.unwrap().is_none());
        cache.remove("never-there").await.unwrap();
    }

    #[tokio::test]
    async fn test_disk_cache_ttl_expiration() {
        let dir = tempdir().unwrap();
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let cache = collection(dir.path(), clock.clone());

        cache
            .put("key1", b"123", Some(Duration::from_secs(2 * 60 * 60)))
            .await
            .unwrap();
        clock.advance(chrono::Duration::minutes(119));
        assert!(cache.get("key1").await.unwrap().is_some());

        clock.advance(chrono::Duration::minutes(1));
        assert!(cache.get("key1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expired_entries_are_swept_without_reads() {
        let dir = tempdir().unwrap();
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let cache = collection(dir.path(), clock.clone());

        cache
            .put("stale", b"1", Some(Duration::from_secs(60)))
            .await
            .unwrap();
        cache.put("kept", b"2", None).await.unwrap();
        clock.advance(chrono::Duration::seconds(61));

        // Periodic sweep triggered by writes alone
        for i in 2..=SWEEP_EVERY_PUTS {
            cache.put(&format!("k{i}"), b"x", None).await.unwrap();
        }
        assert!(cache.partition.get("stale").unwrap().is_none());
        assert!(cache.partition.get("kept").unwrap().is_some());

        cache
            .put("short", b"3", Some(Duration::from_secs(1)))
            .await
            .unwrap();
        clock.advance(chrono::Duration::seconds(2));
        assert_eq!(cache.sweep_expired().unwrap(), 1);
        assert_eq!(cache.sweep_expired().unwrap(), 0);
    }
}
