use super::expires_at;
use crate::core::cache::KeyValueCollection;
use crate::core::clock::{Clock, SystemClock};
use crate::core::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

struct CacheValue {
    value: Vec<u8>,
    expires_at: Option<DateTime<Utc>>,
}

/// In-memory collection, used when no persistent keyspace is available and in tests.
pub struct MemoryCollection {
    inner: Mutex<HashMap<String, CacheValue>>,
    clock: Arc<dyn Clock>,
}

impl MemoryCollection {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
            clock,
        }
    }
}

impl Default for MemoryCollection {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyValueCollection for MemoryCollection {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut cache = self.inner.lock().await;
        if let Some(entry) = cache.get(key) {
            if entry.expires_at.is_some_and(|at| at <= self.clock.now()) {
                debug!("Cache entry expired for key: {}", key);
                cache.remove(key);
                return Ok(None);
            }
            debug!("Cache HIT for key: {}", key);
            return Ok(Some(entry.value.clone()));
        }
        debug!("Cache MISS for key: {}", key);
        Ok(None)
    }

    async fn put(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()> {
        let entry = CacheValue {
            value: value.to_vec(),
            expires_at: expires_at(self.clock.now(), ttl),
        };
        let now = self.clock.now();
        let mut cache = self.inner.lock().await;
        cache.retain(|_, v| v.expires_at.is_none_or(|at| at > now));
        debug!("Cache PUT for key: {}", key);
        cache.insert(key.to_string(), entry);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let mut cache = self.inner.lock().await;
        cache.remove(key);
        debug!("Cache REMOVE for key: {}", key);
        Ok(())
    }
}
