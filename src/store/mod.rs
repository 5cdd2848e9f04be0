pub mod disk;
pub mod memory;
pub mod repository;

use crate::core::cache::KeyValueCollection;
use crate::core::clock::Clock;
use anyhow::Context;
use chrono::{DateTime, Utc};
use disk::DiskCollection;
use fjall::{Keyspace, PartitionCreateOptions};
use memory::MemoryCollection;
use std::path::Path;
use std::time::Duration;
use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock},
};
use tracing::warn;

pub use repository::FjallRepository;

/// Opens (or creates) the fjall keyspace backing both the cache collections and the repository.
pub fn open_keyspace(path: &Path) -> anyhow::Result<Keyspace> {
    std::fs::create_dir_all(path)
        .with_context(|| format!("Failed to create data directory: {}", path.display()))?;
    fjall::Config::new(path.join("fjall_db"))
        .open()
        .with_context(|| format!("Failed to open data store at {}", path.display()))
}

pub(crate) fn expires_at(now: DateTime<Utc>, ttl: Option<Duration>) -> Option<DateTime<Utc>> {
    ttl.and_then(|d| chrono::Duration::from_std(d).ok())
        .and_then(|d| now.checked_add_signed(d))
}

/// Hands out named key-value collections.
///
/// Collections are persisted in the keyspace when one is available; otherwise, or when a
/// partition cannot be opened, they live in memory for the lifetime of the process.
pub struct KeyValueStore {
    collections: RwLock<HashMap<String, Arc<dyn KeyValueCollection>>>,
    keyspace: Option<Keyspace>,
    clock: Arc<dyn Clock>,
}

impl KeyValueStore {
    pub fn persistent(keyspace: Keyspace, clock: Arc<dyn Clock>) -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
            keyspace: Some(keyspace),
            clock,
        }
    }

    pub fn in_memory(clock: Arc<dyn Clock>) -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
            keyspace: None,
            clock,
        }
    }

    pub fn collection(&self, name: &str) -> Arc<dyn KeyValueCollection> {
        if let Some(existing) = self
            .collections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
        {
            return Arc::clone(existing);
        }

        let mut collections = self
            .collections
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let collection = collections
            .entry(name.to_string())
            .or_insert_with(|| self.create_collection(name));
        Arc::clone(collection)
    }

    fn create_collection(&self, name: &str) -> Arc<dyn KeyValueCollection> {
        if let Some(keyspace) = &self.keyspace {
            match keyspace.open_partition(name, PartitionCreateOptions::default()) {
                Ok(partition) => {
                    return Arc::new(DiskCollection::new(partition, Arc::clone(&self.clock)));
                }
                Err(e) => warn!(
                    collection = name,
                    error = %e,
                    "Failed to open persistent collection, falling back to memory"
                ),
            }
        }
        Arc::new(MemoryCollection::with_clock(Arc::clone(&self.clock)))
    }
}
