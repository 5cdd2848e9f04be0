use crate::core::error::Result;
use async_trait::async_trait;
use std::time::Duration;

/// A named key-value collection with optional per-entry expiry.
///
/// Every operation reports an unreachable backing store as
/// [`Error::CacheUnavailable`](crate::core::error::Error::CacheUnavailable); callers decide
/// whether that degrades to a miss.
#[async_trait]
pub trait KeyValueCollection: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    async fn put(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()>;

    /// Removing an absent key is not an error.
    async fn remove(&self, key: &str) -> Result<()>;
}
