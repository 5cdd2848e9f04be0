use crate::core::cache::KeyValueCollection;
use crate::core::error::Result;
use crate::core::model::Category;
use crate::core::price::{PriceProvider, SourceKind};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

// Read-through price cache for PriceProvider
#[derive(Clone)]
pub struct CachingPriceProvider<T: PriceProvider> {
    inner: T,
    cache: Arc<dyn KeyValueCollection>,
    ttl: Duration,
}

impl<T: PriceProvider> CachingPriceProvider<T> {
    pub fn new(inner: T, cache: Arc<dyn KeyValueCollection>, ttl: Duration) -> Self {
        Self { inner, cache, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Always asks the provider, then refreshes the cached price on success.
    pub async fn refresh(&self, category: &Category, code: &str) -> Result<f64> {
        let price = self.inner.fetch_price(category, code).await?;
        self.store(&self.inner.cache_key(category, code), price).await;
        Ok(price)
    }

    async fn cached(&self, key: &str) -> Option<f64> {
        match self.cache.get(key).await {
            Ok(Some(raw)) => match serde_json::from_slice::<f64>(&raw) {
                Ok(price) => Some(price),
                Err(e) => {
                    debug!("Ignoring unreadable cached price for {}: {}", key, e);
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!(key, error = %e, "Price cache unavailable, fetching from provider");
                None
            }
        }
    }

    async fn store(&self, key: &str, price: f64) {
        let stored = match serde_json::to_vec(&price) {
            Ok(raw) => self.cache.put(key, &raw, Some(self.ttl)).await,
            Err(e) => Err(e.into()),
        };
        if let Err(e) = stored {
            warn!(key, error = %e, "Failed to cache price");
        }
    }
}

#[async_trait]
impl<T: PriceProvider> PriceProvider for CachingPriceProvider<T> {
    fn kind(&self) -> SourceKind {
        self.inner.kind()
    }

    fn build_request_target(&self, base_endpoint: &str, code: &str) -> String {
        self.inner.build_request_target(base_endpoint, code)
    }

    fn cache_key(&self, category: &Category, code: &str) -> String {
        self.inner.cache_key(category, code)
    }

    async fn fetch_price(&self, category: &Category, code: &str) -> Result<f64> {
        let key = self.inner.cache_key(category, code);
        if let Some(price) = self.cached(&key).await {
            debug!("Cache hit for price: {}", key);
            return Ok(price);
        }
        debug!("Cache miss for price: {}", key);
        self.refresh(category, code).await
    }
}
