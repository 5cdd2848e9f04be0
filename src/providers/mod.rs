//! Price sources for each supported asset class

pub mod caching;
pub mod cedears;
pub mod crypto;
pub mod equity;
pub mod util;

use crate::core::config::ProvidersConfig;
use crate::core::error::Result;
use crate::core::model::Category;
use crate::core::price::{PriceProvider, SourceKind};
use crate::store::KeyValueStore;
use caching::CachingPriceProvider;
use cedears::CedearsSource;
use crypto::CryptoSource;
use equity::EquitySource;

/// The closed set of price sources, each behind its own read-through price cache.
pub enum PriceSource {
    Equity(CachingPriceProvider<EquitySource>),
    DepositaryReceipt(CachingPriceProvider<CedearsSource>),
    Crypto(CachingPriceProvider<CryptoSource>),
}

impl PriceSource {
    /// Builds the source for `kind` with its configured timeout and price cache.
    pub fn build(
        kind: SourceKind,
        config: &ProvidersConfig,
        store: &KeyValueStore,
    ) -> anyhow::Result<Self> {
        let settings = config.for_kind(kind);
        let cache = store.collection(&format!("prices_{}", kind.id()));
        let ttl = settings.cache_ttl();
        Ok(match kind {
            SourceKind::Equity => PriceSource::Equity(CachingPriceProvider::new(
                EquitySource::new(settings)?,
                cache,
                ttl,
            )),
            SourceKind::DepositaryReceipt => PriceSource::DepositaryReceipt(
                CachingPriceProvider::new(CedearsSource::new(settings)?, cache, ttl),
            ),
            SourceKind::Crypto => PriceSource::Crypto(CachingPriceProvider::new(
                CryptoSource::new(settings)?,
                cache,
                ttl,
            )),
        })
    }

    /// One source per kind, in registry order.
    pub fn all(config: &ProvidersConfig, store: &KeyValueStore) -> anyhow::Result<Vec<Self>> {
        SourceKind::ALL
            .into_iter()
            .map(|kind| Self::build(kind, config, store))
            .collect()
    }

    fn provider(&self) -> &dyn PriceProvider {
        match self {
            PriceSource::Equity(p) => p,
            PriceSource::DepositaryReceipt(p) => p,
            PriceSource::Crypto(p) => p,
        }
    }

    pub fn kind(&self) -> SourceKind {
        self.provider().kind()
    }

    pub fn build_request_target(&self, base_endpoint: &str, code: &str) -> String {
        self.provider().build_request_target(base_endpoint, code)
    }

    /// Current price, served from the price cache while it is fresh.
    pub async fn fetch_price(&self, category: &Category, code: &str) -> Result<f64> {
        self.provider().fetch_price(category, code).await
    }

    /// Fetches from the provider regardless of the price cache.
    pub async fn refresh(&self, category: &Category, code: &str) -> Result<f64> {
        match self {
            PriceSource::Equity(p) => p.refresh(category, code).await,
            PriceSource::DepositaryReceipt(p) => p.refresh(category, code).await,
            PriceSource::Crypto(p) => p.refresh(category, code).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::SystemClock;
    use std::sync::Arc;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sources() -> Vec<PriceSource> {
        let store = KeyValueStore::in_memory(Arc::new(SystemClock));
        PriceSource::all(&ProvidersConfig::default(), &store).unwrap()
    }

    #[test]
    fn test_all_sources_in_registry_order() {
        let kinds: Vec<_> = sources().iter().map(PriceSource::kind).collect();
        assert_eq!(kinds, SourceKind::ALL.to_vec());
    }

    #[tokio::test]
    async fn test_fetch_is_cached_but_refresh_is_not() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/crypto"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(r#"{"symbol":"ETH","price":3500.0,"valid":true}"#),
            )
            .expect(2)
            .mount(&mock_server)
            .await;

        let sources = sources();
        let crypto = sources
            .iter()
            .find(|s| s.kind() == SourceKind::Crypto)
            .unwrap();
        let category = Category {
            id: "cat-crypto".into(),
            name: "Crypto".into(),
            source_endpoint: format!("{}/crypto", mock_server.uri()),
            currency: "ARS".into(),
        };

        assert_eq!(crypto.fetch_price(&category, "eth").await.unwrap(), 3500.0);
        assert_eq!(crypto.fetch_price(&category, "ETH").await.unwrap(), 3500.0);
        assert_eq!(crypto.refresh(&category, "ETH").await.unwrap(), 3500.0);
    }

    #[tokio::test]
    async fn test_same_code_in_two_categories_is_priced_separately() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/crypto"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"symbol":"BTC","price":90000000.0,"valid":true,"price_usd":65000.0}"#,
            ))
            .expect(2)
            .mount(&mock_server)
            .await;

        let sources = sources();
        let crypto = sources
            .iter()
            .find(|s| s.kind() == SourceKind::Crypto)
            .unwrap();
        let category = |id: &str, currency: &str| Category {
            id: id.into(),
            name: "Crypto".into(),
            source_endpoint: format!("{}/crypto", mock_server.uri()),
            currency: currency.into(),
        };
        let (ars, usd) = (category("cat-ars", "ARS"), category("cat-usd", "USD"));

        assert_eq!(crypto.fetch_price(&ars, "BTC").await.unwrap(), 90000000.0);
        assert_eq!(crypto.fetch_price(&usd, "BTC").await.unwrap(), 65000.0);
        // Both now cached under their own category
        assert_eq!(crypto.fetch_price(&ars, "BTC").await.unwrap(), 90000000.0);
        assert_eq!(crypto.fetch_price(&usd, "BTC").await.unwrap(), 65000.0);
    }
}
