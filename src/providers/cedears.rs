use super::util::{append_query, http_client, positive_price, send};
use crate::core::config::SourceConfig;
use crate::core::error::{Error, Result};
use crate::core::model::Category;
use crate::core::price::{PriceProvider, SourceKind};
use async_trait::async_trait;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue};
use serde::Deserialize;
use tracing::{debug, instrument};

#[derive(Debug, Deserialize)]
struct CedearsResponse {
    #[serde(default)]
    symbol: Option<String>,
    price: f64,
    #[serde(default)]
    valid: bool,
    #[serde(default)]
    market: Option<String>,
}

/// Depositary receipts quoted by a JSON scraping service in local currency.
pub struct CedearsSource {
    client: reqwest::Client,
}

impl CedearsSource {
    pub fn new(config: &SourceConfig) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        Ok(Self {
            client: http_client(config, "HoldingSnapshots/1.0", headers)?,
        })
    }
}

#[async_trait]
impl PriceProvider for CedearsSource {
    fn kind(&self) -> SourceKind {
        SourceKind::DepositaryReceipt
    }

    fn build_request_target(&self, base_endpoint: &str, code: &str) -> String {
        append_query(
            base_endpoint,
            &[("symbol", code), ("market", "cedears"), ("currency", "ars")],
        )
    }

    #[instrument(name = "CedearsPriceFetch", skip(self, category), fields(code = %code))]
    async fn fetch_price(&self, category: &Category, code: &str) -> Result<f64> {
        let url = self.build_request_target(&category.source_endpoint, code);
        debug!("Requesting price data from {}", url);

        let response = send(self.client.get(&url), code).await?;
        let data: CedearsResponse = response
            .json()
            .await
            .map_err(|e| Error::unavailable(code, format!("Malformed response: {e}")))?;
        debug!(
            symbol = ?data.symbol,
            market = ?data.market,
            "Received depositary receipt quote"
        );

        if !data.valid {
            return Err(Error::not_found(code, "Reported as not valid by the provider"));
        }
        positive_price(code, data.price)
    }
}
