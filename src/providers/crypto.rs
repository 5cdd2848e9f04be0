use super::util::{append_query, http_client, positive_price, send};
use crate::core::config::SourceConfig;
use crate::core::error::{Error, Result};
use crate::core::model::Category;
use crate::core::price::{PriceProvider, SourceKind};
use async_trait::async_trait;
use reqwest::header::{ACCEPT, HeaderMap, HeaderName, HeaderValue};
use serde::Deserialize;
use tracing::{debug, instrument};

#[derive(Debug, Deserialize)]
struct CryptoResponse {
    #[serde(default)]
    symbol: Option<String>,
    price: f64,
    #[serde(default)]
    valid: bool,
    #[serde(default)]
    price_usd: Option<f64>,
    #[serde(default)]
    market_cap: Option<f64>,
    #[serde(default)]
    volume_24h: Option<f64>,
}

impl CryptoResponse {
    /// USD-denominated categories prefer the explicit USD quote when there is one.
    fn price_in(&self, currency: &str) -> f64 {
        match self.price_usd {
            Some(usd) if usd > 0.0 && currency.eq_ignore_ascii_case("USD") => usd,
            _ => self.price,
        }
    }
}

pub struct CryptoSource {
    client: reqwest::Client,
}

impl CryptoSource {
    pub fn new(config: &SourceConfig) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(
            HeaderName::from_static("x-requested-with"),
            HeaderValue::from_static("XMLHttpRequest"),
        );
        Ok(Self {
            client: http_client(config, "HoldingSnapshots-CryptoBot/1.0", headers)?,
        })
    }
}

#[async_trait]
impl PriceProvider for CryptoSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Crypto
    }

    fn build_request_target(&self, base_endpoint: &str, code: &str) -> String {
        append_query(
            base_endpoint,
            &[
                ("symbol", code.to_uppercase().as_str()),
                ("convert", "USD,ARS"),
                ("include_market_data", "true"),
            ],
        )
    }

    fn cache_key(&self, category: &Category, code: &str) -> String {
        format!("{}:{}", category.id, code.trim().to_uppercase())
    }

    #[instrument(name = "CryptoPriceFetch", skip(self, category), fields(code = %code))]
    async fn fetch_price(&self, category: &Category, code: &str) -> Result<f64> {
        let url = self.build_request_target(&category.source_endpoint, code);
        debug!("Requesting price data from {}", url);

        let response = send(self.client.get(&url), code).await?;
        let data: CryptoResponse = response
            .json()
            .await
            .map_err(|e| Error::unavailable(code, format!("Malformed response: {e}")))?;
        debug!(
            symbol = ?data.symbol,
            market_cap = ?data.market_cap,
            volume_24h = ?data.volume_24h,
            "Received crypto quote"
        );

        if !data.valid {
            return Err(Error::not_found(code, "Reported as not valid by the provider"));
        }
        positive_price(code, data.price_in(&category.currency))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn source() -> CryptoSource {
        CryptoSource::new(&SourceConfig::defaults_for(SourceKind::Crypto)).unwrap()
    }

    fn category(endpoint: &str, currency: &str) -> Category {
        Category {
            id: "cat-crypto".into(),
            name: "Crypto".into(),
            source_endpoint: endpoint.into(),
            currency: currency.into(),
        }
    }

    async fn mock_quote(body: &str) -> MockServer {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/crypto"))
            .and(query_param("symbol", "BTC"))
            .and(query_param("include_market_data", "true"))
            .and(header("x-requested-with", "XMLHttpRequest"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&mock_server)
            .await;
        mock_server
    }

    const QUOTE: &str = r#"{"symbol":"BTC","price":98000000.0,"valid":true,"price_usd":65000.5,"market_cap":1280000000000,"volume_24h":31000000000.0}"#;

    #[test]
    fn test_build_request_target_uppercases() {
        assert_eq!(
            source().build_request_target("https://api.example.com/crypto", "eth"),
            "https://api.example.com/crypto?symbol=ETH&convert=USD%2CARS&include_market_data=true"
        );
        let category = category("https://api.example.com/crypto", "USD");
        assert_eq!(source().cache_key(&category, " eth"), "cat-crypto:ETH");
    }

    #[tokio::test]
    async fn test_usd_category_prefers_usd_price() {
        let mock_server = mock_quote(QUOTE).await;
        let category = category(&format!("{}/crypto", mock_server.uri()), "USD");

        let price = source().fetch_price(&category, "btc").await.unwrap();
        assert_eq!(price, 65000.5);
    }

    #[tokio::test]
    async fn test_other_currency_uses_price() {
        let mock_server = mock_quote(QUOTE).await;
        let category = category(&format!("{}/crypto", mock_server.uri()), "ARS");

        let price = source().fetch_price(&category, "BTC").await.unwrap();
        assert_eq!(price, 98000000.0);
    }

    #[tokio::test]
    async fn test_invalid_symbol_is_not_found() {
        let mock_server = mock_quote(r#"{"symbol":"BTC","price":0,"valid":false}"#).await;
        let category = category(&format!("{}/crypto", mock_server.uri()), "USD");

        let result = source().fetch_price(&category, "BTC").await;
        assert!(matches!(result, Err(Error::InstrumentNotFound { .. })));
    }

    #[tokio::test]
    async fn test_server_error_is_unavailable() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&mock_server)
            .await;
        let category = category(&format!("{}/crypto", mock_server.uri()), "USD");

        let result = source().fetch_price(&category, "BTC").await;
        assert!(matches!(result, Err(Error::SourceUnavailable { .. })));
    }
}
