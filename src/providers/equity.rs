use super::util::{http_client, positive_price, send};
use crate::core::config::SourceConfig;
use crate::core::error::{Error, Result};
use crate::core::model::Category;
use crate::core::price::{PriceProvider, SourceKind};
use async_trait::async_trait;
use regex::Regex;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, HeaderMap, HeaderValue, UPGRADE_INSECURE_REQUESTS};
use tracing::{debug, instrument};

const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

fn browser_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        ACCEPT,
        HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
    );
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.5"));
    headers.insert(UPGRADE_INSECURE_REQUESTS, HeaderValue::from_static("1"));
    headers
}

fn regex(pattern: &str) -> Result<Regex, String> {
    Regex::new(pattern).map_err(|e| format!("invalid pattern: {e}"))
}

fn parse_number(text: &str) -> Option<f64> {
    let cleaned: String = text
        .chars()
        .filter(|c| *c != ',' && !c.is_whitespace())
        .collect();
    cleaned.parse().ok()
}

/// Value of `name="..."` inside a tag's attribute list.
fn attribute<'a>(attrs: &'a str, name: &str) -> Option<&'a str> {
    let pattern = format!(r#"(?:^|\s){}\s*=\s*"([^"]*)""#, regex::escape(name));
    Regex::new(&pattern)
        .ok()?
        .captures(attrs)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

fn is_price_streamer(attrs: &str, symbol: &str) -> bool {
    attribute(attrs, "data-symbol").is_some_and(|s| s.eq_ignore_ascii_case(symbol))
        && attribute(attrs, "data-field") == Some("regularMarketPrice")
}

/// `<fin-streamer data-symbol="SYM" data-field="regularMarketPrice" data-value="N">`
fn from_streamer_attribute(html: &str, symbol: &str) -> Result<f64, String> {
    let tags = regex(r"<fin-streamer\b([^>]*)>")?;
    tags.captures_iter(html)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str())
        .filter(|attrs| is_price_streamer(attrs, symbol))
        .find_map(|attrs| {
            attribute(attrs, "data-value")
                .or_else(|| attribute(attrs, "value"))
                .and_then(parse_number)
        })
        .ok_or_else(|| format!("no fin-streamer value for {symbol}"))
}

/// `"regularMarketPrice":{"raw":N,"fmt":"..."}` embedded in a script block.
fn from_inline_json(html: &str) -> Result<f64, String> {
    let pattern = regex(r#""regularMarketPrice"\s*:\s*\{\s*"raw"\s*:\s*([0-9]+(?:\.[0-9]+)?)"#)?;
    pattern
        .captures(html)
        .and_then(|c| c.get(1))
        .and_then(|m| parse_number(m.as_str()))
        .ok_or_else(|| "no regularMarketPrice in embedded JSON".to_string())
}

/// Visible price text, either inside the symbol's price streamer or the quote header.
fn from_visible_text(html: &str, symbol: &str) -> Result<f64, String> {
    let streamers = regex(r"(?s)<fin-streamer\b([^>]*)>([^<]*)</fin-streamer>")?;
    let streamed = streamers
        .captures_iter(html)
        .filter(|c| c.get(1).is_some_and(|m| is_price_streamer(m.as_str(), symbol)))
        .find_map(|c| c.get(2).and_then(|m| parse_number(m.as_str())));
    if let Some(price) = streamed {
        return Ok(price);
    }

    let header = regex(r#"(?s)data-testid="qsp-price"[^>]*>\s*([0-9][0-9,]*(?:\.[0-9]+)?)\s*<"#)?;
    header
        .captures(html)
        .and_then(|c| c.get(1))
        .and_then(|m| parse_number(m.as_str()))
        .ok_or_else(|| format!("no visible price text for {symbol}"))
}

/// Tries each extractor in order; the first hit wins.
pub(crate) fn extract_price(html: &str, code: &str) -> Result<f64> {
    let symbol = code.to_uppercase();
    let mut failures = Vec::with_capacity(3);
    for extracted in [
        from_streamer_attribute(html, &symbol),
        from_inline_json(html),
        from_visible_text(html, &symbol),
    ] {
        match extracted {
            Ok(price) => return positive_price(code, price),
            Err(reason) => failures.push(reason),
        }
    }
    Err(Error::unavailable(
        code,
        format!("Could not extract price: {}", failures.join("; ")),
    ))
}

/// Scrapes the quote page of a Yahoo-style equity site.
pub struct EquitySource {
    client: reqwest::Client,
}

impl EquitySource {
    pub fn new(config: &SourceConfig) -> anyhow::Result<Self> {
        Ok(Self {
            client: http_client(config, BROWSER_USER_AGENT, browser_headers())?,
        })
    }
}

#[async_trait]
impl PriceProvider for EquitySource {
    fn kind(&self) -> SourceKind {
        SourceKind::Equity
    }

    fn build_request_target(&self, base_endpoint: &str, code: &str) -> String {
        let base = base_endpoint.trim();
        if base.contains("{symbol}") {
            return base.replace("{symbol}", code);
        }
        if base.contains("{code}") {
            return base.replace("{code}", code);
        }
        if base.ends_with("quote/") {
            format!("{base}{code}/")
        } else if base.ends_with("quote") {
            format!("{base}/{code}/")
        } else if base.ends_with('/') {
            format!("{base}{code}")
        } else {
            format!("{base}/{code}/")
        }
    }

    #[instrument(name = "EquityPriceFetch", skip(self, category), fields(code = %code))]
    async fn fetch_price(&self, category: &Category, code: &str) -> Result<f64> {
        let url = self.build_request_target(&category.source_endpoint, code);
        debug!("Requesting quote page from {}", url);

        let response = send(self.client.get(&url), code).await?;
        let html = response
            .text()
            .await
            .map_err(|e| Error::unavailable(code, format!("Failed to read response: {e}")))?;

        extract_price(&html, code)
    }
}
