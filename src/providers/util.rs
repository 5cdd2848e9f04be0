use crate::core::config::SourceConfig;
use crate::core::error::{Error, Result};
use anyhow::Context;
use reqwest::header::HeaderMap;
use reqwest::{RequestBuilder, Response, StatusCode};
use tracing::debug;
use url::form_urlencoded;

/// Builds the HTTP client a source uses for every request.
///
/// # Parameters
/// - `config`: Timeout and optional user agent override
/// - `default_user_agent`: User agent sent when the config does not set one
/// - `headers`: Extra headers sent with every request
pub fn http_client(
    config: &SourceConfig,
    default_user_agent: &str,
    headers: HeaderMap,
) -> anyhow::Result<reqwest::Client> {
    let user_agent = config.user_agent.as_deref().unwrap_or(default_user_agent);
    reqwest::Client::builder()
        .user_agent(user_agent)
        .timeout(config.timeout())
        .default_headers(headers)
        .build()
        .context("Failed to build HTTP client")
}

/// Appends url-encoded query parameters, respecting any query the endpoint already carries.
pub fn append_query(base: &str, params: &[(&str, &str)]) -> String {
    let base = base.trim();
    let query = form_urlencoded::Serializer::new(String::new())
        .extend_pairs(params)
        .finish();
    let separator = if base.contains('?') { '&' } else { '?' };
    format!("{base}{separator}{query}")
}

/// Sends the request and turns transport failures and unsuccessful statuses into price errors.
///
/// A 404 means the provider does not know the instrument; every other failure is treated as the
/// source being unavailable.
pub async fn send(request: RequestBuilder, code: &str) -> Result<Response> {
    let response = request.send().await.map_err(|e| {
        if e.is_timeout() {
            Error::unavailable(code, format!("Request timed out: {e}"))
        } else {
            Error::unavailable(code, format!("Request error: {e}"))
        }
    })?;

    let status = response.status();
    debug!("Provider answered {} for {}", status, code);
    match status {
        StatusCode::NOT_FOUND => Err(Error::not_found(code, "Provider returned 404")),
        s if !s.is_success() => Err(Error::unavailable(code, format!("HTTP error: {s}"))),
        _ => Ok(response),
    }
}

/// Rejects zero, negative and non-finite prices instead of letting them through silently.
pub fn positive_price(code: &str, price: f64) -> Result<f64> {
    if price.is_finite() && price > 0.0 {
        Ok(price)
    } else {
        Err(Error::unavailable(
            code,
            format!("Provider returned a non-positive price: {price}"),
        ))
    }
}
