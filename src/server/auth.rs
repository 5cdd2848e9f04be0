use super::AppState;
use super::error::ApiError;
use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use tracing::warn;

/// Compares in time independent of where the inputs first differ.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Accepts the key as the raw `Authorization` value or as a bearer token.
fn presented_key(header: &str) -> &str {
    let header = header.trim();
    header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .unwrap_or(header)
}

pub async fn require_api_key(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let presented = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .map(presented_key)
        .ok_or(ApiError::Unauthorized)?;

    if !constant_time_eq(presented.as_bytes(), state.api_key.as_bytes()) {
        warn!(path = %request.uri().path(), "Rejected request with invalid API key");
        return Err(ApiError::Unauthorized);
    }
    Ok(next.run(request).await)
}
