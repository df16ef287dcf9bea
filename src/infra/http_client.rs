use crate::error::SourceError;
use reqwest::{Response, StatusCode};
use serde_json::Value;
use std::time::Duration;

const USER_AGENT: &str = concat!("company_enricher/", env!("CARGO_PKG_VERSION"));

/// Shared reqwest client. The per-call deadline is enforced by the governor,
/// this timeout only backs it up.
pub fn build_client(timeout: Duration) -> Result<reqwest::Client, SourceError> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout + Duration::from_secs(5))
        .gzip(true)
        .build()
        .map_err(|e| SourceError::Transient(format!("cannot build HTTP client: {}", e)))
}

/// Map a provider status code onto the source error taxonomy.
pub fn classify_status(status: StatusCode, context: &str) -> Option<SourceError> {
    if status.is_success() {
        return None;
    }
    let detail = format!("{} returned HTTP {}", context, status.as_u16());
    Some(match status.as_u16() {
        401 | 403 => SourceError::Authentication(detail),
        404 | 410 => SourceError::NotFound(detail),
        429 => SourceError::RateLimitViolation(detail),
        408 | 500..=599 => SourceError::Transient(detail),
        // LinkedIn answers throttled or blocked sessions with 999
        999 => SourceError::Transient(detail),
        _ => SourceError::InvalidResponse(detail),
    })
}

/// Check the status and decode a JSON body.
pub async fn json_body(response: Response, context: &str) -> Result<Value, SourceError> {
    if let Some(err) = classify_status(response.status(), context) {
        return Err(err);
    }
    let bytes = response.bytes().await?;
    Ok(serde_json::from_slice(&bytes)?)
}
