use crate::types::SourceTag;
use thiserror::Error;

/// Failure of a single call against one external source.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SourceError {
    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("timed out after {after_secs}s")]
    Timeout { after_secs: u64 },

    #[error("transient failure: {0}")]
    Transient(String),

    #[error("provider rate limit hit: {0}")]
    RateLimitViolation(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl SourceError {
    /// Whether the governor should retry the call with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SourceError::Transient(_) | SourceError::Timeout { .. } | SourceError::InvalidResponse(_)
        )
    }

    /// Systemic failures abort the whole run instead of a single company/source pair.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SourceError::Authentication(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            SourceError::Authentication(_) => "authentication",
            SourceError::NotFound(_) => "not_found",
            SourceError::Timeout { .. } => "timeout",
            SourceError::Transient(_) => "transient",
            SourceError::RateLimitViolation(_) => "rate_limit_violation",
            SourceError::InvalidResponse(_) => "invalid_response",
        }
    }
}

impl From<reqwest::Error> for SourceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SourceError::Timeout { after_secs: 0 }
        } else if err.is_decode() {
            SourceError::InvalidResponse(err.to_string())
        } else {
            SourceError::Transient(err.to_string())
        }
    }
}

impl From<serde_json::Error> for SourceError {
    fn from(err: serde_json::Error) -> Self {
        SourceError::InvalidResponse(err.to_string())
    }
}

/// Run-level failures. Each one aborts the run with a non-zero exit; an
/// interrupt is reported through `RunSummary::interrupted` instead.
#[derive(Error, Debug)]
pub enum EnrichError {
    #[error("authentication failed for {source_tag}: {message}")]
    Authentication { source_tag: SourceTag, message: String },

    #[error("cannot persist progress: {0}")]
    Persistence(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Input error: {0}")]
    Input(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

pub type Result<T> = std::result::Result<T, EnrichError>;
