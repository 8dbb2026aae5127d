use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use crate::domain::MetadataRecord;

/// Metadata lookup error, classified so callers can pick retry vs. drop
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MetadataError {
    /// Upstream answered but has no data for this token
    #[error("Token not found: {0}")]
    NotFound(String),

    /// HTTP 429 or provider-specific throttling
    #[error("Rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    /// Timeout, transport failure, 5xx
    #[error("Transient upstream failure: {0}")]
    Transient(String),

    /// Malformed payload, 4xx other than 404/429
    #[error("Permanent upstream failure: {0}")]
    Permanent(String),
}

impl MetadataError {
    /// Whether another attempt might succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MetadataError::RateLimited { .. } | MetadataError::Transient(_)
        )
    }

    /// Whether this failure says something about upstream health
    pub fn counts_toward_breaker(&self) -> bool {
        !matches!(self, MetadataError::NotFound(_))
    }
}

/// Metadata source port: one lookup per candidate id
#[async_trait]
pub trait MetadataSource: Send + Sync {
    /// Provider name for logs
    fn name(&self) -> &str;

    /// Fetch market statistics for one token
    async fn fetch_metadata(&self, id: &str) -> Result<MetadataRecord, MetadataError>;
}
