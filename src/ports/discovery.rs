use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use thiserror::Error;

use crate::domain::Feed;

/// Discovery source error type
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DiscoveryError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Upstream returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Upstream query error: {0}")]
    Upstream(String),

    #[error("Response parsing error: {0}")]
    ParseError(String),

    #[error("Source not configured: {0}")]
    NotConfigured(String),
}

/// One discovery query: everything created/active since `since`, at most `limit` records
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryQuery {
    pub since: DateTime<Utc>,
    pub limit: usize,
}

impl DiscoveryQuery {
    pub fn new(since: DateTime<Utc>, limit: usize) -> Self {
        Self { since, limit }
    }

    /// ISO-8601 "since" timestamp as sent upstream (`2024-01-01T00:00:00Z`)
    pub fn since_iso(&self) -> String {
        self.since.to_rfc3339_opts(SecondsFormat::Secs, true)
    }
}

/// Discovery source port
///
/// Returns raw, loosely-typed records; the fetcher owns parsing so that a
/// single malformed record never poisons a whole response.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DiscoverySource: Send + Sync {
    /// Feed this source produces
    fn feed(&self) -> Feed;

    /// Run one discovery query
    async fn fetch_raw(&self, query: &DiscoveryQuery) -> Result<Vec<Value>, DiscoveryError>;
}
