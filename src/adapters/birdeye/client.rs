//! Birdeye Metadata Client
//!
//! Fetches market statistics per token from the Birdeye public API:
//! `token_overview` for market cap, volume, holders and socials, an
//! optional `token_security` call for the creator's share of supply, and an
//! optional `history_price` call for the all-time high used by dip filters.
//!
//! Single attempt per call. Retry and backoff belong to the enricher, so
//! every failure is classified into a `MetadataError` here.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;

use super::types::{BirdeyeResponse, PriceHistory, TokenOverview, TokenSecurity};
use crate::domain::MetadataRecord;
use crate::ports::{MetadataError, MetadataSource};

pub const DEFAULT_BASE_URL: &str = "https://public-api.birdeye.so";

/// Candle size for price history
pub const DEFAULT_HISTORY_INTERVAL: &str = "1H";
/// How far back price history reaches when looking for the high
pub const DEFAULT_HISTORY_LOOKBACK: Duration = Duration::from_secs(7 * 24 * 3600);

/// Configuration for the BirdeyeMetadata client
#[derive(Debug, Clone)]
pub struct BirdeyeConfig {
    /// API base URL
    pub base_url: String,
    /// `X-API-KEY` header value
    pub api_key: String,
    /// `x-chain` header value
    pub chain: String,
    /// Request timeout
    pub timeout: Duration,
    /// Also query token_security for creator holdings
    pub fetch_security: bool,
    /// Also query history_price for the all-time high
    pub fetch_price_history: bool,
    pub history_interval: String,
    pub history_lookback: Duration,
}

impl Default for BirdeyeConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: String::new(),
            chain: "solana".to_string(),
            timeout: Duration::from_secs(30),
            fetch_security: true,
            fetch_price_history: false,
            history_interval: DEFAULT_HISTORY_INTERVAL.to_string(),
            history_lookback: DEFAULT_HISTORY_LOOKBACK,
        }
    }
}

/// Metadata source backed by Birdeye
#[derive(Debug, Clone)]
pub struct BirdeyeMetadata {
    config: BirdeyeConfig,
    http: Client,
}

impl BirdeyeMetadata {
    pub fn new(config: BirdeyeConfig) -> Result<Self, MetadataError> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| MetadataError::Permanent(format!("HTTP client: {}", e)))?;

        Ok(Self { config, http })
    }

    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    /// Fetch the token overview as a metadata record
    pub async fn get_token_overview(&self, mint: &str) -> Result<MetadataRecord, MetadataError> {
        let overview: TokenOverview = self.get("defi/token_overview", mint).await?;
        Ok(overview.into_record())
    }

    pub async fn get_token_security(&self, mint: &str) -> Result<TokenSecurity, MetadataError> {
        self.get("defi/token_security", mint).await
    }

    /// Price candles over the configured lookback, oldest first
    pub async fn get_price_history(&self, mint: &str) -> Result<PriceHistory, MetadataError> {
        let (from, to) = self.history_range(Utc::now().timestamp());
        let (from, to) = (from.to_string(), to.to_string());
        let params = [
            ("address", mint),
            ("address_type", "token"),
            ("type", self.config.history_interval.as_str()),
            ("time_from", from.as_str()),
            ("time_to", to.as_str()),
        ];
        self.get_with("defi/history_price", &params, mint).await
    }

    /// `[now - lookback, now]` in unix seconds
    fn history_range(&self, now: i64) -> (i64, i64) {
        let lookback = i64::try_from(self.config.history_lookback.as_secs()).unwrap_or(i64::MAX);
        (now.saturating_sub(lookback).max(0), now)
    }

    async fn get<T: DeserializeOwned>(&self, endpoint: &str, mint: &str) -> Result<T, MetadataError> {
        self.get_with(endpoint, &[("address", mint)], mint).await
    }

    async fn get_with<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        params: &[(&str, &str)],
        mint: &str,
    ) -> Result<T, MetadataError> {
        let url = format!("{}/{}", self.config.base_url.trim_end_matches('/'), endpoint);

        let response = self
            .http
            .get(&url)
            .query(params)
            .header("X-API-KEY", &self.config.api_key)
            .header("x-chain", &self.config.chain)
            .header("accept", "application/json")
            .send()
            .await
            .map_err(|e| MetadataError::Transient(format!("Request to {} failed: {}", endpoint, e)))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = parse_retry_after(response.headers());
            return Err(classify_status(status, retry_after, mint));
        }

        let text = response
            .text()
            .await
            .map_err(|e| MetadataError::Transient(format!("Failed to read body: {}", e)))?;

        parse_envelope(&text, mint)
    }
}

#[async_trait]
impl MetadataSource for BirdeyeMetadata {
    fn name(&self) -> &str {
        "birdeye"
    }

    async fn fetch_metadata(&self, id: &str) -> Result<MetadataRecord, MetadataError> {
        let mut record = self.get_token_overview(id).await?;

        if self.config.fetch_security {
            match self.get_token_security(id).await {
                Ok(security) => security.apply_to(&mut record),
                // throttling or outage should be retried as a whole
                Err(e) if e.is_retryable() => return Err(e),
                Err(e) => {
                    tracing::debug!("No security data for {}: {}", id, e);
                }
            }
        }

        if self.config.fetch_price_history {
            match self.get_price_history(id).await {
                Ok(history) => history.apply_to(&mut record),
                Err(e) if e.is_retryable() => return Err(e),
                Err(e) => {
                    tracing::debug!("No price history for {}: {}", id, e);
                }
            }
        }

        Ok(record)
    }
}

/// Map a non-success HTTP status to the error taxonomy
pub fn classify_status(status: StatusCode, retry_after: Option<Duration>, mint: &str) -> MetadataError {
    match status {
        StatusCode::NOT_FOUND => MetadataError::NotFound(mint.to_string()),
        StatusCode::TOO_MANY_REQUESTS => {
            tracing::warn!("Rate limited (429) by Birdeye, retry after {:?}", retry_after);
            MetadataError::RateLimited { retry_after }
        }
        StatusCode::REQUEST_TIMEOUT => MetadataError::Transient(format!("HTTP {}", status)),
        s if s.is_server_error() => MetadataError::Transient(format!("Server error: {}", s)),
        s => MetadataError::Permanent(format!("HTTP {}", s)),
    }
}

/// `Retry-After` in whole seconds (HTTP-date values are ignored)
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Decode a Birdeye envelope; `success: false` or missing data means no token
pub fn parse_envelope<T: DeserializeOwned>(text: &str, mint: &str) -> Result<T, MetadataError> {
    let envelope: BirdeyeResponse<T> = serde_json::from_str(text)
        .map_err(|e| MetadataError::Permanent(format!("Failed to parse JSON: {}", e)))?;

    match envelope.data {
        Some(data) if envelope.success => Ok(data),
        _ => Err(MetadataError::NotFound(format!(
            "{} ({})",
            mint,
            envelope.message.unwrap_or_else(|| "no data".into())
        ))),
    }
}
