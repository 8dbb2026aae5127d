//! Candidate Fetcher
//!
//! Turns one discovery query into a list of `Candidate`s. Parsing is
//! per-record: a malformed record is dropped with a warning, the rest of
//! the response survives.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use thiserror::Error;

use crate::domain::candidate::non_negative as non_negative_metric;
use crate::domain::{Candidate, Feed};
use crate::ports::{DiscoveryQuery, DiscoverySource};

/// Hard cap on results requested per query
pub const MAX_RESULT_LIMIT: usize = 100;

/// Unix timestamps above this are treated as milliseconds
const MILLIS_THRESHOLD: i64 = 100_000_000_000;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum WindowError {
    #[error("Lookback must be greater than zero")]
    ZeroLookback,

    #[error("max_results must be between 1 and {max}, got {value}")]
    InvalidLimit { value: usize, max: usize },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("Record is not a JSON object")]
    NotAnObject,

    #[error("Record has no mint/address/id")]
    MissingId,
}

/// Time window and result cap for one fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchWindow {
    lookback: Duration,
    max_results: usize,
}

impl FetchWindow {
    pub fn new(lookback: Duration, max_results: usize) -> Result<Self, WindowError> {
        if lookback.is_zero() {
            return Err(WindowError::ZeroLookback);
        }
        if max_results == 0 || max_results > MAX_RESULT_LIMIT {
            return Err(WindowError::InvalidLimit {
                value: max_results,
                max: MAX_RESULT_LIMIT,
            });
        }
        Ok(Self { lookback, max_results })
    }

    pub fn lookback(&self) -> Duration {
        self.lookback
    }

    pub fn max_results(&self) -> usize {
        self.max_results
    }

    /// Start of the window relative to `now`
    pub fn since(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        chrono::Duration::from_std(self.lookback)
            .ok()
            .and_then(|d| now.checked_sub_signed(d))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

/// Parse one raw discovery record.
///
/// Only the identifier is required; everything else falls back to the
/// candidate defaults.
pub fn parse_candidate(raw: &Value, feed: Feed) -> Result<Candidate, ParseError> {
    if !raw.is_object() {
        return Err(ParseError::NotAnObject);
    }

    let id = first_str(raw, &["mint", "address", "id"]).ok_or(ParseError::MissingId)?;
    let mut candidate = Candidate::new(id, feed);

    if let Some(name) = first_str(raw, &["name"]) {
        candidate.name = name.to_string();
    }
    if let Some(symbol) = first_str(raw, &["symbol"]) {
        candidate.symbol = symbol.to_string();
    }
    candidate.deployer =
        first_str(raw, &["deployer", "update_authority", "creator"]).map(str::to_string);
    candidate.created_at = first(raw, &["created_at", "createdAt", "block_time"]).and_then(parse_timestamp);
    if let Some(supply) = first_f64(raw, &["supply", "total_supply"]).filter(|s| *s > 0.0) {
        candidate.supply = supply;
    }

    let m = &mut candidate.metrics;
    if let Some(v) = first_f64(raw, &["market_cap", "marketCap", "mc"]) {
        m.market_cap = non_negative_metric(v);
    }
    if let Some(v) = first_f64(raw, &["volume_24h", "volume24h", "v24hUSD"]) {
        m.volume_24h = non_negative_metric(v);
    }
    if let Some(v) = first_f64(raw, &["liquidity"]) {
        m.liquidity = non_negative_metric(v);
    }
    if let Some(v) = first_f64(raw, &["price_usd", "price"]) {
        m.price_usd = non_negative_metric(v);
    }
    if let Some(v) = first_f64(raw, &["holder_count", "holderCount", "holders"]) {
        m.holder_count = non_negative_metric(v) as u64;
    }
    if let Some(v) = first_f64(raw, &["buy_count_24h", "buyCount24h", "buys"]) {
        m.buy_count_24h = non_negative_metric(v) as u64;
    }
    if let Some(v) = first_f64(raw, &["dev_holding_pct", "devHoldingPercent"]) {
        m.dev_holding_pct = Some(non_negative_metric(v));
    }
    if let Some(v) = first_f64(raw, &["ath_usd", "ath"]) {
        m.ath_usd = Some(non_negative_metric(v));
    }
    if let Some(Value::Array(links)) = raw.get("socials") {
        m.socials = links
            .iter()
            .filter_map(Value::as_str)
            .filter(|s| !s.trim().is_empty())
            .map(str::to_string)
            .collect();
    }

    Ok(candidate)
}

fn first<'a>(raw: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|k| raw.get(*k))
        .find(|v| !v.is_null())
}

fn first_str<'a>(raw: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .filter_map(|k| raw.get(*k).and_then(Value::as_str))
        .map(str::trim)
        .find(|s| !s.is_empty())
}

/// Numbers arrive as JSON numbers or numeric strings depending on provider
fn first_f64(raw: &Value, keys: &[&str]) -> Option<f64> {
    keys.iter().filter_map(|k| raw.get(*k)).find_map(as_f64)
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|v| v.is_finite())
}

fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.with_timezone(&Utc));
            }
            s.parse::<i64>().ok().and_then(from_unix)
        }
        Value::Number(n) => n.as_i64().and_then(from_unix),
        _ => None,
    }
}

fn from_unix(ts: i64) -> Option<DateTime<Utc>> {
    if ts.abs() >= MILLIS_THRESHOLD {
        Utc.timestamp_millis_opt(ts).single()
    } else {
        Utc.timestamp_opt(ts, 0).single()
    }
}

/// Fetches and parses candidates from one discovery source
pub struct CandidateFetcher {
    source: Arc<dyn DiscoverySource>,
}

impl CandidateFetcher {
    pub fn new(source: Arc<dyn DiscoverySource>) -> Self {
        Self { source }
    }

    pub fn feed(&self) -> Feed {
        self.source.feed()
    }

    /// Fetch candidates created (or active) inside `window`.
    ///
    /// Never fails: a failed query yields an empty list.
    pub async fn fetch_candidates(&self, window: &FetchWindow, cycle_id: &str) -> Vec<Candidate> {
        let feed = self.source.feed();
        let query = DiscoveryQuery::new(window.since(Utc::now()), window.max_results());

        tracing::debug!(
            cycle_id,
            "Querying {} feed since {} (limit {})",
            feed,
            query.since_iso(),
            query.limit
        );

        let records = match self.source.fetch_raw(&query).await {
            Ok(records) => records,
            Err(e) => {
                tracing::error!(cycle_id, "Failed to fetch {} candidates: {}", feed, e);
                return Vec::new();
            }
        };

        let total = records.len();
        let mut seen = HashSet::new();
        let mut candidates = Vec::with_capacity(total.min(window.max_results()));

        for raw in &records {
            if candidates.len() >= window.max_results() {
                break;
            }
            match parse_candidate(raw, feed) {
                Ok(candidate) => {
                    if seen.insert(candidate.id().to_string()) {
                        candidates.push(candidate);
                    }
                }
                Err(e) => {
                    tracing::warn!(cycle_id, "Dropping {} record: {}", feed, e);
                }
            }
        }

        tracing::info!(
            cycle_id,
            "Fetched {} {} candidates ({} raw records)",
            candidates.len(),
            feed,
            total
        );
        candidates
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EnrichmentState, Metrics, DEFAULT_SUPPLY, UNNAMED};
    use crate::ports::discovery::MockDiscoverySource;
    use crate::ports::DiscoveryError;
    use approx::assert_relative_eq;
    use serde_json::json;

    fn window(limit: usize) -> FetchWindow {
        FetchWindow::new(Duration::from_secs(600), limit).unwrap()
    }

    fn source_returning(records: Vec<Value>) -> Arc<dyn DiscoverySource> {
        let mut source = MockDiscoverySource::new();
        source.expect_feed().return_const(Feed::NewTokens);
        source
            .expect_fetch_raw()
            .times(1)
            .returning(move |_| Ok(records.clone()));
        Arc::new(source)
    }

    #[test]
    fn test_window_validation() {
        assert_eq!(
            FetchWindow::new(Duration::ZERO, 10),
            Err(WindowError::ZeroLookback)
        );
        assert_eq!(
            FetchWindow::new(Duration::from_secs(60), 0),
            Err(WindowError::InvalidLimit { value: 0, max: MAX_RESULT_LIMIT })
        );
        assert!(FetchWindow::new(Duration::from_secs(60), MAX_RESULT_LIMIT + 1).is_err());
        assert!(FetchWindow::new(Duration::from_secs(60), MAX_RESULT_LIMIT).is_ok());
    }

    #[test]
    fn test_window_since() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let since = window(10).since(now);
        assert_eq!(since, Utc.with_ymd_and_hms(2024, 5, 1, 11, 50, 0).unwrap());
    }

    #[test]
    fn test_parse_minimal_record() {
        let c = parse_candidate(&json!({"mint": "ABC", "name": null}), Feed::NewTokens).unwrap();
        assert_eq!(c.id(), "ABC");
        assert_eq!(c.name, UNNAMED);
        assert!(c.deployer.is_none());
        assert_eq!(c.supply, DEFAULT_SUPPLY);
        assert_eq!(c.metrics, Metrics::default());
        assert_eq!(c.enrichment_state, EnrichmentState::Pending);
    }

    #[test]
    fn test_parse_missing_id() {
        assert_eq!(
            parse_candidate(&json!({"name": "NoMint"}), Feed::NewTokens),
            Err(ParseError::MissingId)
        );
        assert_eq!(
            parse_candidate(&json!({"mint": "  "}), Feed::NewTokens),
            Err(ParseError::MissingId)
        );
        assert_eq!(
            parse_candidate(&json!(["ABC"]), Feed::NewTokens),
            Err(ParseError::NotAnObject)
        );
    }

    #[test]
    fn test_parse_id_fallbacks() {
        let c = parse_candidate(&json!({"address": "Addr1"}), Feed::Trending).unwrap();
        assert_eq!(c.id(), "Addr1");
        let c = parse_candidate(&json!({"id": "Id1", "creator": "Dev1"}), Feed::Trending).unwrap();
        assert_eq!(c.id(), "Id1");
        assert_eq!(c.deployer.as_deref(), Some("Dev1"));
    }

    #[test]
    fn test_parse_full_record() {
        let raw = json!({
            "mint": "Mint1",
            "name": "Doge Two",
            "symbol": "DOGE2",
            "created_at": "2024-05-01T10:00:00Z",
            "update_authority": "Dev1",
            "supply": "500000000",
            "marketCap": 12000.5,
            "liquidity": "9000",
            "holderCount": 42,
            "socials": ["https://x.com/doge2", ""],
        });
        let c = parse_candidate(&raw, Feed::Trending).unwrap();
        assert_eq!(c.name, "Doge Two");
        assert_eq!(c.symbol, "DOGE2");
        assert_eq!(c.deployer.as_deref(), Some("Dev1"));
        assert_eq!(c.created_at, Some(Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap()));
        assert_relative_eq!(c.supply, 500_000_000.0);
        assert_relative_eq!(c.metrics.market_cap, 12000.5);
        assert_relative_eq!(c.metrics.liquidity, 9000.0);
        assert_eq!(c.metrics.holder_count, 42);
        assert_eq!(c.metrics.socials, vec!["https://x.com/doge2".to_string()]);
        assert_eq!(c.source, Feed::Trending);
    }

    #[test]
    fn test_parse_clamps_bad_numbers() {
        let raw = json!({"mint": "M", "market_cap": -5.0, "supply": "abc", "volume_24h": "-1"});
        let c = parse_candidate(&raw, Feed::NewTokens).unwrap();
        assert_eq!(c.metrics.market_cap, 0.0);
        assert_eq!(c.metrics.volume_24h, 0.0);
        assert_eq!(c.supply, DEFAULT_SUPPLY);
    }

    #[test]
    fn test_parse_unix_timestamps() {
        let expected = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        let secs = parse_candidate(&json!({"mint": "M", "created_at": 1714557600}), Feed::NewTokens).unwrap();
        assert_eq!(secs.created_at, Some(expected));
        let millis =
            parse_candidate(&json!({"mint": "M", "created_at": 1714557600000i64}), Feed::NewTokens).unwrap();
        assert_eq!(millis.created_at, Some(expected));
        let garbage = parse_candidate(&json!({"mint": "M", "created_at": "yesterday"}), Feed::NewTokens).unwrap();
        assert!(garbage.created_at.is_none());
    }

    #[tokio::test]
    async fn test_fetch_drops_bad_records_and_duplicates() {
        let fetcher = CandidateFetcher::new(source_returning(vec![
            json!({"mint": "A"}),
            json!({"name": "no id"}),
            json!({"mint": "B"}),
            json!({"mint": "A", "name": "dup"}),
        ]));

        let candidates = fetcher.fetch_candidates(&window(10), "cycle-1").await;
        let ids: Vec<_> = candidates.iter().map(|c| c.id()).collect();
        assert_eq!(ids, vec!["A", "B"]);
        assert_eq!(candidates[0].name, UNNAMED);
    }

    #[tokio::test]
    async fn test_fetch_truncates_to_limit() {
        let records = (0..5).map(|i| json!({"mint": format!("M{i}")})).collect();
        let fetcher = CandidateFetcher::new(source_returning(records));

        let candidates = fetcher.fetch_candidates(&window(3), "cycle-1").await;
        assert_eq!(candidates.len(), 3);
    }

    #[tokio::test]
    async fn test_fetch_passes_window_to_query() {
        let mut source = MockDiscoverySource::new();
        source.expect_feed().return_const(Feed::Graduated);
        source
            .expect_fetch_raw()
            .withf(|q| q.limit == 25 && q.since < Utc::now())
            .times(1)
            .returning(|_| Ok(vec![]));
        let fetcher = CandidateFetcher::new(Arc::new(source));

        assert!(fetcher.fetch_candidates(&window(25), "cycle-1").await.is_empty());
    }

    #[tokio::test]
    async fn test_fetch_failure_yields_empty() {
        let mut source = MockDiscoverySource::new();
        source.expect_feed().return_const(Feed::NewTokens);
        source.expect_fetch_raw().times(1).returning(|_| {
            Err(DiscoveryError::Status {
                status: 502,
                body: "bad gateway".into(),
            })
        });
        let fetcher = CandidateFetcher::new(Arc::new(source));

        assert!(fetcher.fetch_candidates(&window(10), "cycle-1").await.is_empty());
    }
}
