//! Candidate Token Model
//!
//! A candidate is one discovered token flowing through a discovery cycle.
//! It is created by the fetcher with placeholder values, filled in by the
//! enricher and judged by the filter engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Standard pump.fun mint size, used when the discovery source omits supply
pub const DEFAULT_SUPPLY: f64 = 1_000_000_000.0;

/// Placeholder name for tokens without one
pub const UNNAMED: &str = "Unnamed";

/// Placeholder symbol for tokens without one
pub const UNKNOWN_SYMBOL: &str = "UNKNOWN";

/// Discovery feed a candidate came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feed {
    /// Freshly minted tokens
    NewTokens,
    /// Tokens that completed their bonding curve and migrated to an AMM
    Graduated,
    /// Tokens ranked by recent trading volume
    Trending,
}

impl Feed {
    pub fn as_str(&self) -> &'static str {
        match self {
            Feed::NewTokens => "new_tokens",
            Feed::Graduated => "graduated",
            Feed::Trending => "trending",
        }
    }
}

impl fmt::Display for Feed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Enrichment lifecycle of a candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrichmentState {
    #[default]
    Pending,
    Enriched,
    EnrichmentFailed,
}

/// A metric the filter engine can constrain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    MarketCap,
    Volume24h,
    HolderCount,
    DevHoldingPct,
    BuyCount24h,
    SocialCount,
    Liquidity,
    PriceDipPct,
}

impl Metric {
    /// Evaluation order used by the filter engine
    pub const ALL: [Metric; 8] = [
        Metric::MarketCap,
        Metric::Volume24h,
        Metric::HolderCount,
        Metric::DevHoldingPct,
        Metric::BuyCount24h,
        Metric::SocialCount,
        Metric::Liquidity,
        Metric::PriceDipPct,
    ];

    /// Human-readable label used in filter reasons
    pub fn label(&self) -> &'static str {
        match self {
            Metric::MarketCap => "market cap",
            Metric::Volume24h => "volume",
            Metric::HolderCount => "holder count",
            Metric::DevHoldingPct => "dev holding",
            Metric::BuyCount24h => "buy count",
            Metric::SocialCount => "social count",
            Metric::Liquidity => "liquidity",
            Metric::PriceDipPct => "price dip",
        }
    }
}

/// Market statistics for a candidate
///
/// Counters default to zero. Values that have no safe neutral default
/// (dev holding, all-time high) are `None` until a provider reports them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    /// Market cap in USD
    pub market_cap: f64,
    /// 24h trading volume in USD
    pub volume_24h: f64,
    /// Number of holders
    pub holder_count: u64,
    /// Percent of supply held by the deployer
    pub dev_holding_pct: Option<f64>,
    /// Buy transactions in the last 24h
    pub buy_count_24h: u64,
    /// Social links (twitter, telegram, website, ...)
    pub socials: Vec<String>,
    /// Pool liquidity in USD
    pub liquidity: f64,
    /// Current price in USD
    pub price_usd: f64,
    /// All-time-high price in USD
    pub ath_usd: Option<f64>,
}

impl Metrics {
    /// Look up a metric value. `None` means unknown, which filters treat as failing.
    pub fn get(&self, metric: Metric) -> Option<f64> {
        match metric {
            Metric::MarketCap => Some(self.market_cap),
            Metric::Volume24h => Some(self.volume_24h),
            Metric::HolderCount => Some(self.holder_count as f64),
            Metric::DevHoldingPct => self.dev_holding_pct,
            Metric::BuyCount24h => Some(self.buy_count_24h as f64),
            Metric::SocialCount => Some(self.socials.len() as f64),
            Metric::Liquidity => Some(self.liquidity),
            Metric::PriceDipPct => self.price_dip_pct(),
        }
    }

    /// Percent drop from all-time high. Unknown when the ATH is missing or zero.
    pub fn price_dip_pct(&self) -> Option<f64> {
        let ath = self.ath_usd?;
        if ath <= 0.0 || !ath.is_finite() {
            return None;
        }
        Some((ath - self.price_usd) / ath * 100.0)
    }
}

/// Clamp a provider value into a valid non-negative metric
pub fn non_negative(value: f64) -> f64 {
    if value.is_finite() && value > 0.0 {
        value
    } else {
        0.0
    }
}

/// Normalized enrichment payload returned by a metadata provider
///
/// Every field is optional; the candidate keeps its current value (or
/// default) for anything the provider omits.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataRecord {
    pub name: Option<String>,
    pub symbol: Option<String>,
    pub supply: Option<f64>,
    pub deployer: Option<String>,
    pub market_cap: Option<f64>,
    pub volume_24h: Option<f64>,
    pub holder_count: Option<u64>,
    pub dev_holding_pct: Option<f64>,
    pub buy_count_24h: Option<u64>,
    pub socials: Vec<String>,
    pub liquidity: Option<f64>,
    pub price_usd: Option<f64>,
    pub ath_usd: Option<f64>,
}

/// A discovered token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    id: String,
    pub name: String,
    pub symbol: String,
    pub created_at: Option<DateTime<Utc>>,
    pub deployer: Option<String>,
    pub supply: f64,
    pub source: Feed,
    pub metrics: Metrics,
    pub enrichment_state: EnrichmentState,
}

impl Candidate {
    /// Create a candidate with placeholder fields
    pub fn new(id: impl Into<String>, source: Feed) -> Self {
        Self {
            id: id.into(),
            name: UNNAMED.to_string(),
            symbol: UNKNOWN_SYMBOL.to_string(),
            created_at: None,
            deployer: None,
            supply: DEFAULT_SUPPLY,
            source,
            metrics: Metrics::default(),
            enrichment_state: EnrichmentState::Pending,
        }
    }

    /// Stable upstream identifier (mint address)
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_enriched(&self) -> bool {
        self.enrichment_state == EnrichmentState::Enriched
    }

    /// Merge a provider record into this candidate and mark it enriched
    pub fn apply_metadata(&mut self, record: &MetadataRecord) {
        if let Some(name) = non_empty(record.name.as_deref()) {
            if self.name == UNNAMED {
                self.name = name.to_string();
            }
        }
        if let Some(symbol) = non_empty(record.symbol.as_deref()) {
            if self.symbol == UNKNOWN_SYMBOL {
                self.symbol = symbol.to_string();
            }
        }
        if self.deployer.is_none() {
            self.deployer = non_empty(record.deployer.as_deref()).map(str::to_string);
        }
        if let Some(supply) = record.supply.filter(|s| s.is_finite() && *s > 0.0) {
            self.supply = supply;
        }

        let m = &mut self.metrics;
        if let Some(v) = record.market_cap {
            m.market_cap = non_negative(v);
        }
        if let Some(v) = record.volume_24h {
            m.volume_24h = non_negative(v);
        }
        if let Some(v) = record.holder_count {
            m.holder_count = v;
        }
        if let Some(v) = record.dev_holding_pct {
            m.dev_holding_pct = Some(non_negative(v));
        }
        if let Some(v) = record.buy_count_24h {
            m.buy_count_24h = v;
        }
        if !record.socials.is_empty() {
            m.socials = record.socials.clone();
        }
        if let Some(v) = record.liquidity {
            m.liquidity = non_negative(v);
        }
        if let Some(v) = record.price_usd {
            m.price_usd = non_negative(v);
        }
        if let Some(v) = record.ath_usd {
            m.ath_usd = Some(non_negative(v));
        }

        self.enrichment_state = EnrichmentState::Enriched;
    }

    pub fn mark_failed(&mut self) {
        self.enrichment_state = EnrichmentState::EnrichmentFailed;
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_new_candidate_defaults() {
        let c = Candidate::new("Mint111", Feed::NewTokens);
        assert_eq!(c.id(), "Mint111");
        assert_eq!(c.name, UNNAMED);
        assert_eq!(c.symbol, UNKNOWN_SYMBOL);
        assert_eq!(c.supply, DEFAULT_SUPPLY);
        assert!(c.deployer.is_none());
        assert_eq!(c.metrics, Metrics::default());
        assert_eq!(c.enrichment_state, EnrichmentState::Pending);
    }

    #[test]
    fn test_apply_metadata_fills_placeholders() {
        let mut c = Candidate::new("Mint111", Feed::Graduated);
        let record = MetadataRecord {
            name: Some("Dog Coin".to_string()),
            symbol: Some("DOG".to_string()),
            deployer: Some("Dev111".to_string()),
            market_cap: Some(12_000.0),
            volume_24h: Some(4_000.0),
            holder_count: Some(42),
            socials: vec!["twitter".to_string()],
            ..Default::default()
        };

        c.apply_metadata(&record);

        assert!(c.is_enriched());
        assert_eq!(c.name, "Dog Coin");
        assert_eq!(c.symbol, "DOG");
        assert_eq!(c.deployer.as_deref(), Some("Dev111"));
        assert_eq!(c.metrics.market_cap, 12_000.0);
        assert_eq!(c.metrics.holder_count, 42);
        assert_eq!(c.metrics.socials.len(), 1);
        // Omitted fields keep their defaults
        assert_eq!(c.supply, DEFAULT_SUPPLY);
        assert!(c.metrics.dev_holding_pct.is_none());
    }

    #[test]
    fn test_apply_metadata_keeps_source_name() {
        let mut c = Candidate::new("Mint111", Feed::NewTokens);
        c.name = "From Discovery".to_string();
        c.apply_metadata(&MetadataRecord {
            name: Some("From Provider".to_string()),
            ..Default::default()
        });
        assert_eq!(c.name, "From Discovery");
    }

    #[test]
    fn test_apply_metadata_clamps_negative_values() {
        let mut c = Candidate::new("Mint111", Feed::Trending);
        c.apply_metadata(&MetadataRecord {
            market_cap: Some(-5.0),
            liquidity: Some(f64::NAN),
            dev_holding_pct: Some(-1.0),
            ..Default::default()
        });
        assert_eq!(c.metrics.market_cap, 0.0);
        assert_eq!(c.metrics.liquidity, 0.0);
        assert_eq!(c.metrics.dev_holding_pct, Some(0.0));
    }

    #[test]
    fn test_price_dip() {
        let metrics = Metrics {
            price_usd: 0.6,
            ath_usd: Some(1.0),
            ..Default::default()
        };
        assert_relative_eq!(metrics.price_dip_pct().unwrap(), 40.0, epsilon = 1e-9);
    }

    #[test]
    fn test_price_dip_zero_ath_is_unknown() {
        let metrics = Metrics {
            price_usd: 0.6,
            ath_usd: Some(0.0),
            ..Default::default()
        };
        assert!(metrics.price_dip_pct().is_none());
        assert!(Metrics::default().price_dip_pct().is_none());
    }

    #[test]
    fn test_metric_lookup() {
        let metrics = Metrics {
            holder_count: 7,
            socials: vec!["twitter".into(), "telegram".into()],
            ..Default::default()
        };
        assert_eq!(metrics.get(Metric::HolderCount), Some(7.0));
        assert_eq!(metrics.get(Metric::SocialCount), Some(2.0));
        assert_eq!(metrics.get(Metric::DevHoldingPct), None);
    }

    #[test]
    fn test_feed_serde_names() {
        assert_eq!(serde_json::to_string(&Feed::NewTokens).unwrap(), "\"new_tokens\"");
        let feed: Feed = serde_json::from_str("\"graduated\"").unwrap();
        assert_eq!(feed, Feed::Graduated);
        assert_eq!(Feed::Trending.to_string(), "trending");
    }
}
