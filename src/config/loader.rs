//! Configuration Loader
//!
//! Loads and validates the scanner configuration from a TOML file.
//! API keys may be left empty in the file and supplied through the
//! environment (`BITQUERY_API_KEY`, `BIRDEYE_API_KEY`), typically from `.env`.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::adapters::bitquery::BitqueryConfig;
use crate::adapters::birdeye::BirdeyeConfig;
use crate::application::{EnricherConfig, FetchWindow, PipelineConfig, RetryPolicy, WindowError};
use crate::domain::{Feed, FilterProfile, Metric, ProfileError};

pub const BITQUERY_KEY_VAR: &str = "BITQUERY_API_KEY";
pub const BIRDEYE_KEY_VAR: &str = "BIRDEYE_API_KEY";

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub discovery: DiscoverySection,
    #[serde(default)]
    pub metadata: MetadataSection,
    #[serde(default)]
    pub enrichment: EnrichmentSection,
    #[serde(default)]
    pub breaker: BreakerSection,
    #[serde(default)]
    pub pipeline: PipelineSection,
    #[serde(default)]
    pub logging: LoggingSection,
    /// Scans run by `pump-scout run`
    #[serde(default, rename = "scan")]
    pub scans: Vec<ScanSection>,
    /// Named threshold profiles
    #[serde(default)]
    pub profiles: BTreeMap<String, ThresholdsSection>,
}

/// Bitquery discovery section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DiscoverySection {
    pub endpoint: String,
    /// Leave empty to use BITQUERY_API_KEY
    pub api_key: String,
    pub timeout_secs: u64,
}

impl Default for DiscoverySection {
    fn default() -> Self {
        Self {
            endpoint: crate::adapters::bitquery::DEFAULT_ENDPOINT.to_string(),
            api_key: String::new(),
            timeout_secs: 30,
        }
    }
}

impl DiscoverySection {
    /// Get API key with environment variable fallback
    pub fn get_api_key(&self) -> Option<String> {
        key_or_env(&self.api_key, BITQUERY_KEY_VAR)
    }

    pub fn to_bitquery_config(&self) -> BitqueryConfig {
        BitqueryConfig {
            endpoint: self.endpoint.clone(),
            api_key: self.get_api_key().unwrap_or_default(),
            timeout: Duration::from_secs(self.timeout_secs),
        }
    }
}

/// Birdeye metadata section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetadataSection {
    pub base_url: String,
    /// Leave empty to use BIRDEYE_API_KEY
    pub api_key: String,
    pub chain: String,
    pub timeout_secs: u64,
    /// Query token_security for creator holdings
    pub fetch_security: bool,
    /// Candle size for price history lookups
    pub history_interval: String,
    pub history_lookback_hours: u64,
}

impl Default for MetadataSection {
    fn default() -> Self {
        Self {
            base_url: crate::adapters::birdeye::DEFAULT_BASE_URL.to_string(),
            api_key: String::new(),
            chain: "solana".to_string(),
            timeout_secs: 30,
            fetch_security: true,
            history_interval: crate::adapters::birdeye::DEFAULT_HISTORY_INTERVAL.to_string(),
            history_lookback_hours: crate::adapters::birdeye::DEFAULT_HISTORY_LOOKBACK.as_secs() / 3600,
        }
    }
}

impl MetadataSection {
    /// Get API key with environment variable fallback
    pub fn get_api_key(&self) -> Option<String> {
        key_or_env(&self.api_key, BIRDEYE_KEY_VAR)
    }

    /// Client config for one scan; price history is only fetched when the
    /// scan's profile filters on the dip from the all-time high
    pub fn to_birdeye_config(&self, profile: &FilterProfile) -> BirdeyeConfig {
        BirdeyeConfig {
            base_url: self.base_url.clone(),
            api_key: self.get_api_key().unwrap_or_default(),
            chain: self.chain.clone(),
            timeout: Duration::from_secs(self.timeout_secs),
            fetch_security: self.fetch_security,
            fetch_price_history: profile.needs_price_history(),
            history_interval: self.history_interval.clone(),
            history_lookback: Duration::from_secs(self.history_lookback_hours * 3600),
        }
    }
}

/// Enrichment concurrency and retry section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EnrichmentSection {
    /// Upper bound on simultaneous metadata calls
    pub max_concurrency: usize,
    /// Sleep before each call (milliseconds)
    pub pacing_ms: u64,
    pub retry: RetryPolicy,
}

impl Default for EnrichmentSection {
    fn default() -> Self {
        Self {
            max_concurrency: 5,
            pacing_ms: crate::application::enricher::DEFAULT_PACING_MS,
            retry: RetryPolicy::default(),
        }
    }
}

/// Circuit breaker section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BreakerSection {
    /// Consecutive failures before the breaker opens
    pub failure_threshold: u32,
    /// Seconds the breaker stays open before a trial
    pub cooldown_secs: u64,
}

impl Default for BreakerSection {
    fn default() -> Self {
        Self {
            failure_threshold: crate::domain::circuit_breaker::DEFAULT_FAILURE_THRESHOLD,
            cooldown_secs: crate::domain::circuit_breaker::DEFAULT_COOLDOWN_SECS,
        }
    }
}

/// Scheduling section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineSection {
    /// Seconds between rounds of `run`
    pub poll_interval_secs: u64,
    /// Bound on the enrichment stage of one cycle
    pub cycle_timeout_secs: u64,
    /// Completed outcomes remembered by each deduplicator
    pub dedup_capacity: usize,
    /// Print alerts as JSON lines on stdout
    pub json_alerts: bool,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            poll_interval_secs: 60,
            cycle_timeout_secs: crate::application::pipeline::DEFAULT_CYCLE_TIMEOUT_SECS,
            dedup_capacity: crate::domain::dedup::DEFAULT_MAX_ENTRIES,
            json_alerts: true,
        }
    }
}

/// Logging configuration section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Log level: "trace", "debug", "info", "warn", "error"
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// One `[[scan]]` entry: which feed to poll and which profile to apply
#[derive(Debug, Clone, Deserialize)]
pub struct ScanSection {
    pub profile: String,
    pub feed: Feed,
    /// How far back each query looks
    pub lookback_secs: u64,
    /// Results per query (1-100)
    pub limit: usize,
}

impl ScanSection {
    pub fn window(&self) -> Result<FetchWindow, WindowError> {
        FetchWindow::new(Duration::from_secs(self.lookback_secs), self.limit)
    }
}

/// Threshold table for one `[profiles.<name>]` entry.
///
/// Older config files used `market_cap_min`, `volume_min`,
/// `dev_max_percent`, `liquidity_min`, `price_dip_pct` and
/// `market_cap_range`; those names are still accepted.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ThresholdsSection {
    #[serde(default, alias = "market_cap_min")]
    pub min_marketcap: Option<f64>,
    #[serde(default)]
    pub max_marketcap: Option<f64>,
    #[serde(default)]
    pub market_cap_range: Option<[f64; 2]>,
    #[serde(default, alias = "volume_min")]
    pub min_volume: Option<f64>,
    #[serde(default)]
    pub min_holders: Option<f64>,
    #[serde(default, alias = "dev_max_percent")]
    pub max_dev_holding: Option<f64>,
    #[serde(default)]
    pub min_buys: Option<f64>,
    #[serde(default)]
    pub min_socials: Option<f64>,
    #[serde(default, alias = "liquidity_min")]
    pub min_liquidity: Option<f64>,
    #[serde(default, alias = "price_dip_pct")]
    pub min_price_dip: Option<f64>,
}

impl ThresholdsSection {
    /// Build the validated filter profile for these thresholds
    pub fn to_profile(&self, name: &str) -> Result<FilterProfile, ProfileError> {
        let (min_mc, max_mc) = match self.market_cap_range {
            Some([min, max]) => (Some(min), Some(max)),
            None => (self.min_marketcap, self.max_marketcap),
        };

        FilterProfile::builder(name)
            .min_opt(Metric::MarketCap, min_mc)
            .max_opt(Metric::MarketCap, max_mc)
            .min_opt(Metric::Volume24h, self.min_volume)
            .min_opt(Metric::HolderCount, self.min_holders)
            .max_opt(Metric::DevHoldingPct, self.max_dev_holding)
            .min_opt(Metric::BuyCount24h, self.min_buys)
            .min_opt(Metric::SocialCount, self.min_socials)
            .min_opt(Metric::Liquidity, self.min_liquidity)
            .min_opt(Metric::PriceDipPct, self.min_price_dip)
            .build()
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("Invalid profile: {0}")]
    ProfileError(#[from] ProfileError),
    #[error("Validation failed: {0}")]
    ValidationError(String),
}

/// Load configuration from a TOML file (`~` is expanded)
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let raw = path.as_ref().to_string_lossy();
    let expanded = shellexpand::tilde(raw.as_ref()).to_string();
    let content = std::fs::read_to_string(expanded)?;
    parse_config(&content)
}

/// Parse and validate configuration from TOML text
pub fn parse_config(content: &str) -> Result<Config, ConfigError> {
    let config: Config = toml::from_str(content)?;
    config.validate()?;
    Ok(config)
}

impl Config {
    /// Validate all configuration parameters
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.enrichment.max_concurrency == 0 {
            return Err(ConfigError::ValidationError(
                "enrichment.max_concurrency must be > 0".to_string(),
            ));
        }

        if self.enrichment.retry.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "enrichment.retry.max_attempts must be > 0".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.enrichment.retry.jitter) {
            return Err(ConfigError::ValidationError(format!(
                "enrichment.retry.jitter must be 0-1, got {}",
                self.enrichment.retry.jitter
            )));
        }

        if self.breaker.failure_threshold == 0 {
            return Err(ConfigError::ValidationError(
                "breaker.failure_threshold must be > 0".to_string(),
            ));
        }

        if self.pipeline.poll_interval_secs == 0 {
            return Err(ConfigError::ValidationError(
                "pipeline.poll_interval_secs must be > 0".to_string(),
            ));
        }

        if self.pipeline.cycle_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "pipeline.cycle_timeout_secs must be > 0".to_string(),
            ));
        }

        if self.discovery.endpoint.is_empty() {
            return Err(ConfigError::ValidationError(
                "discovery.endpoint cannot be empty".to_string(),
            ));
        }

        if self.metadata.base_url.is_empty() {
            return Err(ConfigError::ValidationError(
                "metadata.base_url cannot be empty".to_string(),
            ));
        }

        if self.metadata.history_lookback_hours == 0 {
            return Err(ConfigError::ValidationError(
                "metadata.history_lookback_hours must be > 0".to_string(),
            ));
        }

        for (name, thresholds) in &self.profiles {
            if thresholds.market_cap_range.is_some()
                && (thresholds.min_marketcap.is_some() || thresholds.max_marketcap.is_some())
            {
                return Err(ConfigError::ValidationError(format!(
                    "profile '{}': market_cap_range cannot be combined with min/max_marketcap",
                    name
                )));
            }
            thresholds.to_profile(name)?;
        }

        for (i, scan) in self.scans.iter().enumerate() {
            if !self.profiles.contains_key(&scan.profile) {
                return Err(ConfigError::ValidationError(format!(
                    "scan #{} references unknown profile '{}'",
                    i + 1,
                    scan.profile
                )));
            }
            scan.window().map_err(|e| {
                ConfigError::ValidationError(format!("scan #{} ({}): {}", i + 1, scan.profile, e))
            })?;
        }

        Ok(())
    }

    /// All profiles, built and validated
    pub fn filter_profiles(&self) -> Result<BTreeMap<String, Arc<FilterProfile>>, ConfigError> {
        self.profiles
            .iter()
            .map(|(name, t)| Ok((name.clone(), Arc::new(t.to_profile(name)?))))
            .collect()
    }

    /// Pipeline tunables shared by every scan
    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            enricher: EnricherConfig {
                pacing_delay: Duration::from_millis(self.enrichment.pacing_ms),
                retry: self.enrichment.retry.clone(),
            },
            failure_threshold: self.breaker.failure_threshold,
            cooldown: Duration::from_secs(self.breaker.cooldown_secs),
            cycle_timeout: Duration::from_secs(self.pipeline.cycle_timeout_secs),
            dedup_capacity: self.pipeline.dedup_capacity,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.pipeline.poll_interval_secs)
    }

    /// First scan entry using `profile`
    pub fn scan_for_profile(&self, profile: &str) -> Option<&ScanSection> {
        self.scans.iter().find(|s| s.profile == profile)
    }
}

/// Config value if non-empty, else the environment variable
fn key_or_env(value: &str, var: &str) -> Option<String> {
    if !value.trim().is_empty() {
        return Some(value.trim().to_string());
    }
    std::env::var(var).ok().filter(|v| !v.trim().is_empty())
}
