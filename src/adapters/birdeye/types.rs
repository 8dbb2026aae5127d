//! Birdeye Response Types
//!
//! Wire types for the token overview, token security and price history
//! endpoints.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;

use crate::domain::MetadataRecord;

/// Social link keys carried in `extensions`
pub const SOCIAL_KEYS: &[&str] = &["twitter", "telegram", "website", "discord"];

/// Envelope shared by every Birdeye endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct BirdeyeResponse<T> {
    #[serde(default)]
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
}

/// `/defi/token_overview` payload (fields we use)
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenOverview {
    pub address: Option<String>,
    pub name: Option<String>,
    pub symbol: Option<String>,
    pub market_cap: Option<f64>,
    /// Older responses only carry `mc`
    pub mc: Option<f64>,
    pub liquidity: Option<f64>,
    pub price: Option<f64>,
    #[serde(rename = "v24hUSD")]
    pub volume_24h_usd: Option<f64>,
    pub holder: Option<f64>,
    #[serde(rename = "buy24h")]
    pub buys_24h: Option<f64>,
    pub supply: Option<f64>,
    pub extensions: Option<BTreeMap<String, Value>>,
}

impl TokenOverview {
    /// Social links present in `extensions`, in a stable order
    pub fn socials(&self) -> Vec<String> {
        let Some(extensions) = &self.extensions else {
            return Vec::new();
        };
        SOCIAL_KEYS
            .iter()
            .filter_map(|key| extensions.get(*key).and_then(Value::as_str))
            .map(str::trim)
            .filter(|link| !link.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn into_record(self) -> MetadataRecord {
        let socials = self.socials();
        MetadataRecord {
            name: self.name,
            symbol: self.symbol,
            supply: self.supply,
            deployer: None,
            market_cap: self.market_cap.or(self.mc),
            volume_24h: self.volume_24h_usd,
            holder_count: self.holder.map(count),
            dev_holding_pct: None,
            buy_count_24h: self.buys_24h.map(count),
            socials,
            liquidity: self.liquidity,
            price_usd: self.price,
            ath_usd: None,
        }
    }
}

/// `/defi/token_security` payload (fields we use)
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenSecurity {
    pub creator_address: Option<String>,
    /// Fraction of supply held by the creator (0.0 - 1.0)
    pub creator_percentage: Option<f64>,
}

impl TokenSecurity {
    /// Merge creator data into a record
    pub fn apply_to(&self, record: &mut MetadataRecord) {
        if record.deployer.is_none() {
            record.deployer = self.creator_address.clone();
        }
        if let Some(fraction) = self.creator_percentage.filter(|f| f.is_finite()) {
            record.dev_holding_pct = Some(fraction * 100.0);
        }
    }
}

/// `/defi/history_price` payload
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PriceHistory {
    #[serde(default)]
    pub items: Vec<PricePoint>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PricePoint {
    pub unix_time: Option<i64>,
    pub value: Option<f64>,
}

impl PriceHistory {
    /// Highest finite price in the series
    pub fn high(&self) -> Option<f64> {
        self.items
            .iter()
            .filter_map(|p| p.value)
            .filter(|v| v.is_finite() && *v > 0.0)
            .reduce(f64::max)
    }

    /// Set the record's all-time high, never below its current price
    pub fn apply_to(&self, record: &mut MetadataRecord) {
        let current = record.price_usd.filter(|p| p.is_finite() && *p > 0.0);
        record.ath_usd = match (self.high(), current) {
            (Some(high), Some(price)) => Some(high.max(price)),
            (high, price) => high.or(price),
        };
    }
}

fn count(value: f64) -> u64 {
    if value.is_finite() && value > 0.0 {
        value as u64
    } else {
        0
    }
}
