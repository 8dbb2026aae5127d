//! Birdeye Metadata Adapter
//!
//! Enriches candidates with market data from Birdeye:
//! - Market cap, liquidity, price, 24h volume and buys, holder count
//! - Social links from token extensions
//! - Creator address and holding percentage (token security)
//! - All-time high from price history, for dip filters
//!
//! # Example
//!
//! ```rust,ignore
//! use pump_scout::adapters::birdeye::{BirdeyeConfig, BirdeyeMetadata};
//! use pump_scout::ports::MetadataSource;
//!
//! let client = BirdeyeMetadata::new(BirdeyeConfig { api_key: key, ..Default::default() })?;
//! let record = client.fetch_metadata("So11111111111111111111111111111111111111112").await?;
//! println!("Market cap: {:?}", record.market_cap);
//! ```

mod client;
mod types;

pub use client::{
    BirdeyeConfig, BirdeyeMetadata, DEFAULT_BASE_URL, DEFAULT_HISTORY_INTERVAL, DEFAULT_HISTORY_LOOKBACK,
};
pub use types::{PriceHistory, PricePoint, TokenOverview, TokenSecurity};
