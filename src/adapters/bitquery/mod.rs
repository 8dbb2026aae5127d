//! Bitquery Discovery Adapter
//!
//! Discovers candidates through Bitquery's GraphQL API:
//! - New tokens: pump.fun `create` supply updates
//! - Graduated: pump.fun `Migrate` instructions
//! - Trending: DEX trades ranked by USD volume
//!
//! # Example
//!
//! ```rust,ignore
//! use pump_scout::adapters::bitquery::{BitqueryConfig, BitqueryDiscovery};
//! use pump_scout::domain::Feed;
//!
//! let config = BitqueryConfig { api_key: "ory_at_...".into(), ..Default::default() };
//! let source = BitqueryDiscovery::new(Feed::Graduated, config)?;
//! ```

mod client;
mod queries;

pub use client::{flatten_response, BitqueryConfig, BitqueryDiscovery, DEFAULT_ENDPOINT};
pub use queries::{query_for, PUMP_FUN_PROGRAM};
