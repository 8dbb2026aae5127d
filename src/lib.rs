//! pump-scout - Token discovery scanner library
//!
//! Finds candidate tokens on Solana, enriches them with market data under
//! rate limits, and filters them against threshold profiles.
//!
//! # Modules
//!
//! - `domain`: Core types and rules (Candidate, CircuitBreaker, Deduplicator, FilterProfile)
//! - `ports`: Trait abstractions (DiscoverySource, MetadataSource, AlertSink)
//! - `adapters`: External implementations (Bitquery, Birdeye, alert sink, CLI)
//! - `config`: Configuration loading and validation
//! - `application`: Fetcher, enricher, retry policy and pipeline orchestration

pub mod domain;
pub mod ports;
pub mod adapters;
pub mod config;
pub mod application;
