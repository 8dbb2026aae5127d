//! Adapters Layer - External System Implementations
//!
//! This module contains implementations of the port traits:
//! - Bitquery: GraphQL discovery of new, graduated and trending tokens
//! - Birdeye: per-token market data for enrichment
//! - Alert: log and JSON-lines alert sink
//! - CLI: Command-line interface definitions

pub mod alert;
pub mod bitquery;
pub mod birdeye;
pub mod cli;

pub use alert::LogAlertSink;
pub use bitquery::BitqueryDiscovery;
pub use birdeye::BirdeyeMetadata;
pub use cli::CliApp;
