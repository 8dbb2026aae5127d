//! Ports Layer - Trait definitions for external dependencies
//!
//! This module defines the interfaces (ports) that adapters must implement:
//! - Discovery sources (new, graduated, trending token feeds)
//! - Metadata sources (per-token market statistics)
//! - Alert sinks (hand-off of passing candidates)

pub mod discovery;
pub mod metadata;
pub mod alert;
pub mod mocks;

pub use discovery::{DiscoveryError, DiscoveryQuery, DiscoverySource};
pub use metadata::{MetadataError, MetadataSource};
pub use alert::{AlertError, AlertSink};
