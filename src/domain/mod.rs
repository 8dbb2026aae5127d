//! Domain Layer - Core pipeline types and logic
//!
//! Pure types and state machines with no I/O. Network access happens
//! through the ports layer.
//!
//! - `candidate`: discovered token model and metrics
//! - `circuit_breaker`: consecutive-failure gate for enrichment calls
//! - `dedup`: enrichment seen-set with cached outcomes
//! - `filter`: threshold profiles and the filter engine

pub mod candidate;
pub mod circuit_breaker;
pub mod dedup;
pub mod filter;

pub use candidate::{
    Candidate, EnrichmentState, Feed, MetadataRecord, Metric, Metrics, DEFAULT_SUPPLY,
    UNKNOWN_SYMBOL, UNNAMED,
};
pub use circuit_breaker::{
    BreakerDecision, CircuitBreaker, CircuitBreakerError, CircuitBreakerState,
    CircuitBreakerStatus, SharedCircuitBreaker,
};
pub use dedup::{DedupClaim, Deduplicator, EnrichmentOutcome};
pub use filter::{apply, Constraint, FilterProfile, FilterProfileBuilder, FilterVerdict, ProfileError};
