//! Application Layer - Pipeline stages and orchestration
//!
//! - `fetcher`: discovery query -> parsed candidates
//! - `enricher`: rate-limited, deduplicated, breaker-gated metadata lookups
//! - `retry`: backoff policy shared by upstream calls
//! - `pipeline`: one fetch/enrich/filter cycle and the scheduling loop

pub mod enricher;
pub mod fetcher;
pub mod pipeline;
pub mod retry;

pub use enricher::{Disposition, Enricher, EnricherConfig, EnrichmentReport};
pub use fetcher::{parse_candidate, CandidateFetcher, FetchWindow, ParseError, WindowError, MAX_RESULT_LIMIT};
pub use pipeline::{CycleReport, Pipeline, PipelineConfig, PipelineRunner, ScanJob};
pub use retry::{RetryFailure, RetryPolicy, Retryable};
