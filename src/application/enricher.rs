//! Rate-Limited Enricher
//!
//! Fans out one metadata lookup per candidate, bounded by a semaphore,
//! paced, retried with backoff and gated by the shared circuit breaker.
//! Every candidate goes through the deduplicator first, so a token seen
//! in several cycles costs one upstream call.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::time::Instant;

use super::retry::{RetryFailure, RetryPolicy, Retryable};
use crate::domain::{
    BreakerDecision, Candidate, DedupClaim, Deduplicator, EnrichmentOutcome, MetadataRecord,
    SharedCircuitBreaker,
};
use crate::ports::{MetadataError, MetadataSource};

/// Default sleep before each upstream call
pub const DEFAULT_PACING_MS: u64 = 50;

/// What happened to one candidate during enrichment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    /// Fresh upstream lookup succeeded
    Enriched,
    /// Fresh upstream lookup failed (exhausted, permanent or not found)
    Failed,
    /// Outcome served from the deduplicator
    Cached,
    /// Another task owns this id right now
    InFlight,
    /// Skipped because the breaker is open
    CircuitOpen,
    /// Cycle deadline passed before the lookup finished
    TimedOut,
}

/// Per-candidate results of one enrichment pass, in input order
#[derive(Debug, Clone, Default)]
pub struct EnrichmentReport {
    pub outcomes: Vec<(Candidate, Disposition)>,
}

impl EnrichmentReport {
    pub fn count(&self, disposition: Disposition) -> usize {
        self.outcomes.iter().filter(|(_, d)| *d == disposition).count()
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// All candidates, updated
    pub fn into_candidates(self) -> Vec<Candidate> {
        self.outcomes.into_iter().map(|(c, _)| c).collect()
    }

    /// Candidates enriched by a fresh lookup in this pass
    pub fn into_fresh(self) -> Vec<Candidate> {
        self.outcomes
            .into_iter()
            .filter(|(_, d)| *d == Disposition::Enriched)
            .map(|(c, _)| c)
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnricherConfig {
    /// Sleep before each admitted call, while holding the permit
    pub pacing_delay: Duration,
    pub retry: RetryPolicy,
}

impl Default for EnricherConfig {
    fn default() -> Self {
        Self {
            pacing_delay: Duration::from_millis(DEFAULT_PACING_MS),
            retry: RetryPolicy::default(),
        }
    }
}

/// Failure of a single admitted call
#[derive(Debug)]
enum CallError {
    Upstream(MetadataError),
    CircuitOpen(Duration),
}

impl fmt::Display for CallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallError::Upstream(e) => write!(f, "{}", e),
            CallError::CircuitOpen(remaining) => {
                write!(f, "circuit open ({}s remaining)", remaining.as_secs())
            }
        }
    }
}

impl Retryable for CallError {
    fn is_retryable(&self) -> bool {
        match self {
            CallError::Upstream(e) => e.is_retryable(),
            CallError::CircuitOpen(_) => false,
        }
    }

    fn rate_limit_hint(&self) -> Option<Option<Duration>> {
        match self {
            CallError::Upstream(e) => e.rate_limit_hint(),
            CallError::CircuitOpen(_) => None,
        }
    }
}

/// Concurrent, rate-limited metadata enrichment
pub struct Enricher {
    source: Arc<dyn MetadataSource>,
    dedup: Arc<Deduplicator>,
    breaker: SharedCircuitBreaker,
    config: EnricherConfig,
}

impl Enricher {
    pub fn new(
        source: Arc<dyn MetadataSource>,
        dedup: Arc<Deduplicator>,
        breaker: SharedCircuitBreaker,
    ) -> Self {
        Self::with_config(source, dedup, breaker, EnricherConfig::default())
    }

    pub fn with_config(
        source: Arc<dyn MetadataSource>,
        dedup: Arc<Deduplicator>,
        breaker: SharedCircuitBreaker,
        config: EnricherConfig,
    ) -> Self {
        Self {
            source,
            dedup,
            breaker,
            config,
        }
    }

    pub fn config(&self) -> &EnricherConfig {
        &self.config
    }

    /// Enrich candidates with at most `max_concurrency` calls in flight
    pub async fn enrich(&self, candidates: Vec<Candidate>, max_concurrency: usize) -> Vec<Candidate> {
        self.enrich_with_report(candidates, max_concurrency, None)
            .await
            .into_candidates()
    }

    /// Enrich candidates and report what happened to each one.
    ///
    /// Lookups still running at `deadline` are abandoned; their candidates
    /// come back failed with `Disposition::TimedOut`.
    pub async fn enrich_with_report(
        &self,
        candidates: Vec<Candidate>,
        max_concurrency: usize,
        deadline: Option<Instant>,
    ) -> EnrichmentReport {
        let semaphore = Semaphore::new(max_concurrency.max(1));

        let tasks = candidates
            .into_iter()
            .map(|candidate| self.enrich_bounded(candidate, &semaphore, deadline));
        let outcomes = join_all(tasks).await;

        EnrichmentReport { outcomes }
    }

    async fn enrich_bounded(
        &self,
        candidate: Candidate,
        semaphore: &Semaphore,
        deadline: Option<Instant>,
    ) -> (Candidate, Disposition) {
        let claimed = AtomicBool::new(false);
        let trial_owner = AtomicBool::new(false);

        let Some(deadline) = deadline else {
            return self.enrich_one(candidate, semaphore, &claimed, &trial_owner).await;
        };

        let fallback = candidate.clone();
        let enrich = self.enrich_one(candidate, semaphore, &claimed, &trial_owner);
        match tokio::time::timeout_at(deadline, enrich).await {
            Ok(outcome) => outcome,
            Err(_) => {
                if claimed.load(Ordering::SeqCst) {
                    self.dedup.release(fallback.id()).await;
                }
                if trial_owner.load(Ordering::SeqCst) {
                    self.breaker.lock().await.end_trial();
                }
                tracing::warn!("Enrichment of {} abandoned at cycle deadline", fallback.id());
                let mut candidate = fallback;
                candidate.mark_failed();
                (candidate, Disposition::TimedOut)
            }
        }
    }

    async fn enrich_one(
        &self,
        mut candidate: Candidate,
        semaphore: &Semaphore,
        claimed: &AtomicBool,
        trial_owner: &AtomicBool,
    ) -> (Candidate, Disposition) {
        let id = candidate.id().to_string();

        match self.dedup.claim(&id).await {
            DedupClaim::Cached(EnrichmentOutcome::Enriched(record)) => {
                candidate.apply_metadata(&record);
                return (candidate, Disposition::Cached);
            }
            DedupClaim::Cached(EnrichmentOutcome::Failed) => {
                candidate.mark_failed();
                return (candidate, Disposition::Cached);
            }
            DedupClaim::InFlight => {
                tracing::debug!("{} already being enriched, skipping", id);
                return (candidate, Disposition::InFlight);
            }
            DedupClaim::Fresh => claimed.store(true, Ordering::SeqCst),
        }

        let label = format!("{} lookup for {}", self.source.name(), id);
        let result = self
            .config
            .retry
            .run(&label, |_attempt| self.call_upstream(&id, semaphore, trial_owner))
            .await;

        match result {
            Ok(record) => {
                candidate.apply_metadata(&record);
                self.dedup
                    .complete(&id, EnrichmentOutcome::Enriched(record))
                    .await;
                self.breaker.lock().await.record_success();
                tracing::debug!("Enriched {} ({})", id, candidate.symbol);
                (candidate, Disposition::Enriched)
            }
            Err(RetryFailure {
                error: CallError::CircuitOpen(remaining),
                ..
            }) => {
                self.dedup.release(&id).await;
                if trial_owner.load(Ordering::SeqCst) {
                    self.breaker.lock().await.end_trial();
                }
                tracing::debug!(
                    "Circuit open, skipping {} ({}s until trial)",
                    id,
                    remaining.as_secs()
                );
                (candidate, Disposition::CircuitOpen)
            }
            Err(RetryFailure {
                error: CallError::Upstream(error),
                attempts,
            }) => {
                candidate.mark_failed();
                self.dedup.complete(&id, EnrichmentOutcome::Failed).await;
                if error.counts_toward_breaker() {
                    self.breaker.lock().await.record_failure(Utc::now());
                    tracing::warn!("Enrichment failed for {} after {} attempt(s): {}", id, attempts, error);
                } else {
                    if trial_owner.load(Ordering::SeqCst) {
                        self.breaker.lock().await.end_trial();
                    }
                    tracing::info!("No metadata for {}: {}", id, error);
                }
                (candidate, Disposition::Failed)
            }
        }
    }

    /// One admitted call: permit, breaker gate, pacing, request.
    ///
    /// A candidate that won the half-open trial keeps it across its own
    /// retries instead of asking the breaker again.
    async fn call_upstream(
        &self,
        id: &str,
        semaphore: &Semaphore,
        trial_owner: &AtomicBool,
    ) -> Result<MetadataRecord, CallError> {
        let _permit = semaphore
            .acquire()
            .await
            .map_err(|e| CallError::Upstream(MetadataError::Transient(e.to_string())))?;

        if !trial_owner.load(Ordering::SeqCst) {
            match self.breaker.lock().await.admit(Utc::now()) {
                BreakerDecision::Open { remaining } => return Err(CallError::CircuitOpen(remaining)),
                BreakerDecision::HalfOpen => trial_owner.store(true, Ordering::SeqCst),
                BreakerDecision::Closed => {}
            }
        }

        if !self.config.pacing_delay.is_zero() {
            tokio::time::sleep(self.config.pacing_delay).await;
        }

        self.source.fetch_metadata(id).await.map_err(CallError::Upstream)
    }
}
