//! Circuit Breaker
//!
//! Upstream failure protection for enrichment calls. After a run of
//! consecutive failed enrichments the breaker opens and calls are skipped
//! until the cooldown elapses. After that a single trial call is admitted
//! and either closes the breaker or re-opens it; everyone else keeps
//! skipping while the trial is outstanding.
//!
//! All methods take `now` explicitly so the state machine is deterministic.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;

/// Default consecutive failures before opening
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;

/// Default cooldown period in seconds
pub const DEFAULT_COOLDOWN_SECS: u64 = 300;

/// Breaker shared by every enrichment task of one pipeline
pub type SharedCircuitBreaker = Arc<Mutex<CircuitBreaker>>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CircuitBreakerError {
    #[error("Circuit breaker open after {failures} consecutive failures, cooldown remaining: {remaining_secs}s")]
    Open { failures: u32, remaining_secs: u64 },
}

/// Status of the circuit breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitBreakerStatus {
    /// Calls proceed normally
    Closed,
    /// Calls are short-circuited
    Open,
    /// Cooldown elapsed, next call is a trial
    HalfOpen,
}

impl CircuitBreakerStatus {
    /// Returns true if an upstream call may be attempted
    pub fn allows_calls(&self) -> bool {
        !matches!(self, CircuitBreakerStatus::Open)
    }

    /// Returns a human-readable description
    pub fn description(&self) -> &'static str {
        match self {
            CircuitBreakerStatus::Closed => "Closed - enrichment calls proceed",
            CircuitBreakerStatus::Open => "OPEN - enrichment calls skipped",
            CircuitBreakerStatus::HalfOpen => "Half-open - cooldown elapsed, trying upstream",
        }
    }
}

/// Outcome of asking the breaker whether to call upstream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerDecision {
    Closed,
    HalfOpen,
    Open { remaining: Duration },
}

impl BreakerDecision {
    pub fn allows_call(&self) -> bool {
        !matches!(self, BreakerDecision::Open { .. })
    }
}

/// Detailed breaker state for monitoring
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerState {
    pub status: CircuitBreakerStatus,
    pub consecutive_failures: u32,
    /// When the breaker may be tried again (only while open)
    pub reset_at: Option<DateTime<Utc>>,
    pub cooldown_remaining_secs: Option<u64>,
}

/// Consecutive-failure circuit breaker
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    /// Failures before opening
    failure_threshold: u32,
    /// How long to stay open
    cooldown: Duration,

    // State
    open: bool,
    reset_at: Option<DateTime<Utc>>,
    consecutive_failures: u32,
    /// When the outstanding half-open trial was admitted
    trial_started: Option<DateTime<Utc>>,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::with_config(
            DEFAULT_FAILURE_THRESHOLD,
            Duration::from_secs(DEFAULT_COOLDOWN_SECS),
        )
    }
}

impl CircuitBreaker {
    /// Create a new circuit breaker with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a circuit breaker with custom settings
    pub fn with_config(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            cooldown,
            open: false,
            reset_at: None,
            consecutive_failures: 0,
            trial_started: None,
        }
    }

    /// Wrap into the shared handle used by the enricher
    pub fn shared(self) -> SharedCircuitBreaker {
        Arc::new(Mutex::new(self))
    }

    /// Decide whether an upstream call may be made at `now`
    pub fn check(&self, now: DateTime<Utc>) -> BreakerDecision {
        if !self.open {
            return BreakerDecision::Closed;
        }
        match self.reset_at {
            Some(reset_at) if now < reset_at => BreakerDecision::Open {
                remaining: (reset_at - now).to_std().unwrap_or_default(),
            },
            _ => BreakerDecision::HalfOpen,
        }
    }

    /// Admit one upstream call at `now`.
    ///
    /// Like `check`, except that in half-open only the first caller gets
    /// through; it owns the trial until `record_success`, `record_failure`
    /// or `end_trial`. A trial that never reports back loses its lease
    /// after one cooldown.
    pub fn admit(&mut self, now: DateTime<Utc>) -> BreakerDecision {
        let decision = self.check(now);
        if decision != BreakerDecision::HalfOpen {
            return decision;
        }

        if let Some(started) = self.trial_started {
            let lease_end = started + self.cooldown_chrono();
            if now < lease_end {
                return BreakerDecision::Open {
                    remaining: (lease_end - now).to_std().unwrap_or_default(),
                };
            }
            tracing::warn!("Half-open trial never reported back, admitting a new one");
        }

        self.trial_started = Some(now);
        tracing::info!("Circuit breaker half-open, admitting trial call");
        BreakerDecision::HalfOpen
    }

    /// Give up the trial without judging the upstream (e.g. the trial was
    /// abandoned or its answer does not count toward the breaker)
    pub fn end_trial(&mut self) {
        self.trial_started = None;
    }

    pub fn trial_in_flight(&self) -> bool {
        self.trial_started.is_some()
    }

    /// Record a successful call: close and clear the failure count
    pub fn record_success(&mut self) {
        if self.open {
            tracing::info!(
                "Circuit breaker closed after successful trial ({} prior failures)",
                self.consecutive_failures
            );
        }
        self.consecutive_failures = 0;
        self.open = false;
        self.reset_at = None;
        self.trial_started = None;
    }

    /// Record a failed call and open the breaker once the threshold is reached
    pub fn record_failure(&mut self, now: DateTime<Utc>) {
        self.trial_started = None;
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        tracing::debug!(
            "Enrichment failure recorded (consecutive: {}/{})",
            self.consecutive_failures,
            self.failure_threshold
        );

        if self.consecutive_failures >= self.failure_threshold {
            let reopening = self.open;
            self.trip(now);
            if reopening {
                tracing::warn!(
                    "Circuit breaker trial failed, re-opened until {}",
                    self.reset_at.map(|t| t.to_rfc3339()).unwrap_or_default()
                );
            } else {
                tracing::warn!(
                    "CIRCUIT BREAKER OPEN: {} consecutive enrichment failures, skipping calls for {:?}",
                    self.consecutive_failures,
                    self.cooldown
                );
            }
        }
    }

    /// Get the current status
    pub fn status(&self, now: DateTime<Utc>) -> CircuitBreakerStatus {
        match self.check(now) {
            BreakerDecision::Closed => CircuitBreakerStatus::Closed,
            BreakerDecision::HalfOpen => CircuitBreakerStatus::HalfOpen,
            BreakerDecision::Open { .. } => CircuitBreakerStatus::Open,
        }
    }

    /// Get detailed state for monitoring
    pub fn state(&self, now: DateTime<Utc>) -> CircuitBreakerState {
        CircuitBreakerState {
            status: self.status(now),
            consecutive_failures: self.consecutive_failures,
            reset_at: if self.open { self.reset_at } else { None },
            cooldown_remaining_secs: self.cooldown_remaining(now).map(|d| d.as_secs()),
        }
    }

    /// Remaining cooldown while open
    pub fn cooldown_remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
        match self.check(now) {
            BreakerDecision::Open { remaining } => Some(remaining),
            _ => None,
        }
    }

    /// Error form of `check`, for callers that propagate
    pub fn ensure_closed(&self, now: DateTime<Utc>) -> Result<(), CircuitBreakerError> {
        match self.check(now) {
            BreakerDecision::Open { remaining } => Err(CircuitBreakerError::Open {
                failures: self.consecutive_failures,
                remaining_secs: remaining.as_secs(),
            }),
            _ => Ok(()),
        }
    }

    /// Manually reset the circuit breaker
    pub fn reset(&mut self) {
        self.open = false;
        self.reset_at = None;
        self.consecutive_failures = 0;
        self.trial_started = None;
        tracing::info!("Circuit breaker reset");
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn failure_threshold(&self) -> u32 {
        self.failure_threshold
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    fn trip(&mut self, now: DateTime<Utc>) {
        self.open = true;
        self.reset_at = Some(now + self.cooldown_chrono());
    }

    fn cooldown_chrono(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.cooldown).unwrap_or_else(|_| chrono::Duration::days(365))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn create_test_breaker() -> CircuitBreaker {
        CircuitBreaker::with_config(5, Duration::from_secs(300))
    }

    fn trip(breaker: &mut CircuitBreaker, at: i64) {
        for i in 0..5 {
            breaker.record_failure(t(at + i));
        }
    }

    #[test]
    fn test_new_breaker() {
        let breaker = CircuitBreaker::new();
        assert_eq!(breaker.check(t(0)), BreakerDecision::Closed);
        assert_eq!(breaker.status(t(0)), CircuitBreakerStatus::Closed);
        assert_eq!(breaker.consecutive_failures(), 0);
        assert_eq!(breaker.failure_threshold(), DEFAULT_FAILURE_THRESHOLD);
        assert_eq!(breaker.cooldown(), Duration::from_secs(DEFAULT_COOLDOWN_SECS));
    }

    #[test]
    fn test_opens_at_threshold() {
        let mut breaker = create_test_breaker();
        for i in 0..4 {
            breaker.record_failure(t(i));
        }
        assert!(breaker.check(t(4)).allows_call());

        breaker.record_failure(t(4));
        assert!(breaker.is_open());
        assert!(!breaker.check(t(5)).allows_call());
        assert_eq!(breaker.status(t(5)), CircuitBreakerStatus::Open);
    }

    #[test]
    fn test_reset_at_is_now_plus_cooldown() {
        let mut breaker = create_test_breaker();
        trip(&mut breaker, 0);

        let state = breaker.state(t(10));
        assert_eq!(state.reset_at, Some(t(4 + 300)));
        assert_eq!(state.cooldown_remaining_secs, Some(294));
    }

    #[test]
    fn test_success_resets_failures() {
        let mut breaker = create_test_breaker();
        breaker.record_failure(t(0));
        breaker.record_failure(t(1));
        assert_eq!(breaker.consecutive_failures(), 2);

        breaker.record_success();
        assert_eq!(breaker.consecutive_failures(), 0);
        assert!(!breaker.is_open());
    }

    #[test]
    fn test_half_open_after_cooldown() {
        let mut breaker = create_test_breaker();
        trip(&mut breaker, 0);

        assert!(matches!(breaker.check(t(100)), BreakerDecision::Open { .. }));
        assert_eq!(breaker.check(t(304)), BreakerDecision::HalfOpen);
        assert_eq!(breaker.status(t(400)), CircuitBreakerStatus::HalfOpen);
    }

    #[test]
    fn test_failed_trial_reopens() {
        let mut breaker = create_test_breaker();
        trip(&mut breaker, 0);

        breaker.record_failure(t(310));
        assert!(matches!(breaker.check(t(311)), BreakerDecision::Open { .. }));
        assert_eq!(breaker.state(t(311)).reset_at, Some(t(610)));
    }

    #[test]
    fn test_successful_trial_closes() {
        let mut breaker = create_test_breaker();
        trip(&mut breaker, 0);

        breaker.record_success();
        assert_eq!(breaker.check(t(305)), BreakerDecision::Closed);
        assert_eq!(breaker.consecutive_failures(), 0);
        assert!(breaker.state(t(305)).reset_at.is_none());
    }

    #[test]
    fn test_half_open_admits_single_trial() {
        let mut breaker = create_test_breaker();
        trip(&mut breaker, 0);

        assert_eq!(breaker.admit(t(310)), BreakerDecision::HalfOpen);
        assert!(breaker.trial_in_flight());

        // Everyone else keeps skipping while the trial is outstanding
        assert!(matches!(breaker.admit(t(311)), BreakerDecision::Open { .. }));
        assert!(matches!(breaker.admit(t(312)), BreakerDecision::Open { .. }));
        assert_eq!(breaker.status(t(312)), CircuitBreakerStatus::HalfOpen);

        breaker.record_success();
        assert!(!breaker.trial_in_flight());
        assert_eq!(breaker.admit(t(313)), BreakerDecision::Closed);
    }

    #[test]
    fn test_failed_trial_blocks_until_next_cooldown() {
        let mut breaker = create_test_breaker();
        trip(&mut breaker, 0);

        assert_eq!(breaker.admit(t(310)), BreakerDecision::HalfOpen);
        breaker.record_failure(t(311));
        assert!(!breaker.trial_in_flight());
        assert!(matches!(breaker.admit(t(312)), BreakerDecision::Open { .. }));
        assert_eq!(breaker.admit(t(611)), BreakerDecision::HalfOpen);
    }

    #[test]
    fn test_ended_trial_frees_the_slot() {
        let mut breaker = create_test_breaker();
        trip(&mut breaker, 0);

        assert_eq!(breaker.admit(t(310)), BreakerDecision::HalfOpen);
        breaker.end_trial();
        assert_eq!(breaker.admit(t(311)), BreakerDecision::HalfOpen);
    }

    #[test]
    fn test_stale_trial_lease_expires() {
        let mut breaker = create_test_breaker();
        trip(&mut breaker, 0);

        assert_eq!(breaker.admit(t(310)), BreakerDecision::HalfOpen);
        assert_eq!(
            breaker.admit(t(400)),
            BreakerDecision::Open {
                remaining: Duration::from_secs(210)
            }
        );
        assert_eq!(breaker.admit(t(610)), BreakerDecision::HalfOpen);
    }

    #[test]
    fn test_ensure_closed() {
        let mut breaker = create_test_breaker();
        assert!(breaker.ensure_closed(t(0)).is_ok());

        trip(&mut breaker, 0);
        let result = breaker.ensure_closed(t(5));
        assert!(matches!(
            result,
            Err(CircuitBreakerError::Open { failures: 5, .. })
        ));
        assert!(breaker.ensure_closed(t(400)).is_ok());
    }

    #[test]
    fn test_manual_reset() {
        let mut breaker = create_test_breaker();
        trip(&mut breaker, 0);

        breaker.reset();
        assert_eq!(breaker.check(t(5)), BreakerDecision::Closed);
        assert_eq!(breaker.consecutive_failures(), 0);
    }

    #[test]
    fn test_zero_threshold_is_raised_to_one() {
        let mut breaker = CircuitBreaker::with_config(0, Duration::from_secs(60));
        breaker.record_failure(t(0));
        assert!(breaker.is_open());
    }

    #[test]
    fn test_status_description() {
        assert!(CircuitBreakerStatus::Closed.allows_calls());
        assert!(CircuitBreakerStatus::HalfOpen.allows_calls());
        assert!(!CircuitBreakerStatus::Open.allows_calls());
        assert!(CircuitBreakerStatus::Open.description().contains("OPEN"));
    }

    #[tokio::test]
    async fn test_shared_handle() {
        let shared = create_test_breaker().shared();
        {
            let mut guard = shared.lock().await;
            guard.record_failure(t(0));
        }
        assert_eq!(shared.lock().await.consecutive_failures(), 1);
    }
}
