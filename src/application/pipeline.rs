//! Pipeline Orchestrator
//!
//! One cycle is fetch -> enrich -> filter -> emit. `PipelineRunner` repeats
//! cycles for every configured scan and hands survivors to an alert sink.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{Notify, RwLock};
use tokio::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

use super::enricher::{Disposition, Enricher, EnricherConfig};
use super::fetcher::{CandidateFetcher, FetchWindow};
use crate::domain::{
    filter, Candidate, CircuitBreaker, CircuitBreakerState, Deduplicator, Feed, FilterProfile,
    SharedCircuitBreaker,
};
use crate::ports::{AlertSink, DiscoverySource, MetadataSource};

/// Default bound on the enrichment stage of one cycle
pub const DEFAULT_CYCLE_TIMEOUT_SECS: u64 = 45;

/// Tunables for one pipeline
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub enricher: EnricherConfig,
    pub failure_threshold: u32,
    pub cooldown: Duration,
    pub cycle_timeout: Duration,
    pub dedup_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            enricher: EnricherConfig::default(),
            failure_threshold: crate::domain::circuit_breaker::DEFAULT_FAILURE_THRESHOLD,
            cooldown: Duration::from_secs(crate::domain::circuit_breaker::DEFAULT_COOLDOWN_SECS),
            cycle_timeout: Duration::from_secs(DEFAULT_CYCLE_TIMEOUT_SECS),
            dedup_capacity: crate::domain::dedup::DEFAULT_MAX_ENTRIES,
        }
    }
}

/// Stage counts for one cycle
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CycleReport {
    pub cycle_id: String,
    pub profile: String,
    pub fetched: usize,
    pub enriched: usize,
    pub failed: usize,
    pub cached: usize,
    /// In flight elsewhere or skipped by the open breaker
    pub skipped: usize,
    pub timed_out: usize,
    pub passed: usize,
    pub elapsed_ms: u64,
}

/// Fetch, enrich and filter for one discovery feed.
///
/// Owns its deduplicator and breaker, so pipelines for different scans
/// never share state.
pub struct Pipeline {
    fetcher: CandidateFetcher,
    enricher: Enricher,
    dedup: Arc<Deduplicator>,
    breaker: SharedCircuitBreaker,
    cycle_timeout: Duration,
}

impl Pipeline {
    pub fn new(discovery: Arc<dyn DiscoverySource>, metadata: Arc<dyn MetadataSource>) -> Self {
        Self::with_config(discovery, metadata, PipelineConfig::default())
    }

    pub fn with_config(
        discovery: Arc<dyn DiscoverySource>,
        metadata: Arc<dyn MetadataSource>,
        config: PipelineConfig,
    ) -> Self {
        let dedup = Arc::new(Deduplicator::with_capacity(config.dedup_capacity));
        let breaker = CircuitBreaker::with_config(config.failure_threshold, config.cooldown).shared();
        let enricher = Enricher::with_config(metadata, dedup.clone(), breaker.clone(), config.enricher);

        Self {
            fetcher: CandidateFetcher::new(discovery),
            enricher,
            dedup,
            breaker,
            cycle_timeout: config.cycle_timeout,
        }
    }

    pub fn feed(&self) -> Feed {
        self.fetcher.feed()
    }

    pub fn dedup(&self) -> &Arc<Deduplicator> {
        &self.dedup
    }

    pub fn breaker(&self) -> &SharedCircuitBreaker {
        &self.breaker
    }

    /// Monitoring snapshot of this pipeline's breaker
    pub async fn breaker_state(&self) -> CircuitBreakerState {
        self.breaker.lock().await.state(Utc::now())
    }

    /// Run one cycle and return the candidates that passed `profile`
    pub async fn run_cycle(
        &self,
        window: &FetchWindow,
        profile: &FilterProfile,
        max_concurrency: usize,
    ) -> Vec<Candidate> {
        self.run_cycle_with_report(window, profile, max_concurrency)
            .await
            .0
    }

    /// Run one cycle and also return its stage counts
    pub async fn run_cycle_with_report(
        &self,
        window: &FetchWindow,
        profile: &FilterProfile,
        max_concurrency: usize,
    ) -> (Vec<Candidate>, CycleReport) {
        let cycle_id = Uuid::new_v4().to_string();
        let span = tracing::info_span!("cycle", cycle_id = %cycle_id, profile = profile.name());

        self.cycle(cycle_id, window, profile, max_concurrency)
            .instrument(span)
            .await
    }

    async fn cycle(
        &self,
        cycle_id: String,
        window: &FetchWindow,
        profile: &FilterProfile,
        max_concurrency: usize,
    ) -> (Vec<Candidate>, CycleReport) {
        let started = Instant::now();
        let mut report = CycleReport {
            cycle_id,
            profile: profile.name().to_string(),
            ..CycleReport::default()
        };

        let candidates = self.fetcher.fetch_candidates(window, &report.cycle_id).await;
        report.fetched = candidates.len();

        if candidates.is_empty() {
            report.elapsed_ms = started.elapsed().as_millis() as u64;
            tracing::info!("Cycle finished: nothing fetched ({}ms)", report.elapsed_ms);
            return (Vec::new(), report);
        }

        let deadline = started + self.cycle_timeout;
        let enrichment = self
            .enricher
            .enrich_with_report(candidates, max_concurrency, Some(deadline))
            .await;

        report.enriched = enrichment.count(Disposition::Enriched);
        report.failed = enrichment.count(Disposition::Failed);
        report.cached = enrichment.count(Disposition::Cached);
        report.skipped =
            enrichment.count(Disposition::InFlight) + enrichment.count(Disposition::CircuitOpen);
        report.timed_out = enrichment.count(Disposition::TimedOut);

        let passed: Vec<Candidate> = enrichment
            .into_fresh()
            .into_iter()
            .filter(|candidate| {
                let verdict = filter::apply(candidate, profile);
                if !verdict.passed {
                    tracing::debug!("{} rejected: {}", candidate.id(), verdict.reason);
                }
                verdict.passed
            })
            .collect();

        report.passed = passed.len();
        report.elapsed_ms = started.elapsed().as_millis() as u64;

        tracing::info!(
            fetched = report.fetched,
            enriched = report.enriched,
            failed = report.failed,
            cached = report.cached,
            skipped = report.skipped,
            timed_out = report.timed_out,
            passed = report.passed,
            "Cycle finished in {}ms",
            report.elapsed_ms
        );

        (passed, report)
    }
}

/// One configured scan: a pipeline plus the window and profile it runs with
pub struct ScanJob {
    pub pipeline: Pipeline,
    pub window: FetchWindow,
    pub profile: Arc<FilterProfile>,
}

/// Repeats cycles for every scan until stopped
pub struct PipelineRunner {
    jobs: Vec<ScanJob>,
    sink: Arc<dyn AlertSink>,
    max_concurrency: usize,
    poll_interval: Duration,
    is_running: Arc<RwLock<bool>>,
    wake: Notify,
    cycles: AtomicU64,
}

impl PipelineRunner {
    pub fn new(jobs: Vec<ScanJob>, sink: Arc<dyn AlertSink>, max_concurrency: usize) -> Self {
        Self {
            jobs,
            sink,
            max_concurrency,
            is_running: Arc::new(RwLock::new(false)),
            poll_interval: Duration::from_secs(60),
            wake: Notify::new(),
            cycles: AtomicU64::new(0),
        }
    }

    /// Set custom poll interval
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn jobs(&self) -> &[ScanJob] {
        &self.jobs
    }

    /// Completed ticks since start
    pub fn cycles_completed(&self) -> u64 {
        self.cycles.load(Ordering::SeqCst)
    }

    /// Run the scheduling loop until `stop()` is called
    pub async fn run(&self) {
        *self.is_running.write().await = true;

        tracing::info!(
            "Starting pipeline runner - {} scan(s), poll interval: {:?}",
            self.jobs.len(),
            self.poll_interval
        );

        while *self.is_running.read().await {
            let delivered = self.tick().await;
            if delivered > 0 {
                tracing::info!("Delivered {} candidate(s) this round", delivered);
            }

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = self.wake.notified() => {}
            }
        }

        tracing::info!("Pipeline runner stopped");
    }

    /// Run one cycle per scan and deliver the survivors. Returns how many were delivered.
    pub async fn tick(&self) -> usize {
        let mut delivered = 0;

        for job in &self.jobs {
            let passed = job
                .pipeline
                .run_cycle(&job.window, &job.profile, self.max_concurrency)
                .await;
            if passed.is_empty() {
                continue;
            }

            match self.sink.deliver(job.profile.name(), &passed).await {
                Ok(()) => delivered += passed.len(),
                Err(e) => {
                    tracing::error!(
                        "Alert delivery failed for profile {}: {}",
                        job.profile.name(),
                        e
                    );
                }
            }
        }

        self.cycles.fetch_add(1, Ordering::SeqCst);
        delivered
    }

    /// Stop the loop after the current tick.
    ///
    /// The wake-up is stored as a permit, so a stop that lands mid-tick
    /// still cuts the following sleep short.
    pub async fn stop(&self) {
        *self.is_running.write().await = false;
        self.wake.notify_one();
        tracing::info!("Stop requested");
    }

    pub async fn is_running(&self) -> bool {
        *self.is_running.read().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::retry::RetryPolicy;
    use crate::domain::{MetadataRecord, Metric};
    use crate::ports::discovery::MockDiscoverySource;
    use crate::ports::mocks::{RecordingAlertSink, ScriptedMetadata};
    use crate::ports::alert::MockAlertSink;
    use crate::ports::{AlertError, DiscoveryError, MetadataError};
    use serde_json::json;

    fn fast_config() -> PipelineConfig {
        PipelineConfig {
            enricher: EnricherConfig {
                pacing_delay: Duration::ZERO,
                retry: RetryPolicy::immediate(1),
            },
            ..PipelineConfig::default()
        }
    }

    fn discovery(ids: &'static [&'static str]) -> Arc<dyn DiscoverySource> {
        let mut source = MockDiscoverySource::new();
        source.expect_feed().return_const(Feed::NewTokens);
        source.expect_fetch_raw().returning(move |_| {
            Ok(ids.iter().map(|id| json!({ "mint": id })).collect())
        });
        Arc::new(source)
    }

    fn metadata() -> ScriptedMetadata {
        ScriptedMetadata::new()
            .with_response(
                "GOOD",
                Ok(MetadataRecord {
                    market_cap: Some(50_000.0),
                    holder_count: Some(20),
                    ..Default::default()
                }),
            )
            .with_fallback(Ok(MetadataRecord {
                market_cap: Some(100.0),
                ..Default::default()
            }))
    }

    fn profile() -> FilterProfile {
        FilterProfile::builder("test")
            .min(Metric::MarketCap, 7000.0)
            .min(Metric::HolderCount, 5.0)
            .build()
            .unwrap()
    }

    fn window() -> FetchWindow {
        FetchWindow::new(Duration::from_secs(300), 50).unwrap()
    }

    #[tokio::test]
    async fn test_cycle_filters_enriched_candidates() {
        let pipeline = Pipeline::with_config(
            discovery(&["GOOD", "SMALL"]),
            Arc::new(metadata()),
            fast_config(),
        );

        let (passed, report) = pipeline.run_cycle_with_report(&window(), &profile(), 4).await;
        assert_eq!(passed.len(), 1);
        assert_eq!(passed[0].id(), "GOOD");
        assert_eq!(report.fetched, 2);
        assert_eq!(report.enriched, 2);
        assert_eq!(report.passed, 1);
        assert_eq!(report.profile, "test");
        assert!(Uuid::parse_str(&report.cycle_id).is_ok());
    }

    #[tokio::test]
    async fn test_overlapping_windows_emit_once() {
        let source = Arc::new(metadata());
        let pipeline = Pipeline::with_config(discovery(&["GOOD"]), source.clone(), fast_config());

        let first = pipeline.run_cycle(&window(), &profile(), 4).await;
        let (second, report) = pipeline.run_cycle_with_report(&window(), &profile(), 4).await;

        assert_eq!(first.len(), 1);
        assert!(second.is_empty());
        assert_eq!(report.cached, 1);
        assert_eq!(source.call_count(), 1);
    }

    #[tokio::test]
    async fn test_fetch_failure_is_empty_cycle() {
        let mut source = MockDiscoverySource::new();
        source.expect_feed().return_const(Feed::Graduated);
        source
            .expect_fetch_raw()
            .returning(|_| Err(DiscoveryError::Transport("connection refused".into())));
        let metadata = Arc::new(ScriptedMetadata::new());
        let pipeline = Pipeline::with_config(Arc::new(source), metadata.clone(), fast_config());

        let (passed, report) = pipeline.run_cycle_with_report(&window(), &profile(), 4).await;
        assert!(passed.is_empty());
        assert_eq!(report.fetched, 0);
        assert_eq!(metadata.call_count(), 0);
    }

    #[tokio::test]
    async fn test_cycle_timeout_counts_timed_out() {
        let metadata = ScriptedMetadata::new()
            .with_fallback(Ok(MetadataRecord::default()))
            .with_latency(Duration::from_secs(5));
        let config = PipelineConfig {
            cycle_timeout: Duration::from_millis(50),
            ..fast_config()
        };
        let pipeline = Pipeline::with_config(discovery(&["A", "B"]), Arc::new(metadata), config);

        let (passed, report) = pipeline.run_cycle_with_report(&window(), &profile(), 4).await;
        assert!(passed.is_empty());
        assert_eq!(report.timed_out, 2);
    }

    #[tokio::test]
    async fn test_pipelines_do_not_share_breakers() {
        let failing = Arc::new(
            ScriptedMetadata::new().with_fallback(Err(MetadataError::Transient("503".into()))),
        );
        let config = PipelineConfig {
            failure_threshold: 1,
            ..fast_config()
        };
        let a = Pipeline::with_config(discovery(&["X"]), failing.clone(), config.clone());
        let b = Pipeline::with_config(discovery(&["Y"]), failing, config);

        a.run_cycle(&window(), &profile(), 1).await;
        assert!(a.breaker().lock().await.is_open());
        assert!(!b.breaker().lock().await.is_open());
        assert_eq!(b.breaker_state().await.consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_runner_tick_delivers_passing() {
        let sink = Arc::new(RecordingAlertSink::new());
        let job = ScanJob {
            pipeline: Pipeline::with_config(
                discovery(&["GOOD", "SMALL"]),
                Arc::new(metadata()),
                fast_config(),
            ),
            window: window(),
            profile: Arc::new(profile()),
        };
        let runner = PipelineRunner::new(vec![job], sink.clone(), 4);

        assert_eq!(runner.tick().await, 1);
        assert_eq!(runner.tick().await, 0);

        let deliveries = sink.get_deliveries();
        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].0, "test");
        assert_eq!(deliveries[0].1[0].id(), "GOOD");
        assert_eq!(runner.cycles_completed(), 2);
    }

    #[tokio::test]
    async fn test_runner_survives_alert_errors() {
        let mut sink = MockAlertSink::new();
        sink.expect_deliver()
            .times(1)
            .returning(|_, _| Err(AlertError::DeliveryFailed("telegram down".into())));
        let job = ScanJob {
            pipeline: Pipeline::with_config(discovery(&["GOOD"]), Arc::new(metadata()), fast_config()),
            window: window(),
            profile: Arc::new(profile()),
        };
        let runner = PipelineRunner::new(vec![job], Arc::new(sink), 4);

        assert_eq!(runner.tick().await, 0);
    }

    #[tokio::test]
    async fn test_runner_run_and_stop() {
        let sink = Arc::new(RecordingAlertSink::new());
        let job = ScanJob {
            pipeline: Pipeline::with_config(discovery(&["GOOD"]), Arc::new(metadata()), fast_config()),
            window: window(),
            profile: Arc::new(profile()),
        };
        let runner = Arc::new(
            PipelineRunner::new(vec![job], sink.clone(), 4).with_poll_interval(Duration::from_millis(10)),
        );

        let handle = {
            let runner = runner.clone();
            tokio::spawn(async move { runner.run().await })
        };

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(runner.is_running().await);
        runner.stop().await;
        handle.await.unwrap();

        assert!(!runner.is_running().await);
        assert!(runner.cycles_completed() >= 2);
        // same token across cycles is delivered once
        assert_eq!(sink.get_deliveries().len(), 1);
    }
}
