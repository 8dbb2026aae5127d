use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use super::alert::{AlertError, AlertSink};
use super::discovery::{DiscoveryError, DiscoveryQuery, DiscoverySource};
use super::metadata::{MetadataError, MetadataSource};
use crate::domain::{Candidate, Feed, MetadataRecord};

type MetadataResult = Result<MetadataRecord, MetadataError>;

/// Scripted metadata source that records calls and tracks concurrency
#[derive(Debug)]
pub struct ScriptedMetadata {
    calls: Arc<Mutex<Vec<String>>>,
    scripted: Arc<Mutex<HashMap<String, VecDeque<MetadataResult>>>>,
    fallback: Arc<Mutex<MetadataResult>>,
    latency: Duration,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl Default for ScriptedMetadata {
    fn default() -> Self {
        Self {
            calls: Arc::default(),
            scripted: Arc::default(),
            fallback: Arc::new(Mutex::new(Ok(MetadataRecord::default()))),
            latency: Duration::ZERO,
            in_flight: Arc::default(),
            max_in_flight: Arc::default(),
        }
    }
}

impl ScriptedMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method to queue a response for a given id (consumed in order)
    pub fn with_response(self, id: &str, response: MetadataResult) -> Self {
        self.scripted
            .lock()
            .unwrap()
            .entry(id.to_string())
            .or_default()
            .push_back(response);
        self
    }

    /// Builder method to set the response used when nothing is queued
    pub fn with_fallback(self, response: MetadataResult) -> Self {
        *self.fallback.lock().unwrap() = response;
        self
    }

    /// Builder method to delay every call
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Replace the fallback after construction
    pub fn set_fallback(&self, response: MetadataResult) {
        *self.fallback.lock().unwrap() = response;
    }

    /// Get all recorded calls
    pub fn get_calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Highest number of simultaneously outstanding calls observed
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MetadataSource for ScriptedMetadata {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn fetch_metadata(&self, id: &str) -> Result<MetadataRecord, MetadataError> {
        self.calls.lock().unwrap().push(id.to_string());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let queued = self
            .scripted
            .lock()
            .unwrap()
            .get_mut(id)
            .and_then(|q| q.pop_front());
        queued.unwrap_or_else(|| self.fallback.lock().unwrap().clone())
    }
}

/// Discovery source returning a fixed response and counting calls
#[derive(Debug)]
pub struct StaticDiscovery {
    feed: Feed,
    response: Result<Vec<Value>, DiscoveryError>,
    latency: Duration,
    queries: Arc<Mutex<Vec<DiscoveryQuery>>>,
}

impl StaticDiscovery {
    pub fn new(feed: Feed, records: Vec<Value>) -> Self {
        Self {
            feed,
            response: Ok(records),
            latency: Duration::ZERO,
            queries: Arc::default(),
        }
    }

    pub fn failing(feed: Feed, error: DiscoveryError) -> Self {
        Self {
            feed,
            response: Err(error),
            latency: Duration::ZERO,
            queries: Arc::default(),
        }
    }

    /// Builder method to delay every fetch
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Get all recorded queries
    pub fn get_queries(&self) -> Vec<DiscoveryQuery> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl DiscoverySource for StaticDiscovery {
    fn feed(&self) -> Feed {
        self.feed
    }

    async fn fetch_raw(&self, query: &DiscoveryQuery) -> Result<Vec<Value>, DiscoveryError> {
        self.queries.lock().unwrap().push(query.clone());
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.response.clone()
    }
}

/// Alert sink that keeps every delivered batch
#[derive(Debug, Default)]
pub struct RecordingAlertSink {
    delivered: Arc<Mutex<Vec<(String, Vec<Candidate>)>>>,
}

impl RecordingAlertSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all delivered batches
    pub fn get_deliveries(&self) -> Vec<(String, Vec<Candidate>)> {
        self.delivered.lock().unwrap().clone()
    }
}

#[async_trait]
impl AlertSink for RecordingAlertSink {
    async fn deliver(&self, profile: &str, candidates: &[Candidate]) -> Result<(), AlertError> {
        self.delivered
            .lock()
            .unwrap()
            .push((profile.to_string(), candidates.to_vec()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn test_scripted_metadata_queue_then_fallback() {
        let mock = ScriptedMetadata::new()
            .with_response("A", Err(MetadataError::Transient("503".into())))
            .with_fallback(Ok(MetadataRecord {
                market_cap: Some(1.0),
                ..Default::default()
            }));

        assert!(mock.fetch_metadata("A").await.is_err());
        assert_eq!(mock.fetch_metadata("A").await.unwrap().market_cap, Some(1.0));
        assert_eq!(mock.get_calls(), vec!["A".to_string(), "A".to_string()]);
        assert_eq!(mock.max_in_flight(), 1);
    }

    #[tokio::test]
    async fn test_static_discovery_records_queries() {
        let mock = StaticDiscovery::new(Feed::NewTokens, vec![serde_json::json!({"mint": "A"})]);
        let query = DiscoveryQuery::new(Utc::now(), 5);

        let records = mock.fetch_raw(&query).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(mock.get_queries(), vec![query]);
    }

    #[tokio::test]
    async fn test_recording_alert_sink() {
        let sink = RecordingAlertSink::new();
        let candidate = Candidate::new("A", Feed::Trending);
        sink.deliver("trending", &[candidate]).await.unwrap();

        let delivered = sink.get_deliveries();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].0, "trending");
        assert_eq!(delivered[0].1[0].id(), "A");
    }
}
