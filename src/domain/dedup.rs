//! Enrichment Deduplicator
//!
//! Tracks which candidate ids have been enriched and remembers the outcome,
//! so a token that shows up in several discovery windows costs one upstream
//! call per process lifetime (or until evicted).

use std::collections::{HashMap, VecDeque};
use tokio::sync::Mutex;

use super::candidate::MetadataRecord;

/// Default number of completed outcomes kept before the oldest are evicted
pub const DEFAULT_MAX_ENTRIES: usize = 50_000;

/// Stale order slots tolerated before a compaction pass
const ORDER_SLACK: usize = 64;

/// Remembered result of a finished enrichment
#[derive(Debug, Clone, PartialEq)]
pub enum EnrichmentOutcome {
    Enriched(MetadataRecord),
    Failed,
}

/// Result of trying to claim an id for enrichment
#[derive(Debug, Clone, PartialEq)]
pub enum DedupClaim {
    /// Caller now owns the id and must `complete` or `release` it
    Fresh,
    /// Another task is enriching this id right now
    InFlight,
    /// Already enriched earlier
    Cached(EnrichmentOutcome),
}

#[derive(Debug)]
enum Entry {
    InFlight,
    Done { outcome: EnrichmentOutcome, generation: u64 },
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    /// Completion order for eviction
    order: VecDeque<(String, u64)>,
    next_generation: u64,
    completed: usize,
}

impl Inner {
    fn is_current(&self, id: &str, gen: u64) -> bool {
        matches!(
            self.entries.get(id),
            Some(Entry::Done { generation, .. }) if *generation == gen
        )
    }

    /// Drop order slots whose entry was evicted or completed again.
    /// Runs once stale slots outnumber live ones, so the cost is amortized.
    fn compact_order(&mut self) {
        if self.order.len() <= (self.completed * 2).max(ORDER_SLACK) {
            return;
        }
        let order = std::mem::take(&mut self.order);
        self.order = order
            .into_iter()
            .filter(|(id, gen)| self.is_current(id, *gen))
            .collect();
    }
}

/// Concurrent seen-set with cached outcomes
#[derive(Debug)]
pub struct Deduplicator {
    inner: Mutex<Inner>,
    max_entries: usize,
}

impl Default for Deduplicator {
    fn default() -> Self {
        Self::new()
    }
}

impl Deduplicator {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_ENTRIES)
    }

    /// Create a deduplicator that keeps at most `max_entries` completed outcomes
    pub fn with_capacity(max_entries: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            max_entries: max_entries.max(1),
        }
    }

    /// Atomically check the seen-set and claim `id` if it is new
    pub async fn claim(&self, id: &str) -> DedupClaim {
        let mut inner = self.inner.lock().await;
        match inner.entries.get(id) {
            Some(Entry::InFlight) => DedupClaim::InFlight,
            Some(Entry::Done { outcome, .. }) => DedupClaim::Cached(outcome.clone()),
            None => {
                inner.entries.insert(id.to_string(), Entry::InFlight);
                DedupClaim::Fresh
            }
        }
    }

    /// Store the outcome for a claimed id
    pub async fn complete(&self, id: &str, outcome: EnrichmentOutcome) {
        let mut inner = self.inner.lock().await;
        let generation = inner.next_generation;
        inner.next_generation += 1;

        let previous = inner
            .entries
            .insert(id.to_string(), Entry::Done { outcome, generation });
        if !matches!(previous, Some(Entry::Done { .. })) {
            inner.completed += 1;
        }
        inner.order.push_back((id.to_string(), generation));

        while inner.completed > self.max_entries {
            let Some((oldest, gen)) = inner.order.pop_front() else {
                break;
            };
            if inner.is_current(&oldest, gen) {
                inner.entries.remove(&oldest);
                inner.completed -= 1;
                tracing::debug!("Dedup capacity reached, evicted {}", oldest);
            }
        }
        inner.compact_order();
    }

    /// Drop an unfinished claim so a later cycle may try again
    pub async fn release(&self, id: &str) {
        let mut inner = self.inner.lock().await;
        if matches!(inner.entries.get(id), Some(Entry::InFlight)) {
            inner.entries.remove(id);
        }
    }

    /// Forget a completed id. Returns true if it was present.
    pub async fn evict(&self, id: &str) -> bool {
        let mut inner = self.inner.lock().await;
        match inner.entries.get(id) {
            Some(Entry::Done { .. }) => {
                inner.entries.remove(id);
                inner.completed -= 1;
                true
            }
            _ => false,
        }
    }

    /// True if `id` has a completed outcome
    pub async fn contains(&self, id: &str) -> bool {
        let inner = self.inner.lock().await;
        matches!(inner.entries.get(id), Some(Entry::Done { .. }))
    }

    /// Number of completed outcomes held
    pub async fn len(&self) -> usize {
        self.inner.lock().await.completed
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn clear(&self) {
        let mut inner = self.inner.lock().await;
        *inner = Inner::default();
    }
}
