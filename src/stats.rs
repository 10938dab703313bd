//! Usage statistics tracking for the remap engine
//!
//! Tracks per-record outcomes, soft-failure events, and reload health.
//! Counters are monotonic except on explicit reset.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// Engine statistics, shared between the per-record path and the
/// Reload Controller.
pub struct EngineStats {
    /// Records projected through a mapping
    records_transformed: AtomicU64,
    /// Records passed through unchanged (mapping miss)
    records_passed_through: AtomicU64,
    /// Payloads that were not valid JSON
    parse_failures: AtomicU64,
    /// Lookups that found no mapping
    mapping_misses: AtomicU64,
    /// Required fields that matched no path
    required_field_misses: AtomicU64,
    /// Transform soft failures (unparseable date, unresolved key, ...)
    transform_soft_failures: AtomicU64,
    /// Successful mapping reloads
    reload_successes: AtomicU64,
    /// Failed mapping reloads (last-known-good retained)
    reload_failures: AtomicU64,
    /// Unix millis of the last successful reload (0 = never)
    last_reload_unix_ms: AtomicU64,
    /// Per-topic miss counts
    misses_by_topic: DashMap<String, AtomicU64>,
}

impl EngineStats {
    /// Create a new statistics tracker
    #[must_use]
    pub fn new() -> Self {
        Self {
            records_transformed: AtomicU64::new(0),
            records_passed_through: AtomicU64::new(0),
            parse_failures: AtomicU64::new(0),
            mapping_misses: AtomicU64::new(0),
            required_field_misses: AtomicU64::new(0),
            transform_soft_failures: AtomicU64::new(0),
            reload_successes: AtomicU64::new(0),
            reload_failures: AtomicU64::new(0),
            last_reload_unix_ms: AtomicU64::new(0),
            misses_by_topic: DashMap::new(),
        }
    }

    /// Record a successfully transformed record
    pub fn record_transformed(&self) {
        self.records_transformed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a payload that failed to parse
    pub fn record_parse_failure(&self) {
        self.parse_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a mapping miss for a topic
    pub fn record_mapping_miss(&self, topic: &str) {
        self.mapping_misses.fetch_add(1, Ordering::Relaxed);
        self.records_passed_through.fetch_add(1, Ordering::Relaxed);
        self.misses_by_topic
            .entry(topic.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Record a required-field violation
    pub fn record_required_miss(&self) {
        self.required_field_misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a transform soft failure
    pub fn record_transform_failure(&self) {
        self.transform_soft_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a successful reload at the given wall-clock time
    pub fn record_reload_success(&self, unix_ms: u64) {
        self.reload_successes.fetch_add(1, Ordering::Relaxed);
        self.last_reload_unix_ms.store(unix_ms, Ordering::Relaxed);
    }

    /// Record a failed reload
    pub fn record_reload_failure(&self) {
        self.reload_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Miss count for a specific topic
    pub fn misses_for_topic(&self, topic: &str) -> u64 {
        self.misses_by_topic
            .get(topic)
            .map_or(0, |entry| entry.load(Ordering::Relaxed))
    }

    /// Get snapshot of current statistics
    pub fn snapshot(&self) -> StatsSnapshot {
        let mut missed_topics: Vec<(String, u64)> = self
            .misses_by_topic
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().load(Ordering::Relaxed)))
            .collect();
        missed_topics.sort_by(|a, b| b.1.cmp(&a.1));

        StatsSnapshot {
            records_transformed: self.records_transformed.load(Ordering::Relaxed),
            records_passed_through: self.records_passed_through.load(Ordering::Relaxed),
            parse_failures: self.parse_failures.load(Ordering::Relaxed),
            mapping_misses: self.mapping_misses.load(Ordering::Relaxed),
            required_field_misses: self.required_field_misses.load(Ordering::Relaxed),
            transform_soft_failures: self.transform_soft_failures.load(Ordering::Relaxed),
            reload_successes: self.reload_successes.load(Ordering::Relaxed),
            reload_failures: self.reload_failures.load(Ordering::Relaxed),
            last_reload_unix_ms: self.last_reload_unix_ms.load(Ordering::Relaxed),
            missed_topics,
        }
    }

    /// Reset every counter to zero
    pub fn reset(&self) {
        self.records_transformed.store(0, Ordering::Relaxed);
        self.records_passed_through.store(0, Ordering::Relaxed);
        self.parse_failures.store(0, Ordering::Relaxed);
        self.mapping_misses.store(0, Ordering::Relaxed);
        self.required_field_misses.store(0, Ordering::Relaxed);
        self.transform_soft_failures.store(0, Ordering::Relaxed);
        self.reload_successes.store(0, Ordering::Relaxed);
        self.reload_failures.store(0, Ordering::Relaxed);
        self.last_reload_unix_ms.store(0, Ordering::Relaxed);
        self.misses_by_topic.clear();
    }
}

impl Default for EngineStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of engine statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// Records projected through a mapping
    pub records_transformed: u64,
    /// Records passed through unchanged
    pub records_passed_through: u64,
    /// Payloads that were not valid JSON
    pub parse_failures: u64,
    /// Lookups that found no mapping
    pub mapping_misses: u64,
    /// Required fields that matched no path
    pub required_field_misses: u64,
    /// Transform soft failures
    pub transform_soft_failures: u64,
    /// Successful reloads
    pub reload_successes: u64,
    /// Failed reloads
    pub reload_failures: u64,
    /// Unix millis of the last successful reload (0 = never)
    pub last_reload_unix_ms: u64,
    /// Topics with misses, most-missed first
    pub missed_topics: Vec<(String, u64)>,
}
