//! In-process metrics sink
//!
//! Counters, gauges and histograms keyed by provider and error kind,
//! snapshotted as JSON for `GET /api/v1/metrics`. Counters are atomic;
//! histogram observations accumulate per label (one lock per label, so
//! contention stays provider-local) and merge at snapshot time.

use std::sync::Mutex;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use dashmap::DashMap;
use serde_json::json;

// Metric names surfaced in the snapshot
pub const PROVIDER_REQUESTS_TOTAL: &str = "provider_requests_total";
pub const PROVIDER_ERRORS_TOTAL: &str = "provider_errors_total";
pub const CIRCUIT_OPENS_TOTAL: &str = "circuit_opens_total";
pub const CIRCUIT_ADMIN_TRANSITIONS_TOTAL: &str = "circuit_admin_transitions_total";
pub const HEAL_REQUESTS_TOTAL: &str = "heal_requests_total";
pub const HEAL_COMMIT_TOTAL: &str = "heal_commit_total";
pub const HEAL_ROLLBACK_TOTAL: &str = "heal_rollback_total";
pub const OPEN_CIRCUITS: &str = "open_circuits";
pub const REQUEST_DURATION_SECONDS: &str = "request_duration_seconds";
pub const HEAL_DURATION_SECONDS: &str = "heal_duration_seconds";

/// Counter with a total and per-label breakdown
#[derive(Default)]
struct Counter {
    total: AtomicU64,
    by_label: DashMap<String, AtomicU64>,
}

impl Counter {
    fn inc(&self, label: &str) {
        self.total.fetch_add(1, Ordering::Relaxed);
        self.by_label
            .entry(label.to_owned())
            .or_default()
            .fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> serde_json::Value {
        let mut labels = serde_json::Map::new();
        for entry in &self.by_label {
            labels.insert(entry.key().clone(), json!(entry.value().load(Ordering::Relaxed)));
        }
        json!({
            "total": self.total.load(Ordering::Relaxed),
            "by_label": labels,
        })
    }
}

/// Bounded histogram state for one label
#[derive(Default)]
struct HistogramShard {
    observations: Vec<f64>,
    sum: f64,
    count: u64,
}

const MAX_OBSERVATIONS: usize = 1000;

impl HistogramShard {
    fn observe(&mut self, value: f64) {
        self.sum += value;
        self.count += 1;
        self.observations.push(value);
        if self.observations.len() > MAX_OBSERVATIONS {
            let excess = self.observations.len() - MAX_OBSERVATIONS;
            self.observations.drain(..excess);
        }
    }

    fn percentile(&self, p: f64) -> f64 {
        if self.observations.is_empty() {
            return 0.0;
        }
        let mut sorted = self.observations.clone();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let idx = ((sorted.len() as f64) * p) as usize;
        sorted[idx.min(sorted.len() - 1)]
    }
}

/// Histogram keyed by label
#[derive(Default)]
struct Histogram {
    shards: DashMap<String, Mutex<HistogramShard>>,
}

impl Histogram {
    fn observe(&self, label: &str, value: f64) {
        let shard = self.shards.entry(label.to_owned()).or_default();
        if let Ok(mut guard) = shard.lock() {
            guard.observe(value);
        }
    }

    fn snapshot(&self) -> serde_json::Value {
        let mut labels = serde_json::Map::new();
        let mut merged_sum = 0.0;
        let mut merged_count = 0u64;
        for entry in &self.shards {
            if let Ok(guard) = entry.value().lock() {
                merged_sum += guard.sum;
                merged_count += guard.count;
                labels.insert(
                    entry.key().clone(),
                    json!({
                        "count": guard.count,
                        "sum": guard.sum,
                        "p50": guard.percentile(0.50),
                        "p95": guard.percentile(0.95),
                    }),
                );
            }
        }
        json!({
            "count": merged_count,
            "sum": merged_sum,
            "by_label": labels,
        })
    }
}

/// Metrics collector shared across the gateway
#[derive(Default)]
pub struct MetricsSink {
    requests: Counter,
    provider_errors: Counter,
    circuit_opens: Counter,
    circuit_admin_transitions: Counter,
    heal_requests: Counter,
    heal_commits: Counter,
    heal_rollbacks: Counter,
    open_circuits: AtomicI64,
    request_duration: Histogram,
    heal_duration: Histogram,
}

impl MetricsSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self, provider: &str) {
        self.requests.inc(provider);
    }

    pub fn record_provider_error(&self, provider: &str, kind: &str) {
        self.provider_errors.inc(&format!("{provider}/{kind}"));
    }

    pub fn record_circuit_open(&self, provider: &str) {
        self.circuit_opens.inc(provider);
    }

    pub fn record_admin_transition(&self, provider: &str, action: &str) {
        self.circuit_admin_transitions.inc(&format!("{provider}/{action}"));
    }

    pub fn record_heal_request(&self, provider: &str, kind: &str) {
        self.heal_requests.inc(&format!("{provider}/{kind}"));
    }

    pub fn record_heal_commit(&self, provider: &str) {
        self.heal_commits.inc(provider);
    }

    pub fn record_heal_rollback(&self, provider: &str) {
        self.heal_rollbacks.inc(provider);
    }

    pub fn set_open_circuits(&self, count: i64) {
        self.open_circuits.store(count, Ordering::Relaxed);
    }

    pub fn observe_request_duration(&self, provider: &str, seconds: f64) {
        self.request_duration.observe(provider, seconds);
    }

    pub fn observe_heal_duration(&self, provider: &str, seconds: f64) {
        self.heal_duration.observe(provider, seconds);
    }

    /// JSON snapshot of every metric
    pub fn snapshot(&self) -> serde_json::Value {
        json!({
            PROVIDER_REQUESTS_TOTAL: self.requests.snapshot(),
            PROVIDER_ERRORS_TOTAL: self.provider_errors.snapshot(),
            CIRCUIT_OPENS_TOTAL: self.circuit_opens.snapshot(),
            CIRCUIT_ADMIN_TRANSITIONS_TOTAL: self.circuit_admin_transitions.snapshot(),
            HEAL_REQUESTS_TOTAL: self.heal_requests.snapshot(),
            HEAL_COMMIT_TOTAL: self.heal_commits.snapshot(),
            HEAL_ROLLBACK_TOTAL: self.heal_rollbacks.snapshot(),
            OPEN_CIRCUITS: self.open_circuits.load(Ordering::Relaxed),
            REQUEST_DURATION_SECONDS: self.request_duration.snapshot(),
            HEAL_DURATION_SECONDS: self.heal_duration.snapshot(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_track_labels_and_total() {
        let sink = MetricsSink::new();
        sink.record_provider_error("openai", "transient");
        sink.record_provider_error("openai", "transient");
        sink.record_provider_error("google", "schema_mismatch");

        let snapshot = sink.snapshot();
        assert_eq!(snapshot[PROVIDER_ERRORS_TOTAL]["total"], 3);
        assert_eq!(snapshot[PROVIDER_ERRORS_TOTAL]["by_label"]["openai/transient"], 2);
        assert_eq!(snapshot[PROVIDER_ERRORS_TOTAL]["by_label"]["google/schema_mismatch"], 1);
    }

    #[test]
    fn histogram_merges_shards() {
        let sink = MetricsSink::new();
        sink.observe_request_duration("a", 1.0);
        sink.observe_request_duration("b", 3.0);

        let snapshot = sink.snapshot();
        assert_eq!(snapshot[REQUEST_DURATION_SECONDS]["count"], 2);
        assert_eq!(snapshot[REQUEST_DURATION_SECONDS]["sum"], 4.0);
    }

    #[test]
    fn histogram_bounds_observations() {
        let histogram = Histogram::default();
        for i in 0..(MAX_OBSERVATIONS + 100) {
            histogram.observe("x", i as f64);
        }
        let shard = histogram.shards.get("x").unwrap();
        let guard = shard.lock().unwrap();
        assert_eq!(guard.observations.len(), MAX_OBSERVATIONS);
        assert_eq!(guard.count, (MAX_OBSERVATIONS + 100) as u64);
    }
}
