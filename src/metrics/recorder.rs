//! Metrics Recorder
//!
//! In-process store for every counter, gauge and histogram series. Each
//! series lives behind its own `Arc` in a sharded map, so recording on one
//! label set never contends with another: after the first observation of a
//! series, updates are a shard read lock plus relaxed atomics.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use tracing::debug;

use super::histogram::{normalize_bounds, AtomicHistogram, Exemplar, HistogramSnapshot};
use super::names;
use crate::ids::TraceId;

/// Label pairs as passed by callers. Order does not matter.
pub type Labels<'a> = &'a [(&'a str, &'a str)];

// =============================================================================
// Series Key
// =============================================================================

/// Metric name plus its label set, sorted by label name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SeriesKey {
    name: String,
    labels: Vec<(String, String)>,
}

impl SeriesKey {
    pub fn new(name: &str, labels: Labels<'_>) -> Self {
        let mut labels: Vec<(String, String)> = labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        labels.sort();
        labels.dedup_by(|a, b| a.0 == b.0);
        Self {
            name: name.to_string(),
            labels,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn labels(&self) -> &[(String, String)] {
        &self.labels
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// True when the name matches and every filter pair is present.
    pub fn matches(&self, name: &str, filter: Labels<'_>) -> bool {
        self.name == name && filter.iter().all(|(k, v)| self.label(k) == Some(*v))
    }
}

// =============================================================================
// Records
// =============================================================================

/// One exemplar as served on `/exemplars`.
#[derive(Debug, Clone, Serialize)]
pub struct ExemplarRecord {
    pub metric: String,
    pub labels: BTreeMap<String, String>,
    /// Bucket upper bound, `+Inf` for the overflow bucket.
    pub le: String,
    #[serde(flatten)]
    pub exemplar: Exemplar,
}

#[derive(Debug, Clone)]
struct HistogramLayout {
    help: String,
    bounds: Arc<[f64]>,
}

// =============================================================================
// Recorder
// =============================================================================

#[derive(Debug)]
pub struct MetricsRecorder {
    layouts: DashMap<String, HistogramLayout>,
    histograms: DashMap<SeriesKey, Arc<AtomicHistogram>>,
    counters: DashMap<SeriesKey, Arc<AtomicU64>>,
    /// `f64` bit patterns.
    gauges: DashMap<SeriesKey, Arc<AtomicU64>>,
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsRecorder {
    /// Create a recorder with layouts for every well-known histogram.
    pub fn new() -> Self {
        let recorder = Self {
            layouts: DashMap::new(),
            histograms: DashMap::new(),
            counters: DashMap::new(),
            gauges: DashMap::new(),
        };

        for name in [names::REQUEST_DURATION_SECONDS, names::SPAN_DURATION_SECONDS] {
            recorder.register_histogram(name, names::help_for(name), names::DEFAULT_LATENCY_BUCKETS);
        }
        for name in [
            names::DB_OPERATION_DURATION_SECONDS,
            names::CACHE_OPERATION_DURATION_SECONDS,
        ] {
            recorder.register_histogram(name, names::help_for(name), names::BACKEND_LATENCY_BUCKETS);
        }
        recorder.register_histogram(
            names::SLO_REQUEST_LATENCY_SECONDS,
            names::help_for(names::SLO_REQUEST_LATENCY_SECONDS),
            names::SLO_LATENCY_BUCKETS,
        );

        recorder
    }

    /// Fix the bucket layout for a histogram. Series created before the call
    /// keep their old layout, so register during startup.
    pub fn register_histogram(&self, name: &str, help: &str, bounds: &[f64]) {
        let bounds = normalize_bounds(bounds.to_vec());
        self.layouts.insert(
            name.to_string(),
            HistogramLayout {
                help: help.to_string(),
                bounds: bounds.into(),
            },
        );
    }

    /// Merge extra bounds into a registered layout.
    pub fn extend_buckets(&self, name: &str, extra: impl IntoIterator<Item = f64>) {
        let Some(mut layout) = self.layouts.get_mut(name) else {
            debug!(metric = %name, "No layout registered, ignoring extra buckets");
            return;
        };
        let mut bounds = layout.bounds.to_vec();
        bounds.extend(extra);
        layout.bounds = normalize_bounds(bounds).into();
    }

    pub fn bucket_bounds(&self, name: &str) -> Vec<f64> {
        self.layout(name).bounds.to_vec()
    }

    pub fn help(&self, name: &str) -> String {
        self.layouts
            .get(name)
            .map(|l| l.help.clone())
            .unwrap_or_else(|| names::help_for(name).to_string())
    }

    fn layout(&self, name: &str) -> HistogramLayout {
        self.layouts
            .get(name)
            .map(|l| l.clone())
            .unwrap_or_else(|| HistogramLayout {
                help: names::help_for(name).to_string(),
                bounds: normalize_bounds(names::DEFAULT_LATENCY_BUCKETS.to_vec()).into(),
            })
    }

    // =========================================================================
    // Write Side
    // =========================================================================

    /// Observe a latency in seconds, optionally linking a trace.
    pub fn observe_latency(
        &self,
        metric: &str,
        labels: Labels<'_>,
        seconds: f64,
        exemplar: Option<TraceId>,
    ) {
        let key = SeriesKey::new(metric, labels);
        let series = match self.histograms.get(&key) {
            Some(series) => Arc::clone(series.value()),
            None => {
                let bounds = self.layout(metric).bounds;
                Arc::clone(
                    self.histograms
                        .entry(key)
                        .or_insert_with(|| Arc::new(AtomicHistogram::new(bounds)))
                        .value(),
                )
            }
        };
        series.observe(seconds, exemplar);
    }

    pub fn increment_counter(&self, name: &str, labels: Labels<'_>) {
        self.add_counter(name, labels, 1);
    }

    pub fn add_counter(&self, name: &str, labels: Labels<'_>, n: u64) {
        Self::cell(&self.counters, name, labels, 0).fetch_add(n, Ordering::Relaxed);
    }

    pub fn set_gauge(&self, name: &str, labels: Labels<'_>, value: f64) {
        Self::cell(&self.gauges, name, labels, 0f64.to_bits())
            .store(value.to_bits(), Ordering::Relaxed);
    }

    fn cell(
        map: &DashMap<SeriesKey, Arc<AtomicU64>>,
        name: &str,
        labels: Labels<'_>,
        initial: u64,
    ) -> Arc<AtomicU64> {
        let key = SeriesKey::new(name, labels);
        if let Some(cell) = map.get(&key) {
            return Arc::clone(cell.value());
        }
        Arc::clone(
            map.entry(key)
                .or_insert_with(|| Arc::new(AtomicU64::new(initial)))
                .value(),
        )
    }

    // =========================================================================
    // Read Side
    // =========================================================================

    /// Sum every series of `metric` whose labels include `filter`.
    pub fn histogram_snapshot(&self, metric: &str, filter: Labels<'_>) -> HistogramSnapshot {
        let mut total = HistogramSnapshot::empty(self.bucket_bounds(metric));

        for entry in self.histograms.iter() {
            if !entry.key().matches(metric, filter) {
                continue;
            }
            let snap = entry.value().snapshot();
            if snap.bounds != total.bounds {
                debug!(metric = %metric, "Skipping series with stale bucket layout");
                continue;
            }
            total.merge(&snap);
        }

        total
    }

    /// Sum of every series of `name` whose labels include `filter`.
    pub fn counter_total(&self, name: &str, filter: Labels<'_>) -> u64 {
        self.counters
            .iter()
            .filter(|e| e.key().matches(name, filter))
            .map(|e| e.value().load(Ordering::Relaxed))
            .sum()
    }

    /// Value of one exact gauge series.
    pub fn gauge_value(&self, name: &str, labels: Labels<'_>) -> Option<f64> {
        self.gauges
            .get(&SeriesKey::new(name, labels))
            .map(|g| f64::from_bits(g.load(Ordering::Relaxed)))
    }

    pub fn exemplars(&self) -> Vec<ExemplarRecord> {
        let mut records: Vec<ExemplarRecord> = self
            .histograms
            .iter()
            .flat_map(|entry| {
                let key = entry.key().clone();
                entry
                    .value()
                    .exemplars()
                    .into_iter()
                    .map(move |(le, exemplar)| ExemplarRecord {
                        metric: key.name().to_string(),
                        labels: key.labels().iter().cloned().collect(),
                        le: if le.is_finite() {
                            le.to_string()
                        } else {
                            "+Inf".to_string()
                        },
                        exemplar,
                    })
            })
            .collect();
        records.sort_by(|a, b| (&a.metric, &a.labels).cmp(&(&b.metric, &b.labels)));
        records
    }

    pub(crate) fn histogram_series(&self) -> Vec<(SeriesKey, HistogramSnapshot)> {
        self.histograms
            .iter()
            .map(|e| (e.key().clone(), e.value().snapshot()))
            .collect()
    }

    pub(crate) fn counter_series(&self) -> Vec<(SeriesKey, u64)> {
        self.counters
            .iter()
            .map(|e| (e.key().clone(), e.value().load(Ordering::Relaxed)))
            .collect()
    }

    pub(crate) fn gauge_series(&self) -> Vec<(SeriesKey, f64)> {
        self.gauges
            .iter()
            .map(|e| (e.key().clone(), f64::from_bits(e.value().load(Ordering::Relaxed))))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // =========================================================================
    // Series Key Tests
    // =========================================================================

    #[test]
    fn test_series_key_is_order_insensitive() {
        let a = SeriesKey::new("m", &[("b", "2"), ("a", "1")]);
        let b = SeriesKey::new("m", &[("a", "1"), ("b", "2")]);
        assert_eq!(a, b);
        assert_eq!(a.label("b"), Some("2"));
    }

    #[test]
    fn test_series_key_filter() {
        let key = SeriesKey::new("m", &[("slo", "api"), ("endpoint", "/health")]);
        assert!(key.matches("m", &[]));
        assert!(key.matches("m", &[("slo", "api")]));
        assert!(!key.matches("m", &[("slo", "other")]));
        assert!(!key.matches("n", &[]));
    }

    // =========================================================================
    // Recording Tests
    // =========================================================================

    #[test]
    fn test_histogram_snapshot_merges_matching_series() {
        let recorder = MetricsRecorder::new();
        let metric = names::SLO_REQUEST_LATENCY_SECONDS;

        recorder.observe_latency(metric, &[("endpoint", "a"), ("slo", "s")], 0.05, None);
        recorder.observe_latency(metric, &[("endpoint", "b"), ("slo", "s")], 0.5, None);
        recorder.observe_latency(metric, &[("endpoint", "c"), ("slo", "t")], 0.05, None);

        let snap = recorder.histogram_snapshot(metric, &[("slo", "s")]);
        assert_eq!(snap.count, 2);
        assert_eq!(snap.count_within(0.1), 1);
    }

    #[test]
    fn test_extend_buckets_inserts_thresholds() {
        let recorder = MetricsRecorder::new();
        recorder.extend_buckets(names::SLO_REQUEST_LATENCY_SECONDS, [0.2, 0.1]);

        let bounds = recorder.bucket_bounds(names::SLO_REQUEST_LATENCY_SECONDS);
        assert!(bounds.contains(&0.2));
        assert_eq!(bounds.iter().filter(|&&b| b == 0.1).count(), 1);
        assert!(bounds.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_unregistered_histogram_uses_default_layout() {
        let recorder = MetricsRecorder::new();
        recorder.observe_latency("custom_seconds", &[], 0.01, None);

        let snap = recorder.histogram_snapshot("custom_seconds", &[]);
        assert_eq!(snap.bounds, names::DEFAULT_LATENCY_BUCKETS.to_vec());
        assert_eq!(snap.count, 1);
    }

    #[test]
    fn test_counters_and_gauges() {
        let recorder = MetricsRecorder::new();
        recorder.increment_counter("c", &[("k", "a")]);
        recorder.add_counter("c", &[("k", "b")], 4);
        recorder.set_gauge("g", &[("w", "5m")], 0.75);
        recorder.set_gauge("g", &[("w", "5m")], -0.25);

        assert_eq!(recorder.counter_total("c", &[]), 5);
        assert_eq!(recorder.counter_total("c", &[("k", "a")]), 1);
        assert_eq!(recorder.counter_total("missing", &[]), 0);
        assert_eq!(recorder.gauge_value("g", &[("w", "5m")]), Some(-0.25));
        assert_eq!(recorder.gauge_value("g", &[("w", "1h")]), None);
    }

    #[test]
    fn test_exemplar_records() {
        let recorder = MetricsRecorder::new();
        recorder.observe_latency(
            names::REQUEST_DURATION_SECONDS,
            &[("endpoint", "/")],
            0.02,
            Some(TraceId::new(42)),
        );

        let records = recorder.exemplars();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].le, "0.025");
        assert_eq!(records[0].labels.get("endpoint").map(String::as_str), Some("/"));

        let json = serde_json::to_value(&records[0]).unwrap();
        assert_eq!(json["trace_id"], "0000000000000000000000000000002a");
    }

    #[test]
    fn test_concurrent_label_sets() {
        let recorder = Arc::new(MetricsRecorder::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let recorder = Arc::clone(&recorder);
                std::thread::spawn(move || {
                    let label = format!("op{}", i % 4);
                    for _ in 0..500 {
                        recorder.increment_counter("ops", &[("operation", label.as_str())]);
                        recorder.observe_latency("lat", &[("operation", label.as_str())], 0.01, None);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(recorder.counter_total("ops", &[]), 4000);
        assert_eq!(recorder.counter_total("ops", &[("operation", "op1")]), 1000);
        assert_eq!(recorder.histogram_snapshot("lat", &[]).count, 4000);
    }
}
