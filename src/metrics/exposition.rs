//! Prometheus text exposition of recorder state.

use std::collections::BTreeMap;

use prometheus::proto::{
    Bucket, Counter, Gauge, Histogram, LabelPair, Metric, MetricFamily, MetricType,
};
use prometheus::{Encoder, TextEncoder};

use super::recorder::{MetricsRecorder, SeriesKey};
use crate::error::{Error, Result};

fn label_pairs(key: &SeriesKey) -> Vec<LabelPair> {
    key.labels()
        .iter()
        .map(|(name, value)| {
            let mut pair = LabelPair::default();
            pair.set_name(name.clone());
            pair.set_value(value.clone());
            pair
        })
        .collect()
}

fn family(name: &str, help: String, kind: MetricType, metrics: Vec<Metric>) -> MetricFamily {
    let mut family = MetricFamily::default();
    family.set_name(name.to_string());
    family.set_help(help);
    family.set_field_type(kind);
    for metric in metrics {
        family.mut_metric().push(metric);
    }
    family
}

/// Build metric families for every series, sorted by name.
pub fn gather(recorder: &MetricsRecorder) -> Vec<MetricFamily> {
    let mut grouped: BTreeMap<String, (MetricType, Vec<Metric>)> = BTreeMap::new();

    for (key, value) in recorder.counter_series() {
        let mut counter = Counter::default();
        counter.set_value(value as f64);

        let mut metric = Metric::default();
        metric.set_label(label_pairs(&key));
        metric.set_counter(counter);

        grouped
            .entry(key.name().to_string())
            .or_insert_with(|| (MetricType::COUNTER, Vec::new()))
            .1
            .push(metric);
    }

    for (key, value) in recorder.gauge_series() {
        let mut gauge = Gauge::default();
        gauge.set_value(value);

        let mut metric = Metric::default();
        metric.set_label(label_pairs(&key));
        metric.set_gauge(gauge);

        grouped
            .entry(key.name().to_string())
            .or_insert_with(|| (MetricType::GAUGE, Vec::new()))
            .1
            .push(metric);
    }

    for (key, snap) in recorder.histogram_series() {
        let mut histogram = Histogram::default();
        histogram.set_sample_count(snap.count);
        histogram.set_sample_sum(snap.sum);
        let buckets = snap
            .bounds
            .iter()
            .zip(&snap.cumulative)
            .map(|(bound, count)| {
                let mut bucket = Bucket::default();
                bucket.set_upper_bound(*bound);
                bucket.set_cumulative_count(*count);
                bucket
            })
            .collect();
        histogram.set_bucket(buckets);

        let mut metric = Metric::default();
        metric.set_label(label_pairs(&key));
        metric.set_histogram(histogram);

        grouped
            .entry(key.name().to_string())
            .or_insert_with(|| (MetricType::HISTOGRAM, Vec::new()))
            .1
            .push(metric);
    }

    grouped
        .into_iter()
        .filter(|(_, (_, metrics))| !metrics.is_empty())
        .map(|(name, (kind, metrics))| {
            let help = recorder.help(&name);
            family(&name, help, kind, metrics)
        })
        .collect()
}

/// Encode every series in the Prometheus text format.
/// Returns the content type alongside the body.
pub fn encode_text(recorder: &MetricsRecorder) -> Result<(String, Vec<u8>)> {
    let encoder = TextEncoder::new();
    let families = gather(recorder);
    let mut buffer = Vec::new();
    encoder
        .encode(&families, &mut buffer)
        .map_err(|e| Error::Internal(format!("Failed to encode metrics: {}", e)))?;
    Ok((encoder.format_type().to_string(), buffer))
}

/// Exemplars as a JSON array.
pub fn encode_exemplars(recorder: &MetricsRecorder) -> Result<Vec<u8>> {
    serde_json::to_vec(&recorder.exemplars())
        .map_err(|e| Error::Internal(format!("Failed to encode exemplars: {}", e)))
}
