//! Lock-free cumulative histogram with per-bucket exemplars.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use crate::ids::TraceId;

/// Latest trace observed in one bucket.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Exemplar {
    pub trace_id: TraceId,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

/// Sort, dedup and drop non-finite bounds.
pub fn normalize_bounds(mut bounds: Vec<f64>) -> Vec<f64> {
    bounds.retain(|b| b.is_finite());
    bounds.sort_by(|a, b| a.total_cmp(b));
    bounds.dedup();
    bounds
}

/// Histogram metric
///
/// `buckets[i]` counts observations `<= bounds[i]`; the final slot is `+Inf`.
/// Every bucket at or above the value is incremented on observe, so the
/// stored counts are already cumulative.
#[derive(Debug)]
pub struct AtomicHistogram {
    bounds: Arc<[f64]>,
    buckets: Box<[AtomicU64]>,
    exemplars: Box<[Mutex<Option<Exemplar>>]>,
    count: AtomicU64,
    sum_bits: AtomicU64,
}

impl AtomicHistogram {
    pub fn new(bounds: Arc<[f64]>) -> Self {
        let slots = bounds.len() + 1;
        Self {
            buckets: (0..slots).map(|_| AtomicU64::new(0)).collect(),
            exemplars: (0..slots).map(|_| Mutex::new(None)).collect(),
            bounds,
            count: AtomicU64::new(0),
            sum_bits: AtomicU64::new(0f64.to_bits()),
        }
    }

    pub fn bounds(&self) -> &[f64] {
        &self.bounds
    }

    /// Observe a value
    pub fn observe(&self, value: f64, exemplar: Option<TraceId>) {
        if value.is_nan() {
            return;
        }
        let value = value.max(0.0);

        let first = self.bounds.partition_point(|&b| b < value);
        for bucket in &self.buckets[first..] {
            bucket.fetch_add(1, Ordering::Relaxed);
        }
        self.count.fetch_add(1, Ordering::Relaxed);
        self.add_sum(value);

        if let Some(trace_id) = exemplar.filter(TraceId::is_valid) {
            // Skip rather than wait when a concurrent writer holds the slot.
            if let Some(mut slot) = self.exemplars[first].try_lock() {
                *slot = Some(Exemplar {
                    trace_id,
                    value,
                    timestamp: Utc::now(),
                });
            }
        }
    }

    fn add_sum(&self, value: f64) {
        loop {
            let current = self.sum_bits.load(Ordering::Relaxed);
            let updated = (f64::from_bits(current) + value).to_bits();

            if self
                .sum_bits
                .compare_exchange_weak(current, updated, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                break;
            }
        }
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn sum(&self) -> f64 {
        f64::from_bits(self.sum_bits.load(Ordering::Relaxed))
    }

    pub fn snapshot(&self) -> HistogramSnapshot {
        HistogramSnapshot {
            bounds: self.bounds.to_vec(),
            cumulative: self
                .buckets
                .iter()
                .map(|b| b.load(Ordering::Relaxed))
                .collect(),
            count: self.count(),
            sum: self.sum(),
        }
    }

    /// `(upper bound, exemplar)` for every bucket holding one. The `+Inf`
    /// bucket reports `f64::INFINITY`.
    pub fn exemplars(&self) -> Vec<(f64, Exemplar)> {
        self.exemplars
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| {
                let le = self.bounds.get(i).copied().unwrap_or(f64::INFINITY);
                slot.lock().clone().map(|e| (le, e))
            })
            .collect()
    }
}

// =============================================================================
// Snapshot
// =============================================================================

/// Point-in-time copy of one or more merged histograms.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistogramSnapshot {
    pub bounds: Vec<f64>,
    /// Cumulative counts, one per bound plus `+Inf`.
    pub cumulative: Vec<u64>,
    pub count: u64,
    pub sum: f64,
}

impl HistogramSnapshot {
    pub fn empty(bounds: Vec<f64>) -> Self {
        let slots = bounds.len() + 1;
        Self {
            bounds,
            cumulative: vec![0; slots],
            count: 0,
            sum: 0.0,
        }
    }

    /// Add another snapshot with the same layout.
    pub fn merge(&mut self, other: &HistogramSnapshot) {
        debug_assert_eq!(self.bounds, other.bounds);
        for (mine, theirs) in self.cumulative.iter_mut().zip(&other.cumulative) {
            *mine += theirs;
        }
        self.count += other.count;
        self.sum += other.sum;
    }

    /// Counts accumulated since `earlier`. Counter resets saturate at zero.
    pub fn delta(&self, earlier: &HistogramSnapshot) -> HistogramSnapshot {
        HistogramSnapshot {
            bounds: self.bounds.clone(),
            cumulative: self
                .cumulative
                .iter()
                .zip(earlier.cumulative.iter().chain(std::iter::repeat(&0)))
                .map(|(now, then)| now.saturating_sub(*then))
                .collect(),
            count: self.count.saturating_sub(earlier.count),
            sum: (self.sum - earlier.sum).max(0.0),
        }
    }

    /// Observations `<= threshold`, read from the largest bound not above it.
    pub fn count_within(&self, threshold: f64) -> u64 {
        let idx = self.bounds.partition_point(|&b| b <= threshold);
        if idx == 0 {
            0
        } else {
            self.cumulative[idx - 1]
        }
    }

    /// Estimate a quantile by linear interpolation inside the bucket that
    /// contains the target rank. Returns `None` when empty.
    pub fn quantile(&self, q: f64) -> Option<f64> {
        if self.count == 0 || !(0.0..=1.0).contains(&q) {
            return None;
        }
        let rank = q * self.count as f64;

        let idx = self
            .cumulative
            .iter()
            .position(|&c| c as f64 >= rank)
            .unwrap_or(self.cumulative.len() - 1);

        // Observations past the last finite bound cannot be placed.
        if idx >= self.bounds.len() {
            return self.bounds.last().copied();
        }

        let upper = self.bounds[idx];
        let (lower, below) = if idx == 0 {
            (0.0, 0)
        } else {
            (self.bounds[idx - 1], self.cumulative[idx - 1])
        };
        let in_bucket = self.cumulative[idx] - below;
        if in_bucket == 0 {
            return Some(upper);
        }

        Some(lower + (upper - lower) * (rank - below as f64) / in_bucket as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn histogram(bounds: &[f64]) -> AtomicHistogram {
        AtomicHistogram::new(bounds.to_vec().into())
    }

    // =========================================================================
    // Observe Tests
    // =========================================================================

    #[test]
    fn test_observe_is_cumulative() {
        let h = histogram(&[0.1, 0.3, 1.0]);
        h.observe(0.05, None);
        h.observe(0.2, None);
        h.observe(5.0, None);

        let snap = h.snapshot();
        assert_eq!(snap.cumulative, vec![1, 2, 2, 3]);
        assert_eq!(snap.count, 3);
        assert!((snap.sum - 5.25).abs() < 1e-9);
    }

    #[test]
    fn test_value_on_boundary_counts_in_that_bucket() {
        let h = histogram(&[0.1, 0.3]);
        h.observe(0.1, None);
        assert_eq!(h.snapshot().cumulative, vec![1, 1, 1]);
    }

    #[test]
    fn test_nan_ignored_and_negative_clamped() {
        let h = histogram(&[0.1]);
        h.observe(f64::NAN, None);
        h.observe(-1.0, None);

        assert_eq!(h.count(), 1);
        assert_eq!(h.snapshot().cumulative, vec![1, 1]);
    }

    #[test]
    fn test_exemplar_lands_in_lowest_containing_bucket() {
        let h = histogram(&[0.1, 0.3, 1.0]);
        let trace = TraceId::new(0xabc);
        h.observe(0.2, Some(trace));

        let exemplars = h.exemplars();
        assert_eq!(exemplars.len(), 1);
        assert_eq!(exemplars[0].0, 0.3);
        assert_eq!(exemplars[0].1.trace_id, trace);
        assert_eq!(exemplars[0].1.value, 0.2);
    }

    #[test]
    fn test_exemplar_in_inf_bucket() {
        let h = histogram(&[0.1]);
        h.observe(3.0, Some(TraceId::new(7)));
        assert_eq!(h.exemplars()[0].0, f64::INFINITY);
    }

    #[test]
    fn test_concurrent_observations() {
        let h = Arc::new(histogram(&[0.5, 1.0]));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let h = Arc::clone(&h);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        h.observe(0.25, None);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(h.count(), 8000);
        assert!((h.sum() - 2000.0).abs() < 1e-6);
    }

    // =========================================================================
    // Snapshot Tests
    // =========================================================================

    #[test]
    fn test_delta_and_count_within() {
        let h = histogram(&[0.1, 0.3, 1.0]);
        h.observe(0.05, None);
        let before = h.snapshot();

        h.observe(0.05, None);
        h.observe(0.5, None);
        let delta = h.snapshot().delta(&before);

        assert_eq!(delta.count, 2);
        assert_eq!(delta.count_within(0.1), 1);
        assert_eq!(delta.count_within(0.2), 1);
        assert_eq!(delta.count_within(1.0), 2);
        assert_eq!(delta.count_within(0.01), 0);
    }

    #[test]
    fn test_merge() {
        let mut a = HistogramSnapshot::empty(vec![0.1]);
        let b = HistogramSnapshot {
            bounds: vec![0.1],
            cumulative: vec![2, 3],
            count: 3,
            sum: 1.0,
        };
        a.merge(&b);
        a.merge(&b);
        assert_eq!(a.cumulative, vec![4, 6]);
        assert_eq!(a.count, 6);
    }

    #[test]
    fn test_quantile_interpolation() {
        let snap = HistogramSnapshot {
            bounds: vec![0.1, 0.2],
            cumulative: vec![50, 100, 100],
            count: 100,
            sum: 10.0,
        };

        assert!((snap.quantile(0.5).unwrap() - 0.1).abs() < 1e-9);
        assert!((snap.quantile(0.25).unwrap() - 0.05).abs() < 1e-9);
        assert!((snap.quantile(0.75).unwrap() - 0.15).abs() < 1e-9);
        assert_eq!(HistogramSnapshot::empty(vec![0.1]).quantile(0.5), None);
    }

    #[test]
    fn test_quantile_overflow_reports_last_bound() {
        let snap = HistogramSnapshot {
            bounds: vec![0.1],
            cumulative: vec![0, 10],
            count: 10,
            sum: 50.0,
        };
        assert_eq!(snap.quantile(0.99), Some(0.1));
    }

    #[test]
    fn test_normalize_bounds() {
        assert_eq!(
            normalize_bounds(vec![1.0, 0.1, f64::INFINITY, 0.1, 0.3]),
            vec![0.1, 0.3, 1.0]
        );
    }
}
