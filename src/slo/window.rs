//! Snapshot history for ratio-of-rates window evaluation.
//!
//! Each tick appends a cumulative snapshot. The change over a window is the
//! difference between the newest snapshot and the newest one taken at or
//! before `now - window`. When history is shorter than the window the oldest
//! retained snapshot is the baseline.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::metrics::HistogramSnapshot;

/// Cumulative state of one SLO at one instant.
#[derive(Debug, Clone)]
pub struct SloSnapshot {
    pub at: Instant,
    pub histogram: HistogramSnapshot,
    pub errors: u64,
}

/// Change between two snapshots.
#[derive(Debug, Clone)]
pub struct WindowDelta {
    pub histogram: HistogramSnapshot,
    pub errors: u64,
    /// Actual span covered, which may be shorter than the window.
    pub covered: Duration,
}

impl WindowDelta {
    pub fn total(&self) -> u64 {
        self.histogram.count
    }

    pub fn good(&self, threshold: f64) -> u64 {
        self.histogram.count_within(threshold)
    }
}

/// Bounded ring of snapshots.
#[derive(Debug)]
pub struct SnapshotRing {
    retention: Duration,
    snapshots: VecDeque<SloSnapshot>,
}

impl SnapshotRing {
    /// `retention` is the longest window evaluated against this ring.
    pub fn new(retention: Duration) -> Self {
        Self {
            retention,
            snapshots: VecDeque::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn latest(&self) -> Option<&SloSnapshot> {
        self.snapshots.back()
    }

    /// Append a snapshot and drop history older than needed.
    ///
    /// Snapshots taken earlier than the newest one are ignored.
    pub fn push(&mut self, snapshot: SloSnapshot) {
        if let Some(last) = self.snapshots.back() {
            if snapshot.at < last.at {
                return;
            }
        }
        self.snapshots.push_back(snapshot);
        self.prune();
    }

    /// Keep exactly one snapshot at or before `newest - retention` as the
    /// baseline for the longest window.
    fn prune(&mut self) {
        let Some(newest) = self.snapshots.back().map(|s| s.at) else {
            return;
        };
        let Some(cutoff) = newest.checked_sub(self.retention) else {
            return;
        };
        while self.snapshots.len() >= 2 && self.snapshots[1].at <= cutoff {
            self.snapshots.pop_front();
        }
    }

    /// Baseline for a window ending at the newest snapshot.
    fn baseline(&self, window: Duration) -> Option<&SloSnapshot> {
        let newest = self.snapshots.back()?;
        let start = match newest.at.checked_sub(window) {
            Some(start) => start,
            None => return self.snapshots.front(),
        };
        self.snapshots
            .iter()
            .rev()
            .find(|s| s.at <= start)
            .or_else(|| self.snapshots.front())
    }

    /// Change over `window`, or `None` with fewer than two snapshots.
    pub fn delta(&self, window: Duration) -> Option<WindowDelta> {
        if self.snapshots.len() < 2 {
            return None;
        }
        let newest = self.snapshots.back()?;
        let base = self.baseline(window)?;
        Some(WindowDelta {
            histogram: newest.histogram.delta(&base.histogram),
            errors: newest.errors.saturating_sub(base.errors),
            covered: newest.at.duration_since(base.at),
        })
    }
}
