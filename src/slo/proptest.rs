//! Property-Based Tests for SLO Evaluation
//!
//! # Test Properties
//!
//! 1. **Window Bounds**: good <= total, and a longer window never sees less
//!    traffic than a shorter one
//! 2. **Budget Identity**: consumed + remaining = 1, clamped values in [0, 1]
//! 3. **Sustain**: an always-true condition fires exactly once the sustain
//!    period has elapsed in Pending

#![cfg(test)]

use std::time::{Duration, Instant};

use proptest::prelude::*;

use super::alert::AlertTracker;
use super::budget::{BudgetState, ErrorBudget};
use super::window::{SloSnapshot, SnapshotRing};
use crate::domain::AlertState;
use crate::metrics::HistogramSnapshot;

const BOUNDS: &[f64] = &[0.1, 0.5];

// =============================================================================
// Property Strategies
// =============================================================================

/// Per-tick increments: (seconds since previous tick, fast, slow, errors).
fn ticks_strategy() -> impl Strategy<Value = Vec<(u64, u64, u64, u64)>> {
    prop::collection::vec((1u64..600, 0u64..50, 0u64..20, 0u64..10), 1..40)
}

fn build_ring(start: Instant, ticks: &[(u64, u64, u64, u64)]) -> SnapshotRing {
    let mut ring = SnapshotRing::new(Duration::from_secs(3600));
    let mut at = start;
    let (mut fast, mut slow, mut errors) = (0u64, 0u64, 0u64);
    ring.push(snapshot(at, fast, slow, errors));

    for &(secs, f, s, e) in ticks {
        at += Duration::from_secs(secs);
        fast += f;
        slow += s;
        errors += e;
        ring.push(snapshot(at, fast, slow, errors));
    }
    ring
}

fn snapshot(at: Instant, fast: u64, slow: u64, errors: u64) -> SloSnapshot {
    let mut histogram = HistogramSnapshot::empty(BOUNDS.to_vec());
    histogram.cumulative = vec![fast, fast + slow, fast + slow];
    histogram.count = fast + slow;
    SloSnapshot {
        at,
        histogram,
        errors,
    }
}

// =============================================================================
// Window Properties
// =============================================================================

proptest! {
    #[test]
    fn prop_window_delta_bounded(ticks in ticks_strategy()) {
        let ring = build_ring(Instant::now(), &ticks);
        let newest = ring.latest().unwrap().histogram.count;

        let mut previous_total = 0;
        for window in [60u64, 300, 3600] {
            let delta = ring.delta(Duration::from_secs(window)).unwrap();
            prop_assert!(delta.good(0.1) <= delta.total());
            prop_assert!(delta.total() <= newest);
            prop_assert!(delta.total() >= previous_total);
            previous_total = delta.total();
        }
    }

    #[test]
    fn prop_ring_stays_bounded(ticks in ticks_strategy()) {
        let ring = build_ring(Instant::now(), &ticks);
        // One baseline beyond retention plus the snapshots within it.
        let min_gap = ticks.iter().map(|t| t.0).min().unwrap_or(1);
        let bound = (3600 / min_gap) as usize + 2;
        prop_assert!(ring.len() <= bound);
    }
}

// =============================================================================
// Budget Properties
// =============================================================================

proptest! {
    #[test]
    fn prop_budget_identity(target in 0.5f64..0.999, ratio in 0.0f64..=1.0) {
        let budget = ErrorBudget::compute(target, Some(ratio)).unwrap();
        prop_assert!((budget.consumed + budget.remaining - 1.0).abs() < 1e-9);
        prop_assert!((0.0..=1.0).contains(&budget.clamped_remaining()));
        prop_assert!((0.0..=1.0).contains(&budget.clamped_consumed()));

        let expected = if budget.remaining < 0.2 {
            BudgetState::Critical
        } else if budget.remaining < 0.5 {
            BudgetState::Monitor
        } else {
            BudgetState::Healthy
        };
        prop_assert_eq!(BudgetState::of(Some(&budget)), expected);
    }

    #[test]
    fn prop_meeting_target_keeps_full_budget(target in 0.5f64..0.999, excess in 0.0f64..0.5) {
        let ratio = (target + excess).min(1.0);
        let budget = ErrorBudget::compute(target, Some(ratio)).unwrap();
        prop_assert!(budget.remaining >= 1.0 - 1e-9);
        prop_assert_eq!(budget.clamped_remaining(), 1.0);
    }
}

// =============================================================================
// Alert Properties
// =============================================================================

proptest! {
    #[test]
    fn prop_fires_exactly_after_sustain(sustain in 0u64..600, step in 1u64..90) {
        let t0 = Instant::now();
        let sustain = Duration::from_secs(sustain);
        let mut tracker = AlertTracker::new(t0);

        tracker.step(true, sustain, t0);
        prop_assert_eq!(tracker.state(), AlertState::Pending);

        let mut elapsed = 0;
        while tracker.state() == AlertState::Pending {
            elapsed += step;
            tracker.step(true, sustain, t0 + Duration::from_secs(elapsed));
        }
        prop_assert_eq!(tracker.state(), AlertState::Firing);
        prop_assert!(Duration::from_secs(elapsed) >= sustain);
        prop_assert!(sustain.is_zero() || Duration::from_secs(elapsed - step) < sustain);
    }
}
