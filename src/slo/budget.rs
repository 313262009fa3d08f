//! Compliance ratios and error budgets.

use serde::Serialize;

use super::definition::{SloDefinition, SloWindow};
use super::window::WindowDelta;

/// Good fraction over one window. `ratio` is `None` when no requests were
/// observed in the window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComplianceRecord {
    pub slo_name: String,
    pub window: SloWindow,
    pub ratio: Option<f64>,
    pub good: u64,
    pub total: u64,
}

impl ComplianceRecord {
    pub fn from_delta(slo: &SloDefinition, window: SloWindow, delta: Option<&WindowDelta>) -> Self {
        let (good, total) = delta
            .map(|d| (d.good(slo.latency_threshold), d.total()))
            .unwrap_or((0, 0));
        let ratio = if total == 0 {
            None
        } else {
            Some(good as f64 / total as f64)
        };
        Self {
            slo_name: slo.name.clone(),
            window,
            ratio,
            good,
            total,
        }
    }

    pub fn has_data(&self) -> bool {
        self.ratio.is_some()
    }

    pub fn below_target(&self, target: f64) -> bool {
        self.ratio.is_some_and(|r| r < target)
    }
}

/// Error budget consumption over one window.
///
/// Values are unclamped: `consumed` exceeds 1 and `remaining` goes negative
/// once the budget is overspent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ErrorBudget {
    pub consumed: f64,
    pub remaining: f64,
}

impl ErrorBudget {
    /// `None` when the window has no data.
    pub fn compute(target: f64, ratio: Option<f64>) -> Option<Self> {
        let ratio = ratio?;
        let budget = 1.0 - target;
        if budget <= 0.0 {
            return None;
        }
        let consumed = (target - ratio) / budget;
        Some(Self {
            consumed,
            remaining: 1.0 - consumed,
        })
    }

    pub fn clamped_remaining(&self) -> f64 {
        self.remaining.clamp(0.0, 1.0)
    }

    pub fn clamped_consumed(&self) -> f64 {
        self.consumed.clamp(0.0, 1.0)
    }

    pub fn state(&self) -> BudgetState {
        if self.remaining < 0.2 {
            BudgetState::Critical
        } else if self.remaining < 0.5 {
            BudgetState::Monitor
        } else {
            BudgetState::Healthy
        }
    }
}

/// Coarse budget health for status display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetState {
    Healthy,
    Monitor,
    Critical,
    NoData,
}

impl BudgetState {
    pub fn of(budget: Option<&ErrorBudget>) -> Self {
        budget.map(ErrorBudget::state).unwrap_or(BudgetState::NoData)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::HistogramSnapshot;
    use std::time::Duration;

    fn delta(good: u64, slow: u64) -> WindowDelta {
        let mut histogram = HistogramSnapshot::empty(vec![0.1, 0.5]);
        histogram.cumulative = vec![good, good + slow, good + slow];
        histogram.count = good + slow;
        WindowDelta {
            histogram,
            errors: 0,
            covered: Duration::from_secs(300),
        }
    }

    fn api_health() -> SloDefinition {
        SloDefinition::new("api_health", "", &["health_check"], 0.1, 0.95)
    }

    #[test]
    fn test_ratio_of_counts() {
        let record =
            ComplianceRecord::from_delta(&api_health(), SloWindow::FIVE_MINUTES, Some(&delta(100, 10)));
        assert_eq!(record.good, 100);
        assert_eq!(record.total, 110);
        let ratio = record.ratio.unwrap();
        assert!((ratio - 100.0 / 110.0).abs() < 1e-12);
        assert!(record.below_target(0.95));
    }

    #[test]
    fn test_no_data() {
        let slo = api_health();
        let empty = ComplianceRecord::from_delta(&slo, SloWindow::FIVE_MINUTES, Some(&delta(0, 0)));
        assert_eq!(empty.ratio, None);
        assert!(!empty.below_target(0.95));

        let missing = ComplianceRecord::from_delta(&slo, SloWindow::FIVE_MINUTES, None);
        assert!(!missing.has_data());
        assert!(ErrorBudget::compute(0.95, missing.ratio).is_none());
    }

    #[test]
    fn test_budget_unclamped() {
        let budget = ErrorBudget::compute(0.95, Some(100.0 / 110.0)).unwrap();
        // consumed = (0.95 - 0.9091) / 0.05 ≈ 0.818
        assert!((budget.consumed - 0.8182).abs() < 1e-3);
        assert!((budget.remaining - 0.1818).abs() < 1e-3);
        assert_eq!(budget.state(), BudgetState::Critical);

        let overspent = ErrorBudget::compute(0.95, Some(0.5)).unwrap();
        assert!(overspent.remaining < 0.0);
        assert_eq!(overspent.clamped_remaining(), 0.0);
        assert_eq!(overspent.clamped_consumed(), 1.0);
    }

    #[test]
    fn test_perfect_ratio_has_negative_consumption() {
        let budget = ErrorBudget::compute(0.95, Some(1.0)).unwrap();
        assert!(budget.consumed < 0.0);
        assert!(budget.remaining > 1.0);
        assert_eq!(budget.clamped_remaining(), 1.0);
        assert_eq!(budget.state(), BudgetState::Healthy);
    }

    #[test]
    fn test_budget_state_thresholds() {
        let monitor = ErrorBudget::compute(0.9, Some(0.84)).unwrap();
        assert_eq!(monitor.state(), BudgetState::Monitor);
        assert_eq!(BudgetState::of(None), BudgetState::NoData);
    }
}
