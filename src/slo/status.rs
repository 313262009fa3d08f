//! Status report produced on every engine tick.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use super::budget::BudgetState;
use super::definition::SloWindow;
use crate::domain::events::{AlertState, Severity};
use crate::metrics::HistogramSnapshot;

/// Point-in-time compliance state for every SLO.
#[derive(Debug, Clone, Serialize)]
pub struct SloStatusReport {
    pub generated_at: DateTime<Utc>,
    pub slos: Vec<SloStatus>,
    /// Errors over all SLO-tracked requests in the shortest window.
    pub global_error_ratio: Option<f64>,
    /// Alerts currently pending or firing.
    pub alerts: Vec<ActiveAlert>,
}

impl SloStatusReport {
    pub fn slo(&self, name: &str) -> Option<&SloStatus> {
        self.slos.iter().find(|s| s.name == name)
    }

    pub fn alert(&self, rule_name: &str, slo_name: &str) -> Option<&ActiveAlert> {
        self.alerts
            .iter()
            .find(|a| a.rule_name == rule_name && a.slo_name == slo_name)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SloStatus {
    pub name: String,
    pub description: String,
    pub target: f64,
    pub latency_threshold_seconds: f64,
    pub operations: Vec<String>,
    pub windows: Vec<WindowStatus>,
    /// Budget consumed over the shortest window, floored at zero.
    pub burn_rate: Option<f64>,
    pub latency_percentiles: LatencyPercentiles,
}

impl SloStatus {
    pub fn window(&self, window: SloWindow) -> Option<&WindowStatus> {
        self.windows.iter().find(|w| w.window == window)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WindowStatus {
    pub window: SloWindow,
    pub ratio: Option<f64>,
    pub good: u64,
    pub total: u64,
    pub errors: u64,
    /// Clamped to `[0, 1]`.
    pub error_budget_remaining: Option<f64>,
    /// Unclamped; above 1 once the budget is overspent.
    pub error_budget_consumed: Option<f64>,
    pub budget_state: BudgetState,
}

/// Latency quantiles estimated from bucket counts.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LatencyPercentiles {
    pub p50: Option<f64>,
    pub p90: Option<f64>,
    pub p95: Option<f64>,
    pub p99: Option<f64>,
}

impl LatencyPercentiles {
    pub fn from_snapshot(snapshot: &HistogramSnapshot) -> Self {
        Self {
            p50: snapshot.quantile(0.50),
            p90: snapshot.quantile(0.90),
            p95: snapshot.quantile(0.95),
            p99: snapshot.quantile(0.99),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ActiveAlert {
    pub rule_name: String,
    pub slo_name: String,
    pub severity: Severity,
    pub state: AlertState,
    pub value: Option<f64>,
    pub since: DateTime<Utc>,
}

/// Shared handle to the latest report, read by the HTTP server.
#[derive(Debug, Clone, Default)]
pub struct StatusHandle(Arc<RwLock<Option<SloStatusReport>>>);

impl StatusHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn latest(&self) -> Option<SloStatusReport> {
        self.0.read().clone()
    }

    pub fn alerts(&self) -> Vec<ActiveAlert> {
        self.0
            .read()
            .as_ref()
            .map(|r| r.alerts.clone())
            .unwrap_or_default()
    }

    pub(crate) fn publish(&self, report: SloStatusReport) {
        *self.0.write() = Some(report);
    }
}
