//! Alert rules and the per-series alert state machine.
//!
//! ```text
//!            cond                 cond for >= sustain
//!   Normal ────────▶ Pending ─────────────────────────▶ Firing
//!     ▲                │ !cond                            │ !cond
//!     │◀───────────────┘                                  ▼
//!     │◀──────────────────────── !cond ────────────── Resolved
//!                                 cond ──▶ Pending
//! ```
//!
//! A window without data never satisfies a condition.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use super::definition::SloWindow;
use crate::config::duration::serde_compact;
use crate::domain::events::{AlertState, Severity};
use crate::error::{Error, Result};

/// Label value used by rules that span every SLO.
pub const GLOBAL_SLO_LABEL: &str = "global";

// =============================================================================
// Conditions
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AlertCondition {
    /// Compliance ratio over `window` below the SLO target
    ComplianceBelowTarget { window: SloWindow },

    /// Unclamped remaining error budget over `window` below `threshold`
    BudgetRemainingBelow { window: SloWindow, threshold: f64 },

    /// Errors over all SLO-tracked requests in `window` above `threshold`
    GlobalErrorRatioAbove { window: SloWindow, threshold: f64 },
}

impl AlertCondition {
    pub fn window(&self) -> SloWindow {
        match self {
            AlertCondition::ComplianceBelowTarget { window }
            | AlertCondition::BudgetRemainingBelow { window, .. }
            | AlertCondition::GlobalErrorRatioAbove { window, .. } => *window,
        }
    }

    pub fn is_global(&self) -> bool {
        matches!(self, AlertCondition::GlobalErrorRatioAbove { .. })
    }
}

/// Result of checking one condition for one label set.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    pub active: bool,
    pub value: Option<f64>,
    pub threshold: f64,
}

impl Observation {
    pub fn below(value: Option<f64>, threshold: f64) -> Self {
        Self {
            active: value.is_some_and(|v| v < threshold),
            value,
            threshold,
        }
    }

    pub fn above(value: Option<f64>, threshold: f64) -> Self {
        Self {
            active: value.is_some_and(|v| v > threshold),
            value,
            threshold,
        }
    }
}

// =============================================================================
// Rules
// =============================================================================

/// A named alert over one condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    pub name: String,
    pub severity: Severity,

    /// How long the condition must hold before firing
    #[serde(rename = "for", with = "serde_compact")]
    pub sustain: Duration,

    pub condition: AlertCondition,

    /// Templates with `{slo}`, `{window}`, `{value}`, `{threshold}` placeholders
    pub summary: String,
    pub description: String,
}

impl AlertRule {
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: &str| Error::InvalidAlertRule {
            rule: self.name.clone(),
            reason: reason.to_string(),
        };

        if self.name.trim().is_empty() {
            return Err(invalid("name must not be empty"));
        }
        match self.condition {
            AlertCondition::ComplianceBelowTarget { .. } => {}
            AlertCondition::BudgetRemainingBelow { threshold, .. }
            | AlertCondition::GlobalErrorRatioAbove { threshold, .. } => {
                if !threshold.is_finite() {
                    return Err(invalid("threshold must be a finite number"));
                }
            }
        }
        Ok(())
    }

    pub fn render_summary(&self, slo: &str, observation: &Observation) -> String {
        render(&self.summary, slo, self.condition.window(), observation)
    }

    pub fn render_description(&self, slo: &str, observation: &Observation) -> String {
        render(&self.description, slo, self.condition.window(), observation)
    }
}

fn render(template: &str, slo: &str, window: SloWindow, observation: &Observation) -> String {
    let value = observation
        .value
        .map(|v| format!("{:.4}", v))
        .unwrap_or_else(|| "n/a".to_string());
    template
        .replace("{slo}", slo)
        .replace("{window}", &window.to_string())
        .replace("{value}", &value)
        .replace("{threshold}", &format!("{}", observation.threshold))
}

/// Reject invalid rules and duplicate names.
pub fn validate_rules(rules: &[AlertRule]) -> Result<()> {
    let mut seen = HashSet::new();
    for rule in rules {
        rule.validate()?;
        if !seen.insert(rule.name.as_str()) {
            return Err(Error::InvalidAlertRule {
                rule: rule.name.clone(),
                reason: "duplicate rule name".to_string(),
            });
        }
    }
    Ok(())
}

/// Built-in rule set.
pub fn default_rules() -> Vec<AlertRule> {
    vec![
        AlertRule {
            name: "SLOBreached".to_string(),
            severity: Severity::Warning,
            sustain: Duration::from_secs(5 * 60),
            condition: AlertCondition::ComplianceBelowTarget {
                window: SloWindow::FIVE_MINUTES,
            },
            summary: "SLO {slo} breached".to_string(),
            description: "Compliance for {slo} over {window} is {value}, below target {threshold}"
                .to_string(),
        },
        AlertRule {
            name: "ErrorBudgetBurningFast".to_string(),
            severity: Severity::Warning,
            sustain: Duration::from_secs(2 * 60),
            condition: AlertCondition::BudgetRemainingBelow {
                window: SloWindow::ONE_HOUR,
                threshold: 0.5,
            },
            summary: "Error budget for {slo} is burning fast".to_string(),
            description: "Remaining error budget for {slo} over {window} is {value}, below {threshold}"
                .to_string(),
        },
        AlertRule {
            name: "ErrorBudgetCritical".to_string(),
            severity: Severity::Critical,
            sustain: Duration::from_secs(15 * 60),
            condition: AlertCondition::BudgetRemainingBelow {
                window: SloWindow::ONE_DAY,
                threshold: 0.2,
            },
            summary: "Error budget for {slo} is critically low".to_string(),
            description: "Remaining error budget for {slo} over {window} is {value}, below {threshold}"
                .to_string(),
        },
        AlertRule {
            name: "GlobalErrorBudgetBreach".to_string(),
            severity: Severity::Critical,
            sustain: Duration::from_secs(2 * 60),
            condition: AlertCondition::GlobalErrorRatioAbove {
                window: SloWindow::FIVE_MINUTES,
                threshold: 0.01,
            },
            summary: "Global error ratio above threshold".to_string(),
            description:
                "Error ratio across all SLO-tracked operations over {window} is {value}, above {threshold}"
                    .to_string(),
        },
    ]
}

// =============================================================================
// State Machine
// =============================================================================

/// Alert state for one (rule, label set) pair.
#[derive(Debug, Clone)]
pub struct AlertTracker {
    state: AlertState,
    since: Instant,
}

impl AlertTracker {
    pub fn new(now: Instant) -> Self {
        Self {
            state: AlertState::Normal,
            since: now,
        }
    }

    pub fn state(&self) -> AlertState {
        self.state
    }

    /// When the current state was entered.
    pub fn since(&self) -> Instant {
        self.since
    }

    /// Advance by at most one transition. Returns the previous state when
    /// the state changed.
    pub fn step(&mut self, active: bool, sustain: Duration, now: Instant) -> Option<AlertState> {
        let next = match (self.state, active) {
            (AlertState::Normal, true) => AlertState::Pending,
            (AlertState::Pending, false) => AlertState::Normal,
            (AlertState::Pending, true) if now.saturating_duration_since(self.since) >= sustain => {
                AlertState::Firing
            }
            (AlertState::Firing, false) => AlertState::Resolved,
            (AlertState::Resolved, true) => AlertState::Pending,
            (AlertState::Resolved, false) => AlertState::Normal,
            (state, _) => state,
        };

        if next == self.state {
            return None;
        }
        let previous = self.state;
        self.state = next;
        self.since = now;
        Some(previous)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    const SUSTAIN: Duration = Duration::from_secs(120);

    // =========================================================================
    // State Machine Tests
    // =========================================================================

    #[test]
    fn test_pending_then_firing_after_sustain() {
        let t0 = Instant::now();
        let mut tracker = AlertTracker::new(t0);

        assert_eq!(tracker.step(true, SUSTAIN, t0), Some(AlertState::Normal));
        assert_eq!(tracker.state(), AlertState::Pending);

        assert_eq!(tracker.step(true, SUSTAIN, t0 + Duration::from_secs(60)), None);
        assert_eq!(tracker.state(), AlertState::Pending);

        assert_eq!(
            tracker.step(true, SUSTAIN, t0 + Duration::from_secs(120)),
            Some(AlertState::Pending)
        );
        assert_eq!(tracker.state(), AlertState::Firing);
    }

    #[test]
    fn test_pending_clears_to_normal() {
        let t0 = Instant::now();
        let mut tracker = AlertTracker::new(t0);
        tracker.step(true, SUSTAIN, t0);
        assert_eq!(
            tracker.step(false, SUSTAIN, t0 + Duration::from_secs(30)),
            Some(AlertState::Pending)
        );
        assert_eq!(tracker.state(), AlertState::Normal);
    }

    #[test]
    fn test_firing_resolves_then_normal() {
        let t0 = Instant::now();
        let mut tracker = AlertTracker::new(t0);
        tracker.step(true, Duration::ZERO, t0);
        tracker.step(true, Duration::ZERO, t0 + Duration::from_secs(1));
        assert_eq!(tracker.state(), AlertState::Firing);

        tracker.step(false, Duration::ZERO, t0 + Duration::from_secs(2));
        assert_eq!(tracker.state(), AlertState::Resolved);
        tracker.step(false, Duration::ZERO, t0 + Duration::from_secs(3));
        assert_eq!(tracker.state(), AlertState::Normal);
    }

    #[test]
    fn test_resolved_reenters_pending() {
        let t0 = Instant::now();
        let mut tracker = AlertTracker::new(t0);
        tracker.step(true, Duration::ZERO, t0);
        tracker.step(true, Duration::ZERO, t0);
        tracker.step(false, Duration::ZERO, t0);
        assert_eq!(tracker.state(), AlertState::Resolved);

        assert_eq!(tracker.step(true, SUSTAIN, t0), Some(AlertState::Resolved));
        assert_eq!(tracker.state(), AlertState::Pending);
    }

    #[test]
    fn test_no_data_is_inactive() {
        assert!(!Observation::below(None, 0.95).active);
        assert!(!Observation::above(None, 0.01).active);
        assert!(Observation::below(Some(0.9), 0.95).active);
        assert!(Observation::above(Some(0.02), 0.01).active);
        assert!(!Observation::above(Some(0.01), 0.01).active);
    }

    // =========================================================================
    // Rule Tests
    // =========================================================================

    #[test]
    fn test_default_rules_valid() {
        let rules = default_rules();
        validate_rules(&rules).unwrap();
        assert_eq!(rules.len(), 4);
        assert!(rules[3].condition.is_global());
        assert_eq!(rules[2].condition.window(), SloWindow::ONE_DAY);
        assert_eq!(rules[2].severity, Severity::Critical);
    }

    #[test]
    fn test_duplicate_rule_rejected() {
        let mut rules = default_rules();
        rules.push(rules[0].clone());
        assert_matches!(validate_rules(&rules), Err(Error::InvalidAlertRule { .. }));
    }

    #[test]
    fn test_render_templates() {
        let rule = &default_rules()[0];
        let obs = Observation::below(Some(100.0 / 110.0), 0.95);
        assert_eq!(rule.render_summary("api_health", &obs), "SLO api_health breached");
        assert_eq!(
            rule.render_description("api_health", &obs),
            "Compliance for api_health over 5m is 0.9091, below target 0.95"
        );

        let empty = Observation::below(None, 0.95);
        assert!(rule.render_description("api_health", &empty).contains("n/a"));
    }

    #[test]
    fn test_rule_yaml() {
        let yaml = r#"
name: CheckoutSlow
severity: critical
for: 10m
condition:
  type: budget_remaining_below
  window: 1h
  threshold: 0.25
summary: "{slo} slow"
description: "{value}"
"#;
        let rule: AlertRule = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(rule.sustain, Duration::from_secs(600));
        assert_eq!(
            rule.condition,
            AlertCondition::BudgetRemainingBelow {
                window: SloWindow::ONE_HOUR,
                threshold: 0.25
            }
        );
    }
}
