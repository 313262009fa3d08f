//! SLO Aggregation Engine
//!
//! Runs on its own task at a fixed cadence. Each tick:
//!
//! 1. Snapshot the cumulative SLO histogram and error counter per SLO
//! 2. Compute compliance and error budget per window from snapshot deltas
//! 3. Update the compliance, budget and burn-rate gauges
//! 4. Step every alert rule and publish the resulting transitions
//! 5. Replace the shared status report
//!
//! The engine reads only atomics; request handling never waits on it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::alert::{
    default_rules, validate_rules, AlertCondition, AlertRule, AlertTracker, Observation,
    GLOBAL_SLO_LABEL,
};
use super::budget::{BudgetState, ComplianceRecord, ErrorBudget};
use super::definition::{validate_all, SloDefinition, SloWindow};
use super::status::{
    ActiveAlert, LatencyPercentiles, SloStatus, SloStatusReport, StatusHandle, WindowStatus,
};
use super::window::{SloSnapshot, SnapshotRing, WindowDelta};
use crate::domain::events::{AlertEvent, AlertState};
use crate::domain::ports::AlertPublisher;
use crate::error::{Error, Result};
use crate::metrics::{names, MetricsRecorder};

// =============================================================================
// Configuration
// =============================================================================

/// Default base for alert reference links
pub const DEFAULT_RUNBOOK_BASE_URL: &str = "https://runbooks.tracewarden.dev/slo";

/// Engine settings
#[derive(Debug, Clone)]
pub struct SloEngineConfig {
    /// Time between evaluations
    pub evaluation_interval: Duration,

    /// Alert rules applied to every SLO (or once, for global rules)
    pub rules: Vec<AlertRule>,

    /// Alert events link to `{runbook_base_url}#{rule name}`
    pub runbook_base_url: String,
}

impl Default for SloEngineConfig {
    fn default() -> Self {
        Self {
            evaluation_interval: Duration::from_secs(30),
            rules: default_rules(),
            runbook_base_url: DEFAULT_RUNBOOK_BASE_URL.to_string(),
        }
    }
}

/// Output of one evaluation.
#[derive(Debug, Clone)]
pub struct SloEvaluation {
    pub report: SloStatusReport,
    pub events: Vec<AlertEvent>,
}

// =============================================================================
// Engine
// =============================================================================

#[derive(Debug)]
struct TrackedSlo {
    definition: SloDefinition,
    ring: SnapshotRing,
}

#[derive(Debug)]
struct AlertSeries {
    tracker: AlertTracker,
    value: Option<f64>,
    since: DateTime<Utc>,
}

/// Multi-window SLO evaluator.
pub struct SloEngine {
    slos: Vec<TrackedSlo>,
    global: SnapshotRing,
    config: SloEngineConfig,
    recorder: Arc<MetricsRecorder>,
    publishers: Vec<Arc<dyn AlertPublisher>>,
    alerts: HashMap<(String, String), AlertSeries>,
    status: StatusHandle,
}

impl SloEngine {
    /// Validate the configuration, merge every latency threshold into the
    /// SLO histogram layout and take the baseline snapshot.
    pub fn new(
        mut slos: Vec<SloDefinition>,
        config: SloEngineConfig,
        recorder: Arc<MetricsRecorder>,
        publishers: Vec<Arc<dyn AlertPublisher>>,
    ) -> Result<Self> {
        if slos.is_empty() {
            return Err(Error::Config("at least one SLO must be configured".to_string()));
        }
        validate_all(&mut slos)?;
        validate_rules(&config.rules)?;

        recorder.extend_buckets(
            names::SLO_REQUEST_LATENCY_SECONDS,
            slos.iter().map(|s| s.latency_threshold),
        );

        let rule_windows = config.rules.iter().map(|r| r.condition.window());
        let retention = slos
            .iter()
            .flat_map(|s| s.windows.iter().copied())
            .chain(rule_windows)
            .max()
            .unwrap_or(SloWindow::ONE_DAY)
            .duration();

        let now = Instant::now();
        let mut engine = Self {
            slos: slos
                .into_iter()
                .map(|definition| TrackedSlo {
                    definition,
                    ring: SnapshotRing::new(retention),
                })
                .collect(),
            global: SnapshotRing::new(retention),
            config,
            recorder,
            publishers,
            alerts: HashMap::new(),
            status: StatusHandle::new(),
        };
        engine.capture(now);

        info!(
            slos = engine.slos.len(),
            rules = engine.config.rules.len(),
            retention = ?retention,
            "SLO engine initialized"
        );
        Ok(engine)
    }

    pub fn status_handle(&self) -> StatusHandle {
        self.status.clone()
    }

    pub fn definitions(&self) -> impl Iterator<Item = &SloDefinition> {
        self.slos.iter().map(|s| &s.definition)
    }

    pub fn definition(&self, name: &str) -> Result<&SloDefinition> {
        self.definitions()
            .find(|d| d.name == name)
            .ok_or_else(|| Error::SloNotFound(name.to_string()))
    }

    /// Current state of one alert series. `slo` is `global` for global rules.
    pub fn alert_state(&self, rule: &str, slo: &str) -> AlertState {
        self.alerts
            .get(&(rule.to_string(), slo.to_string()))
            .map(|a| a.tracker.state())
            .unwrap_or_default()
    }

    fn capture(&mut self, now: Instant) {
        for slo in &mut self.slos {
            let filter = [("slo", slo.definition.name.as_str())];
            slo.ring.push(SloSnapshot {
                at: now,
                histogram: self
                    .recorder
                    .histogram_snapshot(names::SLO_REQUEST_LATENCY_SECONDS, &filter),
                errors: self.recorder.counter_total(names::SLO_ERRORS_TOTAL, &filter),
            });
        }
        self.global.push(SloSnapshot {
            at: now,
            histogram: self
                .recorder
                .histogram_snapshot(names::SLO_REQUEST_LATENCY_SECONDS, &[]),
            errors: self.recorder.counter_total(names::SLO_ERRORS_TOTAL, &[]),
        });
    }

    /// Take a snapshot at `now`, recompute every window and step every
    /// alert rule. Does not deliver events.
    pub fn evaluate(&mut self, now: Instant) -> SloEvaluation {
        self.capture(now);

        let slos: Vec<SloStatus> = self.slos.iter().map(|s| self.slo_status(s)).collect();
        let shortest = self
            .slos
            .iter()
            .filter_map(|s| s.definition.shortest_window())
            .min()
            .unwrap_or(SloWindow::FIVE_MINUTES);
        let global_error_ratio = error_ratio(self.global.delta(shortest.duration()).as_ref());

        let events = self.step_alerts(now);

        let report = SloStatusReport {
            generated_at: Utc::now(),
            slos,
            global_error_ratio,
            alerts: self.active_alerts(),
        };
        self.status.publish(report.clone());

        SloEvaluation { report, events }
    }

    /// Evaluate and deliver the resulting events to every publisher.
    #[instrument(skip(self, now))]
    pub async fn evaluate_at(&mut self, now: Instant) -> SloStatusReport {
        let evaluation = self.evaluate(now);
        self.publish(&evaluation.events).await;
        evaluation.report
    }

    pub async fn tick(&mut self) -> SloStatusReport {
        self.evaluate_at(Instant::now()).await
    }

    /// Evaluate on the configured interval until `shutdown` is cancelled.
    pub async fn run(mut self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.evaluation_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;

        info!(interval = ?self.config.evaluation_interval, "SLO engine started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    self.tick().await;
                }
            }
        }

        info!("SLO engine stopped");
    }

    // =========================================================================
    // Compliance
    // =========================================================================

    fn slo_status(&self, slo: &TrackedSlo) -> SloStatus {
        let def = &slo.definition;
        let mut windows = Vec::with_capacity(def.windows.len());

        for &window in &def.windows {
            let delta = slo.ring.delta(window.duration());
            let record = ComplianceRecord::from_delta(def, window, delta.as_ref());
            let budget = ErrorBudget::compute(def.target, record.ratio);
            self.record_window_gauges(def, window, &record, budget.as_ref());

            windows.push(WindowStatus {
                window,
                ratio: record.ratio,
                good: record.good,
                total: record.total,
                errors: delta.as_ref().map(|d| d.errors).unwrap_or(0),
                error_budget_remaining: budget.map(|b| b.clamped_remaining()),
                error_budget_consumed: budget.map(|b| b.consumed),
                budget_state: BudgetState::of(budget.as_ref()),
            });
        }

        let shortest = def.shortest_window();
        let burn_rate = windows
            .first()
            .and_then(|w| w.error_budget_consumed)
            .map(|c| c.max(0.0));
        self.recorder.set_gauge(
            names::SLO_BURN_RATE,
            &[("slo", def.name.as_str())],
            burn_rate.unwrap_or(f64::NAN),
        );

        if let Some(first) = windows.first() {
            log_budget(&def.name, first);
        }

        let latency_percentiles = shortest
            .and_then(|w| slo.ring.delta(w.duration()))
            .map(|d| LatencyPercentiles::from_snapshot(&d.histogram))
            .unwrap_or_default();

        SloStatus {
            name: def.name.clone(),
            description: def.description.clone(),
            target: def.target,
            latency_threshold_seconds: def.latency_threshold,
            operations: def.operations.clone(),
            windows,
            burn_rate,
            latency_percentiles,
        }
    }

    fn record_window_gauges(
        &self,
        def: &SloDefinition,
        window: SloWindow,
        record: &ComplianceRecord,
        budget: Option<&ErrorBudget>,
    ) {
        let window = window.to_string();
        let labels = [("slo", def.name.as_str()), ("window", window.as_str())];
        self.recorder.set_gauge(
            names::SLO_COMPLIANCE_RATIO,
            &labels,
            record.ratio.unwrap_or(f64::NAN),
        );
        self.recorder.set_gauge(
            names::SLO_ERROR_BUDGET_REMAINING,
            &labels,
            budget.map(|b| b.clamped_remaining()).unwrap_or(f64::NAN),
        );
    }

    // =========================================================================
    // Alerting
    // =========================================================================

    fn step_alerts(&mut self, now: Instant) -> Vec<AlertEvent> {
        let mut observations = Vec::new();
        for rule in &self.config.rules {
            if rule.condition.is_global() {
                let obs = self.observe_global(&rule.condition);
                observations.push((rule.clone(), GLOBAL_SLO_LABEL.to_string(), obs));
            } else {
                for slo in &self.slos {
                    let obs = observe_slo(&rule.condition, slo);
                    observations.push((rule.clone(), slo.definition.name.clone(), obs));
                }
            }
        }

        let mut events = Vec::new();
        for (rule, slo_name, obs) in observations {
            if let Some(event) = self.step_series(&rule, slo_name, obs, now) {
                events.push(event);
            }
        }
        events
    }

    fn observe_global(&self, condition: &AlertCondition) -> Observation {
        match *condition {
            AlertCondition::GlobalErrorRatioAbove { window, threshold } => Observation::above(
                error_ratio(self.global.delta(window.duration()).as_ref()),
                threshold,
            ),
            _ => Observation::below(None, 0.0),
        }
    }

    fn step_series(
        &mut self,
        rule: &AlertRule,
        slo_name: String,
        obs: Observation,
        now: Instant,
    ) -> Option<AlertEvent> {
        let series = self
            .alerts
            .entry((rule.name.clone(), slo_name.clone()))
            .or_insert_with(|| AlertSeries {
                tracker: AlertTracker::new(now),
                value: None,
                since: Utc::now(),
            });
        series.value = obs.value;

        let previous = series.tracker.step(obs.active, rule.sustain, now)?;
        let state = series.tracker.state();
        series.since = Utc::now();

        self.recorder.increment_counter(
            names::SLO_ALERT_TRANSITIONS_TOTAL,
            &[("rule", rule.name.as_str()), ("state", state.as_str())],
        );

        let event = AlertEvent {
            rule_name: rule.name.clone(),
            severity: rule.severity,
            state,
            previous_state: previous,
            summary: rule.render_summary(&slo_name, &obs),
            description: rule.render_description(&slo_name, &obs),
            window: rule.condition.window().to_string(),
            slo_name,
            value: obs.value,
            threshold: obs.threshold,
            reference_link: format!(
                "{}#{}",
                self.config.runbook_base_url.trim_end_matches('/'),
                rule.name
            ),
            timestamp: Utc::now(),
        };

        match state {
            AlertState::Firing => warn!(
                rule = %event.rule_name,
                slo = %event.slo_name,
                severity = %event.severity,
                value = ?event.value,
                "Alert firing"
            ),
            _ => info!(
                rule = %event.rule_name,
                slo = %event.slo_name,
                from = %previous,
                to = %state,
                "Alert state changed"
            ),
        }

        Some(event)
    }

    fn active_alerts(&self) -> Vec<ActiveAlert> {
        let mut active: Vec<ActiveAlert> = self
            .alerts
            .iter()
            .filter(|(_, s)| {
                matches!(s.tracker.state(), AlertState::Pending | AlertState::Firing)
            })
            .filter_map(|((rule, slo), s)| {
                let severity = self.config.rules.iter().find(|r| &r.name == rule)?.severity;
                Some(ActiveAlert {
                    rule_name: rule.clone(),
                    slo_name: slo.clone(),
                    severity,
                    state: s.tracker.state(),
                    value: s.value,
                    since: s.since,
                })
            })
            .collect();
        active.sort_by(|a, b| (&a.rule_name, &a.slo_name).cmp(&(&b.rule_name, &b.slo_name)));
        active
    }

    async fn publish(&self, events: &[AlertEvent]) {
        if events.is_empty() {
            return;
        }
        // Publishers run concurrently; each sees events in order.
        let recorder = &self.recorder;
        let deliveries = self.publishers.iter().map(|publisher| async move {
            for event in events {
                if let Err(e) = publisher.publish(event.clone()).await {
                    recorder.increment_counter(
                        names::ALERT_DELIVERY_FAILURES_TOTAL,
                        &[("publisher", publisher.name())],
                    );
                    warn!(
                        publisher = %publisher.name(),
                        rule = %event.rule_name,
                        error = %e,
                        "Alert delivery failed"
                    );
                }
            }
        });
        join_all(deliveries).await;
        debug!(count = events.len(), "Published alert events");
    }
}

fn observe_slo(condition: &AlertCondition, slo: &TrackedSlo) -> Observation {
    let def = &slo.definition;
    match *condition {
        AlertCondition::ComplianceBelowTarget { window } => {
            let delta = slo.ring.delta(window.duration());
            let record = ComplianceRecord::from_delta(def, window, delta.as_ref());
            Observation::below(record.ratio, def.target)
        }
        AlertCondition::BudgetRemainingBelow { window, threshold } => {
            let delta = slo.ring.delta(window.duration());
            let record = ComplianceRecord::from_delta(def, window, delta.as_ref());
            let remaining = ErrorBudget::compute(def.target, record.ratio).map(|b| b.remaining);
            Observation::below(remaining, threshold)
        }
        AlertCondition::GlobalErrorRatioAbove { threshold, .. } => {
            Observation::above(None, threshold)
        }
    }
}

fn error_ratio(delta: Option<&WindowDelta>) -> Option<f64> {
    let delta = delta?;
    let total = delta.total();
    if total == 0 {
        return None;
    }
    Some((delta.errors as f64 / total as f64).min(1.0))
}

fn log_budget(slo: &str, window: &WindowStatus) {
    match window.budget_state {
        BudgetState::Critical => warn!(
            slo = %slo,
            window = %window.window,
            remaining = ?window.error_budget_remaining,
            "Error budget critically low"
        ),
        BudgetState::Monitor => info!(
            slo = %slo,
            window = %window.window,
            remaining = ?window.error_budget_remaining,
            "Error budget below half"
        ),
        _ => {}
    }
}

impl std::fmt::Debug for SloEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SloEngine")
            .field("slos", &self.slos.len())
            .field("rules", &self.config.rules.len())
            .field("publishers", &self.publishers.len())
            .finish()
    }
}
