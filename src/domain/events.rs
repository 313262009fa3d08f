//! Domain Events
//!
//! Alert transitions produced by the SLO engine. Events are immutable
//! records handed to every configured [`AlertPublisher`](super::ports::AlertPublisher).
//!
//! # Example
//!
//! ```ignore
//! let event = AlertEvent::transition(&rule, "api_health", AlertState::Firing, Some(0.42), now);
//! publisher.publish(event).await?;
//! ```

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Alert severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Alert lifecycle state for one (rule, label set) pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertState {
    #[default]
    Normal,
    Pending,
    Firing,
    Resolved,
}

impl AlertState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertState::Normal => "normal",
            AlertState::Pending => "pending",
            AlertState::Firing => "firing",
            AlertState::Resolved => "resolved",
        }
    }
}

impl fmt::Display for AlertState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One alert state transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    pub rule_name: String,
    pub severity: Severity,
    /// State entered by this transition.
    pub state: AlertState,
    pub previous_state: AlertState,
    pub summary: String,
    /// Templated description including the current value.
    pub description: String,
    /// Window the condition is evaluated over, e.g. `5m`.
    pub window: String,
    /// SLO name, or `global` for cross-SLO rules.
    pub slo_name: String,
    /// Value at evaluation time; `None` when the window had no data.
    pub value: Option<f64>,
    pub threshold: f64,
    pub reference_link: String,
    pub timestamp: DateTime<Utc>,
}

impl AlertEvent {
    pub fn is_firing(&self) -> bool {
        self.state == AlertState::Firing
    }

    /// Stable key for the alerting series.
    pub fn key(&self) -> String {
        format!("{}/{}", self.rule_name, self.slo_name)
    }
}
