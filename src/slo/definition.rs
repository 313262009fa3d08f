//! SLO definitions and evaluation windows.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::config::duration::{format_duration, parse_duration};
use crate::error::{Error, Result};

// =============================================================================
// Window
// =============================================================================

/// A trailing evaluation window such as `5m` or `24h`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SloWindow(Duration);

impl SloWindow {
    pub const FIVE_MINUTES: SloWindow = SloWindow(Duration::from_secs(5 * 60));
    pub const ONE_HOUR: SloWindow = SloWindow(Duration::from_secs(60 * 60));
    pub const ONE_DAY: SloWindow = SloWindow(Duration::from_secs(24 * 60 * 60));

    pub fn new(duration: Duration) -> Self {
        Self(duration)
    }

    pub fn duration(&self) -> Duration {
        self.0
    }

    /// Default window set: 5m, 1h, 24h.
    pub fn defaults() -> Vec<SloWindow> {
        vec![Self::FIVE_MINUTES, Self::ONE_HOUR, Self::ONE_DAY]
    }
}

impl fmt::Display for SloWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_duration(self.0))
    }
}

impl FromStr for SloWindow {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        parse_duration(s).map(SloWindow)
    }
}

impl Serialize for SloWindow {
    fn serialize<S: Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        s.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SloWindow {
    fn deserialize<D: Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(d)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// Definition
// =============================================================================

/// One latency objective over a set of operations.
///
/// A request is "good" when it completes within `latency_threshold` seconds.
/// Compliance is the good fraction over each window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SloDefinition {
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Operation (endpoint) names whose requests count toward this SLO
    pub operations: Vec<String>,

    /// Latency threshold in seconds
    pub latency_threshold: f64,

    /// Target good fraction, strictly between 0 and 1
    pub target: f64,

    #[serde(default = "SloWindow::defaults")]
    pub windows: Vec<SloWindow>,
}

impl SloDefinition {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        operations: &[&str],
        latency_threshold: f64,
        target: f64,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            operations: operations.iter().map(|s| s.to_string()).collect(),
            latency_threshold,
            target,
            windows: SloWindow::defaults(),
        }
    }

    pub fn with_windows(mut self, windows: Vec<SloWindow>) -> Self {
        self.windows = windows;
        self
    }

    /// Allowed bad fraction: `1 - target`.
    pub fn error_budget(&self) -> f64 {
        1.0 - self.target
    }

    pub fn matches(&self, operation: &str) -> bool {
        self.operations.iter().any(|op| op == operation)
    }

    pub fn shortest_window(&self) -> Option<SloWindow> {
        self.windows.iter().min().copied()
    }

    pub fn longest_window(&self) -> Option<SloWindow> {
        self.windows.iter().max().copied()
    }

    /// Check the definition and sort its windows shortest first.
    pub fn validate(&mut self) -> Result<()> {
        let invalid = |reason: &str| Error::InvalidSlo {
            name: self.name.clone(),
            reason: reason.to_string(),
        };

        if self.name.trim().is_empty() {
            return Err(invalid("name must not be empty"));
        }
        if !(self.target > 0.0 && self.target < 1.0) {
            return Err(invalid("target must be strictly between 0 and 1"));
        }
        if !(self.latency_threshold.is_finite() && self.latency_threshold > 0.0) {
            return Err(invalid("latency_threshold must be a positive number of seconds"));
        }
        if self.operations.is_empty() {
            return Err(invalid("operations must not be empty"));
        }
        if self.windows.is_empty() {
            return Err(invalid("windows must not be empty"));
        }

        self.windows.sort();
        self.windows.dedup();
        Ok(())
    }
}

/// Validate a set of definitions, rejecting duplicate names.
pub fn validate_all(slos: &mut [SloDefinition]) -> Result<()> {
    let mut seen = HashSet::new();
    for slo in slos.iter_mut() {
        slo.validate()?;
        if !seen.insert(slo.name.clone()) {
            return Err(Error::InvalidSlo {
                name: slo.name.clone(),
                reason: "duplicate SLO name".to_string(),
            });
        }
    }
    Ok(())
}

/// Built-in SLO catalog used when no SLO file is configured.
pub fn default_catalog() -> Vec<SloDefinition> {
    vec![
        SloDefinition::new(
            "api_health",
            "API Health endpoint latency",
            &["health_check", "read_root", "/health"],
            0.1,
            0.95,
        ),
        SloDefinition::new(
            "external_data",
            "External data retrieval latency",
            &["get_external_data"],
            0.3,
            0.90,
        ),
        SloDefinition::new(
            "data_access",
            "Database access operations latency",
            &["read_users", "read_items", "create_user", "create_item"],
            0.2,
            0.95,
        ),
    ]
}
