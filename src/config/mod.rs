//! Configuration
//!
//! Process settings come from CLI flags and environment variables (see
//! `main.rs`) and are collected into [`TelemetryConfig`]. SLO definitions
//! and alert rules may additionally be loaded from a YAML file:
//!
//! ```yaml
//! evaluation_interval: 30s
//! runbook_base_url: https://runbooks.example.com/slo
//! slos:
//!   - name: api_health
//!     description: API Health endpoint latency
//!     operations: [health_check, read_root]
//!     latency_threshold: 0.1
//!     target: 0.95
//!     windows: [5m, 1h, 24h]
//! alert_rules:
//!   - name: SLOBreached
//!     severity: warning
//!     for: 5m
//!     condition: { type: compliance_below_target, window: 5m }
//!     summary: "SLO {slo} breached"
//!     description: "Compliance {value} below {threshold}"
//! ```

pub mod duration;
pub mod validation;

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Error, Result};
use crate::propagation::PropagatorConfig;
use crate::slo::{default_catalog, default_rules, AlertRule, SloDefinition, SloEngineConfig};
use crate::tracer::BatchConfig;

pub use duration::{format_duration, parse_duration};

// =============================================================================
// Process Configuration
// =============================================================================

/// Where sampled spans are sent.
#[derive(Debug, Clone, PartialEq)]
pub enum ExportTarget {
    /// Spans are recorded as metrics only
    None,
    /// Spans are logged at debug level
    Logging,
    /// Spans are POSTed as JSON batches to a collector
    Http { endpoint: String, timeout: Duration },
}

/// Backend behind the API's traced cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CacheKind {
    /// Process-local cache with TTLs
    #[default]
    Memory,
    /// Stores nothing; every lookup misses
    Noop,
}

impl std::str::FromStr for CacheKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "memory" => Ok(CacheKind::Memory),
            "noop" | "none" => Ok(CacheKind::Noop),
            other => Err(Error::Config(format!("unknown cache backend: {}", other))),
        }
    }
}

/// Everything the binary needs to wire the pipeline together.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name stamped on every span
    pub service_name: String,

    /// Fraction of new root traces sampled
    pub sampling_ratio: f64,

    pub propagation: PropagatorConfig,

    pub export: ExportTarget,

    pub batch: BatchConfig,

    /// Alert webhook URL; alerts are always logged
    pub alert_webhook: Option<String>,

    /// Timeout for webhook and collector calls
    pub http_timeout: Duration,

    /// Optional SLO/alert rule file
    pub slo_file: Option<PathBuf>,

    pub metrics_addr: SocketAddr,
    pub health_addr: SocketAddr,

    /// Instrumented demo API listener; disabled when `None`
    pub api_addr: Option<SocketAddr>,

    /// Cache backend used by the API
    pub cache: CacheKind,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "api".to_string(),
            sampling_ratio: 1.0,
            propagation: PropagatorConfig::default(),
            export: ExportTarget::Logging,
            batch: BatchConfig::default(),
            alert_webhook: None,
            http_timeout: Duration::from_secs(5),
            slo_file: None,
            metrics_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            health_addr: SocketAddr::from(([0, 0, 0, 0], 8081)),
            api_addr: Some(SocketAddr::from(([0, 0, 0, 0], 8000))),
            cache: CacheKind::Memory,
        }
    }
}

impl TelemetryConfig {
    pub fn validate(&self) -> Result<()> {
        validation::validate_telemetry(self)
    }
}

// =============================================================================
// SLO File
// =============================================================================

/// Contents of an SLO configuration file. Omitted sections fall back to
/// the built-in catalog and rules.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SloFile {
    #[serde(default)]
    pub slos: Vec<SloDefinition>,

    #[serde(default)]
    pub alert_rules: Option<Vec<AlertRule>>,

    #[serde(default)]
    pub runbook_base_url: Option<String>,

    #[serde(default, with = "optional_duration")]
    pub evaluation_interval: Option<Duration>,
}

impl SloFile {
    pub fn from_yaml(raw: &str) -> Result<Self> {
        let mut file: SloFile = serde_yaml::from_str(raw)?;
        validation::validate_slo_file(&mut file)?;
        Ok(file)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read SLO file {}: {}", path.display(), e))
        })?;
        let file = Self::from_yaml(&raw)?;
        info!(
            path = %path.display(),
            slos = file.slos.len(),
            rules = file.alert_rules.as_ref().map(Vec::len),
            "Loaded SLO file"
        );
        Ok(file)
    }

    /// Resolve into SLO definitions and engine settings.
    pub fn into_engine_parts(self) -> (Vec<SloDefinition>, SloEngineConfig) {
        let defaults = SloEngineConfig::default();
        let slos = if self.slos.is_empty() {
            default_catalog()
        } else {
            self.slos
        };
        let config = SloEngineConfig {
            evaluation_interval: self
                .evaluation_interval
                .unwrap_or(defaults.evaluation_interval),
            rules: self.alert_rules.unwrap_or_else(default_rules),
            runbook_base_url: self.runbook_base_url.unwrap_or(defaults.runbook_base_url),
        };
        (slos, config)
    }
}

/// Load the SLO file when one is configured, otherwise use the defaults.
pub fn load_slo_config(path: Option<&Path>) -> Result<(Vec<SloDefinition>, SloEngineConfig)> {
    match path {
        Some(path) => Ok(SloFile::load(path)?.into_engine_parts()),
        None => Ok(SloFile::default().into_engine_parts()),
    }
}

mod optional_duration {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_str(&super::format_duration(*d)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Option::<String>::deserialize(d)?
            .map(|raw| super::parse_duration(&raw).map_err(serde::de::Error::custom))
            .transpose()
    }
}
