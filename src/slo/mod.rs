//! SLO Module
//!
//! Multi-window latency SLO compliance, error budgets and alerting.
//!
//! ```text
//! ┌───────────────────┐   snapshot    ┌──────────────┐   Δ per window   ┌──────────────┐
//! │  MetricsRecorder  │──────────────▶│ SnapshotRing │─────────────────▶│ Compliance / │
//! │ slo_request_*     │   every tick  │  (per SLO)   │                  │ ErrorBudget  │
//! └───────────────────┘               └──────────────┘                  └──────┬───────┘
//!                                                                              │
//!                      ┌──────────────┐   transitions   ┌───────────────┐      │
//!                      │AlertPublisher│◀────────────────│ AlertTracker  │◀─────┘
//!                      └──────────────┘                 └───────────────┘
//! ```
//!
//! Ratios are always computed from summed counts over the window, never by
//! averaging per-tick ratios.

pub mod alert;
pub mod budget;
pub mod definition;
pub mod engine;
pub mod status;
pub mod window;

mod proptest;

pub use alert::{default_rules, AlertCondition, AlertRule, AlertTracker, GLOBAL_SLO_LABEL};
pub use budget::{BudgetState, ComplianceRecord, ErrorBudget};
pub use definition::{default_catalog, SloDefinition, SloWindow};
pub use engine::{SloEngine, SloEngineConfig, SloEvaluation, DEFAULT_RUNBOOK_BASE_URL};
pub use status::{ActiveAlert, LatencyPercentiles, SloStatus, SloStatusReport, StatusHandle, WindowStatus};
