//! tracewarden - Trace Propagation, Span Recording and SLO Compliance
//!
//! Carries trace identity across service boundaries, records spans and
//! latency histograms for every request, and continuously evaluates service
//! level objectives over rolling windows, raising alerts when compliance or
//! error budget falls below configured thresholds.
//!
//! # Architecture
//!
//! ```text
//! inbound headers ─▶ Propagator ─▶ Tracer ─▶ Span ─end()─▶ processors ─▶ exporter
//!                                              │
//!                                              ▼
//!                                      MetricsRecorder ─▶ /metrics
//!                                              │
//!                                              ▼
//!                          SloEngine (snapshots, windows, budgets, alerts)
//!                                              │
//!                                              ▼
//!                                      AlertPublisher(s)
//! ```
//!
//! # Modules
//!
//! - [`adapters`] - Span exporters, alert publishers and cache backends
//! - [`config`] - Process configuration and the SLO file
//! - [`domain`] - Ports and alert events
//! - [`error`] - Error types
//! - [`ids`] - Trace, span and correlation ids; sampling
//! - [`instrument`] - Request, cache, store and operation instrumentation
//! - [`metrics`] - Histograms, counters, gauges and exposition
//! - [`propagation`] - Header formats, baggage and the propagator
//! - [`server`] - Health, metrics and API HTTP servers
//! - [`slo`] - SLO definitions, window math, error budgets and alerting
//! - [`telemetry`] - Pipeline assembly
//! - [`tracer`] - Spans, processors and batch export

pub mod adapters;
pub mod config;
pub mod domain;
pub mod error;
pub mod ids;
pub mod instrument;
pub mod metrics;
pub mod propagation;
pub mod server;
pub mod slo;
pub mod telemetry;
pub mod tracer;

// Re-export commonly used types
pub use config::TelemetryConfig;
pub use error::{Error, Result};
pub use ids::{CorrelationId, SpanId, TraceId};
pub use instrument::{RequestInstrumentation, TracedCache};
pub use metrics::MetricsRecorder;
pub use propagation::{Propagator, TraceContext};
pub use slo::{SloDefinition, SloEngine};
pub use telemetry::Telemetry;
pub use tracer::{Span, Tracer};
