//! tracewarden
//!
//! Runs the instrumented API together with the SLO engine and exposes
//! metrics, exemplars and SLO status.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                           tracewarden                           │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐    ┌──────────────┐    ┌──────────────┐       │
//! │  │  API server  │───▶│   Recorder   │───▶│  SLO engine  │       │
//! │  │ (propagate,  │    │ (histograms, │    │  (windows,   │       │
//! │  │    spans)    │    │   counters)  │    │   alerts)    │       │
//! │  └──────────────┘    └──────────────┘    └──────────────┘       │
//! │         │                   │                   │               │
//! │         ▼                   ▼                   ▼               │
//! │   span exporter       /metrics server     alert publishers      │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use tracewarden::config::{parse_duration, CacheKind, ExportTarget, TelemetryConfig};
use tracewarden::error::{Error, Result};
use tracewarden::propagation::{PropagationFormat, PropagatorConfig};
use tracewarden::server::{self, ApiState, MetricsState};
use tracewarden::telemetry::Telemetry;
use tracewarden::tracer::BatchConfig;

// =============================================================================
// CLI Arguments
// =============================================================================

/// Trace propagation, span recording and SLO compliance for HTTP services
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Service name stamped on every span
    #[arg(long, env = "SERVICE_NAME", default_value = "api")]
    service_name: String,

    /// Fraction of new traces sampled (0.0 - 1.0)
    #[arg(long, env = "TRACE_SAMPLING_RATIO", default_value = "1.0")]
    sampling_ratio: f64,

    /// Propagation formats in extraction order
    #[arg(
        long,
        env = "PROPAGATION_FORMATS",
        value_delimiter = ',',
        default_value = "tracecontext,b3,b3multi"
    )]
    propagation_formats: Vec<PropagationFormat>,

    /// Correlation id header
    #[arg(long, env = "CORRELATION_HEADER", default_value = "X-Correlation-ID")]
    correlation_header: String,

    /// Ignore inbound and skip outbound baggage
    #[arg(long, env = "DISABLE_BAGGAGE")]
    disable_baggage: bool,

    /// Span export target (none, logging, http)
    #[arg(long, env = "SPAN_EXPORT", default_value = "logging")]
    span_export: String,

    /// Collector endpoint for http span export
    #[arg(long, env = "COLLECTOR_ENDPOINT")]
    collector_endpoint: Option<String>,

    /// Maximum queued spans awaiting export
    #[arg(long, env = "EXPORT_QUEUE_CAPACITY", default_value = "2048")]
    export_queue_capacity: usize,

    /// Maximum spans per export batch
    #[arg(long, env = "EXPORT_BATCH_SIZE", default_value = "512")]
    export_batch_size: usize,

    /// Export a partial batch after this long
    #[arg(long, env = "EXPORT_FLUSH_INTERVAL", default_value = "5s", value_parser = parse_duration)]
    export_flush_interval: Duration,

    /// Webhook receiving alert transitions
    #[arg(long, env = "ALERT_WEBHOOK_URL")]
    alert_webhook_url: Option<String>,

    /// Timeout for collector and webhook calls
    #[arg(long, env = "HTTP_TIMEOUT", default_value = "5s", value_parser = parse_duration)]
    http_timeout: Duration,

    /// YAML file with SLO definitions and alert rules
    #[arg(long, env = "SLO_CONFIG")]
    slo_config: Option<PathBuf>,

    /// Metrics server bind address
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
    metrics_addr: SocketAddr,

    /// Health server bind address
    #[arg(long, env = "HEALTH_ADDR", default_value = "0.0.0.0:8081")]
    health_addr: SocketAddr,

    /// Instrumented API bind address
    #[arg(long, env = "API_ADDR", default_value = "0.0.0.0:8000")]
    api_addr: SocketAddr,

    /// Do not start the instrumented API
    #[arg(long, env = "DISABLE_API")]
    disable_api: bool,

    /// API cache backend (memory, noop)
    #[arg(long, env = "CACHE_BACKEND", default_value = "memory")]
    cache_backend: CacheKind,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

impl Args {
    fn into_config(self) -> Result<TelemetryConfig> {
        let export = match self.span_export.to_lowercase().as_str() {
            "none" => ExportTarget::None,
            "logging" => ExportTarget::Logging,
            "http" => ExportTarget::Http {
                endpoint: self.collector_endpoint.ok_or_else(|| {
                    Error::Config("--collector-endpoint is required for http export".to_string())
                })?,
                timeout: self.http_timeout,
            },
            other => {
                return Err(Error::Config(format!("unknown span export target: {}", other)));
            }
        };

        Ok(TelemetryConfig {
            service_name: self.service_name,
            sampling_ratio: self.sampling_ratio,
            propagation: PropagatorConfig {
                formats: self.propagation_formats,
                correlation_header: self.correlation_header,
                baggage: !self.disable_baggage,
            },
            export,
            batch: BatchConfig {
                queue_capacity: self.export_queue_capacity,
                max_batch_size: self.export_batch_size,
                flush_interval: self.export_flush_interval,
            },
            alert_webhook: self.alert_webhook_url,
            http_timeout: self.http_timeout,
            slo_file: self.slo_config,
            metrics_addr: self.metrics_addr,
            health_addr: self.health_addr,
            api_addr: (!self.disable_api).then_some(self.api_addr),
            cache: self.cache_backend,
        })
    }
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level, args.log_json);

    let config = args.into_config()?;

    info!("Starting tracewarden");
    info!("  Service: {}", config.service_name);
    info!("  Sampling ratio: {}", config.sampling_ratio);
    info!("  Span export: {:?}", config.export);
    if let Some(path) = &config.slo_file {
        info!("  SLO file: {}", path.display());
    }

    let shutdown = CancellationToken::new();
    let (telemetry, engine) = Telemetry::start(&config, shutdown.clone())?;

    let engine_handle = tokio::spawn(engine.run(shutdown.child_token()));

    let health_shutdown = shutdown.child_token();
    let health_addr = config.health_addr;
    tokio::spawn(async move {
        if let Err(e) = server::run_health_server(health_addr, health_shutdown).await {
            error!("Health server error: {}", e);
        }
    });

    let metrics_state = MetricsState {
        recorder: telemetry.recorder().clone(),
        status: telemetry.status().clone(),
    };
    let metrics_shutdown = shutdown.child_token();
    let metrics_addr = config.metrics_addr;
    tokio::spawn(async move {
        if let Err(e) = server::run_metrics_server(metrics_addr, metrics_state, metrics_shutdown).await {
            error!("Metrics server error: {}", e);
        }
    });

    if let Some(api_addr) = config.api_addr {
        let api_state = ApiState::new(
            telemetry.instrumentation().clone(),
            telemetry.cache().clone(),
            telemetry.recorder().clone(),
        );
        let api_shutdown = shutdown.child_token();
        tokio::spawn(async move {
            if let Err(e) = server::run_api_server(api_addr, api_state, api_shutdown).await {
                error!("API server error: {}", e);
            }
        });
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutdown signal received");

    shutdown.cancel();
    if let Err(e) = engine_handle.await {
        warn!("SLO engine task failed: {}", e);
    }
    telemetry.shutdown().await;

    info!("tracewarden shutdown complete");
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(log_level: &str, json: bool) {
    let level = match log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "hyper_util=warn", "reqwest=warn"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}
