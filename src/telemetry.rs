//! Pipeline assembly.
//!
//! [`Telemetry::start`] builds the shared recorder, propagator and tracer,
//! spawns the span export task and hands back the SLO engine for the caller
//! to run.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::adapters::{
    HttpSpanExporter, InMemoryCache, LoggingAlertPublisher, LoggingSpanExporter, NoopCache,
    WebhookAlertPublisher,
};
use crate::config::{load_slo_config, CacheKind, ExportTarget, TelemetryConfig};
use crate::domain::ports::{AlertPublisher, CacheBackend, SpanExporter};
use crate::error::Result;
use crate::ids::{IdGenerator, RandomIdGenerator, Sampler};
use crate::instrument::RequestInstrumentation;
use crate::metrics::MetricsRecorder;
use crate::propagation::Propagator;
use crate::slo::{SloEngine, StatusHandle};
use crate::tracer::{BatchExportProcessor, MetricsSpanProcessor, SpanProcessor, Tracer};

/// Shared handles to the running pipeline.
#[derive(Debug)]
pub struct Telemetry {
    recorder: Arc<MetricsRecorder>,
    tracer: Tracer,
    instrumentation: RequestInstrumentation,
    status: StatusHandle,
    cache: Arc<dyn CacheBackend>,
    shutdown: CancellationToken,
    export_task: Option<JoinHandle<()>>,
}

impl Telemetry {
    /// Build everything from `config`. Must be called inside a Tokio runtime.
    /// The returned engine is not started.
    pub fn start(config: &TelemetryConfig, shutdown: CancellationToken) -> Result<(Self, SloEngine)> {
        config.validate()?;

        let recorder = Arc::new(MetricsRecorder::new());
        let ids: Arc<dyn IdGenerator> = Arc::new(RandomIdGenerator);
        let sampler = Sampler::new(config.sampling_ratio);

        let (slos, engine_config) = load_slo_config(config.slo_file.as_deref())?;

        let mut alert_publishers: Vec<Arc<dyn AlertPublisher>> =
            vec![Arc::new(LoggingAlertPublisher::new())];
        if let Some(url) = &config.alert_webhook {
            alert_publishers.push(Arc::new(WebhookAlertPublisher::new(
                url.clone(),
                config.http_timeout,
            )?));
        }
        let engine = SloEngine::new(
            slos.clone(),
            engine_config,
            Arc::clone(&recorder),
            alert_publishers,
        )?;

        let mut processors: Vec<Arc<dyn SpanProcessor>> =
            vec![Arc::new(MetricsSpanProcessor::new(Arc::clone(&recorder)))];
        let exporter: Option<Arc<dyn SpanExporter>> = match &config.export {
            ExportTarget::None => None,
            ExportTarget::Logging => Some(Arc::new(LoggingSpanExporter::new())),
            ExportTarget::Http { endpoint, timeout } => Some(Arc::new(HttpSpanExporter::new(
                endpoint.clone(),
                config.service_name.clone(),
                *timeout,
            )?)),
        };
        let export_task = exporter.map(|exporter| {
            let (processor, handle) = BatchExportProcessor::spawn(
                exporter,
                config.batch.clone(),
                Arc::clone(&recorder),
                shutdown.child_token(),
            );
            processors.push(Arc::new(processor));
            handle
        });

        let tracer = Tracer::new(
            config.service_name.clone(),
            Arc::clone(&ids),
            sampler,
            Arc::clone(&recorder),
            processors,
        );
        let propagator = Arc::new(
            Propagator::new(config.propagation.clone(), ids, sampler)
                .with_recorder(Arc::clone(&recorder)),
        );
        let instrumentation = RequestInstrumentation::new(
            propagator,
            tracer.clone(),
            Arc::clone(&recorder),
            slos,
        );

        let cache: Arc<dyn CacheBackend> = match config.cache {
            CacheKind::Memory => Arc::new(InMemoryCache::new()),
            CacheKind::Noop => Arc::new(NoopCache),
        };

        info!(
            service = %config.service_name,
            sampling_ratio = config.sampling_ratio,
            formats = ?config.propagation.formats.iter().map(|f| f.name()).collect::<Vec<_>>(),
            export = ?config.export,
            cache = cache.name(),
            "Telemetry pipeline started"
        );

        let status = engine.status_handle();
        Ok((
            Self {
                recorder,
                tracer,
                instrumentation,
                status,
                cache,
                shutdown,
                export_task,
            },
            engine,
        ))
    }

    pub fn recorder(&self) -> &Arc<MetricsRecorder> {
        &self.recorder
    }

    pub fn tracer(&self) -> &Tracer {
        &self.tracer
    }

    pub fn instrumentation(&self) -> &RequestInstrumentation {
        &self.instrumentation
    }

    pub fn status(&self) -> &StatusHandle {
        &self.status
    }

    /// Backend for the API's traced cache.
    pub fn cache(&self) -> &Arc<dyn CacheBackend> {
        &self.cache
    }

    /// Cancel background tasks and wait for queued spans to be exported.
    pub async fn shutdown(mut self) {
        self.shutdown.cancel();
        if let Some(handle) = self.export_task.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "Span export task failed");
            }
        }
        info!("Telemetry pipeline stopped");
    }
}
