//! Span Exporter Adapters
//!
//! Destinations for batches of finished spans: an HTTP collector taking
//! JSON batches, the log, memory (tests) or nowhere.

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, info};

use crate::domain::ports::SpanExporter;
use crate::error::{Error, Result};
use crate::tracer::FinishedSpan;

// =============================================================================
// HTTP Collector
// =============================================================================

#[derive(Serialize)]
struct ExportRequest<'a> {
    service: &'a str,
    spans: &'a [FinishedSpan],
}

/// POSTs `{"service": ..., "spans": [...]}` to a collector endpoint.
#[derive(Debug, Clone)]
pub struct HttpSpanExporter {
    endpoint: String,
    service: String,
    client: Client,
}

impl HttpSpanExporter {
    pub fn new(
        endpoint: impl Into<String>,
        service: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            endpoint: endpoint.into(),
            service: service.into(),
            client,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl SpanExporter for HttpSpanExporter {
    fn name(&self) -> &str {
        "http"
    }

    async fn export(&self, batch: Vec<FinishedSpan>) -> Result<()> {
        let body = ExportRequest {
            service: &self.service,
            spans: &batch,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(Error::CollectorConnection)?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::ExportFailed(format!(
                "collector {} returned {}",
                self.endpoint, status
            )));
        }

        debug!(endpoint = %self.endpoint, count = batch.len(), "Span batch accepted");
        Ok(())
    }
}

// =============================================================================
// Logging
// =============================================================================

/// Logs every exported span at debug level.
#[derive(Debug, Clone, Default)]
pub struct LoggingSpanExporter;

impl LoggingSpanExporter {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SpanExporter for LoggingSpanExporter {
    fn name(&self) -> &str {
        "logging"
    }

    async fn export(&self, batch: Vec<FinishedSpan>) -> Result<()> {
        for span in &batch {
            debug!(
                trace_id = %span.trace_id,
                span_id = %span.span_id,
                parent_span_id = ?span.parent_span_id.map(|p| p.to_hex()),
                name = %span.name,
                status = %span.status.as_str(),
                duration_ms = span.duration.as_secs_f64() * 1000.0,
                "Span"
            );
        }
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        info!("Logging span exporter shut down");
        Ok(())
    }
}

// =============================================================================
// In-Memory
// =============================================================================

/// Keeps exported spans for inspection in tests.
#[derive(Debug, Default)]
pub struct InMemorySpanExporter {
    spans: RwLock<Vec<FinishedSpan>>,
    batches: RwLock<usize>,
}

impl InMemorySpanExporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spans(&self) -> Vec<FinishedSpan> {
        self.spans.read().clone()
    }

    /// Number of export calls received.
    pub fn batches(&self) -> usize {
        *self.batches.read()
    }

    pub fn clear(&self) {
        self.spans.write().clear();
        *self.batches.write() = 0;
    }
}

#[async_trait]
impl SpanExporter for InMemorySpanExporter {
    fn name(&self) -> &str {
        "memory"
    }

    async fn export(&self, batch: Vec<FinishedSpan>) -> Result<()> {
        self.spans.write().extend(batch);
        *self.batches.write() += 1;
        Ok(())
    }
}

// =============================================================================
// Noop
// =============================================================================

/// Discards every batch. Used when export is disabled.
#[derive(Debug, Clone, Default)]
pub struct NoopSpanExporter;

#[async_trait]
impl SpanExporter for NoopSpanExporter {
    fn name(&self) -> &str {
        "noop"
    }

    async fn export(&self, _batch: Vec<FinishedSpan>) -> Result<()> {
        Ok(())
    }
}
