//! Best-effort batched span export.
//!
//! ```text
//! Span::end ──try_send──▶ [bounded queue] ──▶ batch task ──▶ SpanExporter
//!                 │ full
//!                 ▼
//!      span_export_dropped_total
//! ```
//!
//! The request path only ever performs a non-blocking `try_send`. A slow or
//! unreachable collector fills the queue and further spans are dropped.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::processor::SpanProcessor;
use super::span::FinishedSpan;
use crate::domain::ports::SpanExporter;
use crate::metrics::{names, MetricsRecorder};

/// Batch export settings
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Maximum queued spans before new spans are dropped
    pub queue_capacity: usize,

    /// Maximum spans per export call
    pub max_batch_size: usize,

    /// Export a partial batch after this long
    pub flush_interval: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 2048,
            max_batch_size: 512,
            flush_interval: Duration::from_secs(5),
        }
    }
}

/// Queues sampled spans for the background export task.
#[derive(Debug, Clone)]
pub struct BatchExportProcessor {
    sender: mpsc::Sender<FinishedSpan>,
    recorder: Arc<MetricsRecorder>,
}

impl BatchExportProcessor {
    /// Spawn the export task. It runs until `shutdown` is cancelled or every
    /// processor handle is dropped, then flushes what is queued.
    pub fn spawn(
        exporter: Arc<dyn SpanExporter>,
        config: BatchConfig,
        recorder: Arc<MetricsRecorder>,
        shutdown: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        let task = BatchTask {
            exporter,
            receiver,
            max_batch_size: config.max_batch_size.max(1),
            flush_interval: config.flush_interval,
            recorder: Arc::clone(&recorder),
        };
        let handle = tokio::spawn(task.run(shutdown));

        (Self { sender, recorder }, handle)
    }
}

impl SpanProcessor for BatchExportProcessor {
    fn on_end(&self, span: &FinishedSpan) {
        if !span.sampled {
            return;
        }
        if let Err(e) = self.sender.try_send(span.clone()) {
            self.recorder
                .increment_counter(names::SPAN_EXPORT_DROPPED_TOTAL, &[]);
            debug!(span_id = %span.span_id, error = %e, "Dropping span, export queue unavailable");
        }
    }
}

struct BatchTask {
    exporter: Arc<dyn SpanExporter>,
    receiver: mpsc::Receiver<FinishedSpan>,
    max_batch_size: usize,
    flush_interval: Duration,
    recorder: Arc<MetricsRecorder>,
}

impl BatchTask {
    async fn run(mut self, shutdown: CancellationToken) {
        let mut batch: Vec<FinishedSpan> = Vec::with_capacity(self.max_batch_size);
        let mut ticker = tokio::time::interval(self.flush_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // First tick completes immediately.
        ticker.tick().await;

        info!(exporter = %self.exporter.name(), "Span export task started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    self.receiver.close();
                    while let Ok(span) = self.receiver.try_recv() {
                        batch.push(span);
                        if batch.len() >= self.max_batch_size {
                            self.flush(&mut batch).await;
                        }
                    }
                    break;
                }
                received = self.receiver.recv() => match received {
                    Some(span) => {
                        batch.push(span);
                        if batch.len() >= self.max_batch_size {
                            self.flush(&mut batch).await;
                        }
                    }
                    None => break,
                },
                _ = ticker.tick() => {
                    self.flush(&mut batch).await;
                }
            }
        }

        self.flush(&mut batch).await;
        if let Err(e) = self.exporter.shutdown().await {
            warn!(exporter = %self.exporter.name(), error = %e, "Span exporter shutdown failed");
        }
        info!(exporter = %self.exporter.name(), "Span export task stopped");
    }

    async fn flush(&self, batch: &mut Vec<FinishedSpan>) {
        if batch.is_empty() {
            return;
        }
        let spans = std::mem::replace(batch, Vec::with_capacity(self.max_batch_size));
        let count = spans.len();

        match self.exporter.export(spans).await {
            Ok(()) => debug!(exporter = %self.exporter.name(), count, "Exported span batch"),
            Err(e) => {
                self.recorder.add_counter(
                    names::SPAN_EXPORT_FAILURES_TOTAL,
                    &[("exporter", self.exporter.name())],
                    count as u64,
                );
                warn!(exporter = %self.exporter.name(), count, error = %e, "Span export failed");
            }
        }
    }
}
