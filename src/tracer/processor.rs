//! Span processors: synchronous hooks run when a span ends.
//!
//! Processors run on the request path and must not block. Anything slow
//! (network export) belongs behind [`BatchExportProcessor`](super::export::BatchExportProcessor).

use std::fmt::Debug;
use std::sync::Arc;

use parking_lot::RwLock;

use super::span::{FinishedSpan, SpanStatus};
use crate::metrics::{names, MetricsRecorder};

/// Hook invoked once for every finished span.
pub trait SpanProcessor: Send + Sync + Debug {
    fn on_end(&self, span: &FinishedSpan);
}

/// Records every finished span into `span_duration_seconds`, and errors
/// into `trace_errors_total`.
#[derive(Debug, Clone)]
pub struct MetricsSpanProcessor {
    recorder: Arc<MetricsRecorder>,
}

impl MetricsSpanProcessor {
    pub fn new(recorder: Arc<MetricsRecorder>) -> Self {
        Self { recorder }
    }
}

impl SpanProcessor for MetricsSpanProcessor {
    fn on_end(&self, span: &FinishedSpan) {
        let exemplar = span.sampled.then_some(span.trace_id);
        self.recorder.observe_latency(
            names::SPAN_DURATION_SECONDS,
            &[
                ("service", span.service.as_str()),
                ("operation", span.name.as_str()),
                ("status", span.status.as_str()),
            ],
            span.duration.as_secs_f64(),
            exemplar,
        );

        if span.status == SpanStatus::Error {
            let error_type = span
                .exception
                .as_ref()
                .map(|e| e.exception_type.as_str())
                .unwrap_or("error");
            self.recorder.increment_counter(
                names::TRACE_ERRORS_TOTAL,
                &[
                    ("service", span.service.as_str()),
                    ("operation", span.name.as_str()),
                    ("error_type", error_type),
                ],
            );
        }
    }
}

/// Keeps finished spans in memory for later inspection.
#[derive(Debug, Default)]
pub struct InMemorySpanProcessor {
    spans: RwLock<Vec<FinishedSpan>>,
}

impl InMemorySpanProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spans in the order they ended.
    pub fn spans(&self) -> Vec<FinishedSpan> {
        self.spans.read().clone()
    }

    pub fn clear(&self) {
        self.spans.write().clear();
    }
}

impl SpanProcessor for InMemorySpanProcessor {
    fn on_end(&self, span: &FinishedSpan) {
        self.spans.write().push(span.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{RandomIdGenerator, Sampler};
    use crate::tracer::Tracer;

    fn tracer(recorder: &Arc<MetricsRecorder>) -> Tracer {
        Tracer::new(
            "api",
            Arc::new(RandomIdGenerator),
            Sampler::always_on(),
            Arc::clone(recorder),
            vec![Arc::new(MetricsSpanProcessor::new(Arc::clone(recorder)))],
        )
    }

    #[test]
    fn test_span_duration_recorded_with_status() {
        let recorder = Arc::new(MetricsRecorder::new());
        let tracer = tracer(&recorder);

        tracer.start_span("read_users", None).end().unwrap();
        let mut failing = tracer.start_span("read_users", None);
        failing.record_exception("Timeout", "slow");
        failing.end().unwrap();

        let ok = recorder.histogram_snapshot(
            names::SPAN_DURATION_SECONDS,
            &[("operation", "read_users"), ("status", "ok")],
        );
        let err = recorder.histogram_snapshot(
            names::SPAN_DURATION_SECONDS,
            &[("operation", "read_users"), ("status", "error")],
        );
        assert_eq!(ok.count, 1);
        assert_eq!(err.count, 1);
        assert_eq!(
            recorder.counter_total(names::TRACE_ERRORS_TOTAL, &[("error_type", "Timeout")]),
            1
        );
    }

    #[test]
    fn test_sampled_spans_leave_exemplars() {
        let recorder = Arc::new(MetricsRecorder::new());
        let tracer = tracer(&recorder);

        let mut span = tracer.start_span("op", None);
        let trace_id = span.trace_id();
        span.end().unwrap();

        let exemplars = recorder.exemplars();
        assert_eq!(exemplars.len(), 1);
        assert_eq!(exemplars[0].exemplar.trace_id, trace_id);
    }

    #[test]
    fn test_cancelled_span_still_recorded() {
        let recorder = Arc::new(MetricsRecorder::new());
        let tracer = tracer(&recorder);
        drop(tracer.start_span("abandoned", None));

        assert_eq!(
            recorder.counter_total(names::TRACE_ERRORS_TOTAL, &[("error_type", "Cancelled")]),
            1
        );
        assert_eq!(
            recorder
                .histogram_snapshot(names::SPAN_DURATION_SECONDS, &[("operation", "abandoned")])
                .count,
            1
        );
    }
}
