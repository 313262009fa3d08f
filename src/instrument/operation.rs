//! Operation timing helper.

use std::future::Future;

use tracing::debug;

use crate::metrics::names;
use crate::tracer::{Span, SpanKind, Tracer};

/// Run `call` inside a span named `operation`, a child of `parent` when
/// given. Counts `trace_operations_total{service,operation}`; the span's
/// duration and any error reach `span_duration_seconds` and
/// `trace_errors_total` through the tracer's metrics processor.
pub async fn time_operation<F, T, E>(
    tracer: &Tracer,
    parent: Option<&Span>,
    operation: &str,
    call: F,
) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
    E: std::error::Error,
{
    let span = match parent {
        Some(parent) => parent.child(operation),
        None => tracer.start_span(operation, None),
    };
    run(tracer, span, operation, call).await
}

/// Time a call to another service under a client span, a child of
/// `parent`. `call` receives the client span to inject into the outbound
/// request, so the downstream server span parents on it.
pub async fn time_outbound<F, Fut, T, E>(
    tracer: &Tracer,
    parent: &Span,
    operation: &str,
    call: F,
) -> Result<T, E>
where
    F: FnOnce(&Span) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::error::Error,
{
    let span = parent
        .child_builder(operation)
        .with_kind(SpanKind::Client)
        .start();
    let pending = call(&span);
    run(tracer, span, operation, pending).await
}

async fn run<F, T, E>(tracer: &Tracer, mut span: Span, operation: &str, call: F) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
    E: std::error::Error,
{
    tracer.recorder().increment_counter(
        names::TRACE_OPERATIONS_TOTAL,
        &[("service", tracer.service()), ("operation", operation)],
    );

    let result = call.await;
    if let Err(e) = &result {
        span.record_error(e);
    }
    if let Err(e) = span.end() {
        debug!(error = %e, "Operation span already ended");
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{RandomIdGenerator, Sampler};
    use crate::metrics::MetricsRecorder;
    use crate::tracer::{InMemorySpanProcessor, MetricsSpanProcessor};
    use crate::propagation::formats::format_traceparent;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn tracer() -> (Tracer, Arc<MetricsRecorder>) {
        let recorder = Arc::new(MetricsRecorder::new());
        let tracer = Tracer::new(
            "api",
            Arc::new(RandomIdGenerator),
            Sampler::always_on(),
            Arc::clone(&recorder),
            vec![Arc::new(MetricsSpanProcessor::new(Arc::clone(&recorder)))],
        );
        (tracer, recorder)
    }

    #[tokio::test]
    async fn test_success_counts_operation_and_duration() {
        let (tracer, recorder) = tracer();
        let value: Result<u8, std::io::Error> =
            time_operation(&tracer, None, "get_external_data", async { Ok(7) }).await;
        assert_eq!(value.unwrap(), 7);

        assert_eq!(
            recorder.counter_total(
                names::TRACE_OPERATIONS_TOTAL,
                &[("operation", "get_external_data")]
            ),
            1
        );
        let durations = recorder.histogram_snapshot(
            names::SPAN_DURATION_SECONDS,
            &[("operation", "get_external_data"), ("status", "ok")],
        );
        assert_eq!(durations.count, 1);
    }

    #[tokio::test]
    async fn test_error_counted_with_type() {
        let (tracer, recorder) = tracer();
        let root = tracer.start_span("request", None);

        let result: Result<(), std::io::Error> = time_operation(&tracer, Some(&root), "fetch", async {
            Err(std::io::Error::other("upstream timeout"))
        })
        .await;
        assert!(result.is_err());

        assert_eq!(
            recorder.counter_total(
                names::TRACE_ERRORS_TOTAL,
                &[("operation", "fetch"), ("error_type", "Error")]
            ),
            1
        );
        assert_eq!(
            recorder
                .histogram_snapshot(names::SPAN_DURATION_SECONDS, &[("status", "error")])
                .count,
            1
        );
    }

    #[tokio::test]
    async fn test_outbound_call_runs_under_client_span() {
        let recorder = Arc::new(MetricsRecorder::new());
        let spans = Arc::new(InMemorySpanProcessor::new());
        let tracer = Tracer::new(
            "api",
            Arc::new(RandomIdGenerator),
            Sampler::always_on(),
            Arc::clone(&recorder),
            vec![spans.clone()],
        );
        let mut root = tracer.start_span("get_external_data", None);

        let outbound = time_outbound(&tracer, &root, "fetch_external_data", |client| {
            let mut outbound = HashMap::new();
            outbound.insert("traceparent".to_string(), format_traceparent(&client.context()));
            async move { Ok::<_, std::io::Error>(outbound) }
        })
        .await
        .unwrap();
        root.end().unwrap();

        let finished = spans.spans();
        let client = finished
            .iter()
            .find(|s| s.name == "fetch_external_data")
            .unwrap();
        assert_eq!(client.kind, SpanKind::Client);
        assert_eq!(client.parent_span_id, Some(root.span_id()));
        assert!(outbound["traceparent"].contains(&client.span_id.to_hex()));
        assert_eq!(
            recorder.counter_total(
                names::TRACE_OPERATIONS_TOTAL,
                &[("operation", "fetch_external_data")]
            ),
            1
        );
    }
}
