//! Inbound request boundary.
//!
//! ```text
//! headers ──extract──▶ TraceContext + CorrelationId ──▶ root span (server)
//!                                                         │
//!            response ◀──inject_response── finish(status) ┘
//!                                             │
//!                     request_duration_seconds, slo_request_latency_seconds,
//!                     slo_errors_total
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::ids::CorrelationId;
use crate::metrics::{names, MetricsRecorder};
use crate::propagation::{Extractor, Injector, Propagator, TraceContext};
use crate::slo::SloDefinition;
use crate::tracer::{RequestScope, Span, SpanKind, SpanStatus, Tracer};

/// Status codes at or above this count against SLO error totals.
pub const SLO_ERROR_STATUS: u16 = 400;

/// Status recorded for a request abandoned before a response was produced.
pub const CLIENT_CLOSED_STATUS: u16 = 499;

/// Shared per-process boundary instrumentation.
#[derive(Debug, Clone)]
pub struct RequestInstrumentation {
    propagator: Arc<Propagator>,
    tracer: Tracer,
    recorder: Arc<MetricsRecorder>,
    slos: Arc<[SloDefinition]>,
}

impl RequestInstrumentation {
    pub fn new(
        propagator: Arc<Propagator>,
        tracer: Tracer,
        recorder: Arc<MetricsRecorder>,
        slos: Vec<SloDefinition>,
    ) -> Self {
        Self {
            propagator,
            tracer,
            recorder,
            slos: slos.into(),
        }
    }

    pub fn propagator(&self) -> &Arc<Propagator> {
        &self.propagator
    }

    pub fn tracer(&self) -> &Tracer {
        &self.tracer
    }

    /// Names of the SLOs tracking `endpoint`.
    pub fn slos_for(&self, endpoint: &str) -> Vec<String> {
        self.slos
            .iter()
            .filter(|s| s.matches(endpoint))
            .map(|s| s.name.clone())
            .collect()
    }

    /// Open the root span for an inbound request.
    ///
    /// `endpoint` is the operation name used for span naming and SLO
    /// matching, e.g. `health_check`.
    pub fn begin<E: Extractor + ?Sized>(
        &self,
        method: &str,
        endpoint: &str,
        path: &str,
        headers: &E,
    ) -> InboundRequest {
        let parent = self.propagator.extract_remote(headers);
        let correlation_id = self.propagator.extract_correlation_id(headers);

        let mut builder = self
            .tracer
            .span_builder(endpoint)
            .with_kind(SpanKind::Server)
            .with_attribute("http.method", method)
            .with_attribute("http.route", path)
            .with_attribute("correlation_id", correlation_id.as_str())
            .with_correlation_id(correlation_id.clone());

        if let Some(parent) = &parent {
            builder = builder.with_parent(parent);
        }
        let mut span = builder.start();
        if parent.is_none() {
            // Inbound baggage still applies to a fresh root.
            for (key, value) in self.propagator.extract_baggage(headers).iter() {
                span.set_baggage_item(key, value);
            }
        }

        debug!(
            method = %method,
            endpoint = %endpoint,
            trace_id = %span.trace_id(),
            correlation_id = %correlation_id,
            remote_parent = parent.is_some(),
            "Request started"
        );

        InboundRequest {
            instrumentation: self.clone(),
            method: method.to_string(),
            endpoint: endpoint.to_string(),
            correlation_id,
            span,
            started: Instant::now(),
            recorded: false,
        }
    }
}

/// One in-flight inbound request.
///
/// Dropping it without calling [`finish`](InboundRequest::finish) ends the
/// root span as cancelled and records the elapsed time with status
/// [`CLIENT_CLOSED_STATUS`].
#[derive(Debug)]
pub struct InboundRequest {
    instrumentation: RequestInstrumentation,
    method: String,
    endpoint: String,
    correlation_id: CorrelationId,
    span: Span,
    started: Instant,
    recorded: bool,
}

impl InboundRequest {
    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn span_mut(&mut self) -> &mut Span {
        &mut self.span
    }

    pub fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Context of the root span, to parent child spans on.
    pub fn context(&self) -> TraceContext {
        self.span.context()
    }

    /// Task-local scope for log correlation inside the handler.
    pub fn scope(&self) -> RequestScope {
        RequestScope {
            correlation_id: self.correlation_id.clone(),
            trace_id: self.span.trace_id(),
        }
    }

    /// Headers for an outbound call made on behalf of this request, with
    /// `span` (usually a client child span) as the remote parent.
    pub fn inject_outbound<I: Injector + ?Sized>(&self, span: &Span, carrier: &mut I) {
        self.instrumentation
            .propagator
            .inject(&span.context(), &self.correlation_id, carrier);
    }

    /// Close the root span, record request and SLO metrics and write the
    /// correlation and trace id response headers.
    ///
    /// A root span already ended by the handler is logged and counted, and
    /// the metrics and response headers are still written.
    pub fn finish<I: Injector + ?Sized>(mut self, status: u16, response: &mut I) -> Duration {
        if !self.span.is_ended() {
            self.span.set_attribute("http.status_code", status);
            if status >= 500 {
                self.span.set_status(SpanStatus::Error);
            }
        }
        if let Err(e) = self.span.end() {
            warn!(
                endpoint = %self.endpoint,
                correlation_id = %self.correlation_id,
                error = %e,
                "Root span ended before the request finished"
            );
        }

        let elapsed = self.record(status);

        self.instrumentation.propagator.inject_response(
            &self.span.context(),
            &self.correlation_id,
            response,
        );

        debug!(
            endpoint = %self.endpoint,
            status,
            duration_ms = elapsed.as_secs_f64() * 1000.0,
            "Request finished"
        );
        elapsed
    }

    /// Record request and SLO metrics once.
    fn record(&mut self, status: u16) -> Duration {
        let elapsed = self.started.elapsed();
        if self.recorded {
            return elapsed;
        }
        self.recorded = true;

        let seconds = elapsed.as_secs_f64();
        let sampled = self.span.is_sampled();
        let exemplar = sampled.then(|| self.span.trace_id());
        let recorder = &self.instrumentation.recorder;

        recorder.observe_latency(
            names::REQUEST_DURATION_SECONDS,
            &[
                ("method", self.method.as_str()),
                ("endpoint", self.endpoint.as_str()),
                ("trace_sampled", if sampled { "true" } else { "false" }),
            ],
            seconds,
            exemplar,
        );

        for slo in self.instrumentation.slos.iter().filter(|s| s.matches(&self.endpoint)) {
            let labels = [("endpoint", self.endpoint.as_str()), ("slo", slo.name.as_str())];
            recorder.observe_latency(names::SLO_REQUEST_LATENCY_SECONDS, &labels, seconds, exemplar);
            if status >= SLO_ERROR_STATUS {
                recorder.increment_counter(names::SLO_ERRORS_TOTAL, &labels);
            }
        }
        elapsed
    }
}

impl Drop for InboundRequest {
    fn drop(&mut self) {
        if self.recorded {
            return;
        }
        if !self.span.is_ended() {
            self.span.set_attribute("http.status_code", CLIENT_CLOSED_STATUS);
        }
        let elapsed = self.record(CLIENT_CLOSED_STATUS);
        warn!(
            endpoint = %self.endpoint,
            correlation_id = %self.correlation_id,
            duration_ms = elapsed.as_secs_f64() * 1000.0,
            "Request dropped before finishing"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{RandomIdGenerator, Sampler, TraceId};
    use crate::propagation::{PropagatorConfig, TRACE_ID_RESPONSE_HEADER};
    use crate::slo::default_catalog;
    use crate::tracer::{InMemorySpanProcessor, CANCELLED_EXCEPTION};
    use std::collections::HashMap;

    const TRACEPARENT: &str = "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01";

    fn setup() -> (RequestInstrumentation, Arc<MetricsRecorder>, Arc<InMemorySpanProcessor>) {
        let recorder = Arc::new(MetricsRecorder::new());
        let spans = Arc::new(InMemorySpanProcessor::new());
        let ids = Arc::new(RandomIdGenerator);
        let tracer = Tracer::new(
            "api",
            ids.clone(),
            Sampler::always_on(),
            Arc::clone(&recorder),
            vec![spans.clone()],
        );
        let propagator = Arc::new(
            Propagator::new(PropagatorConfig::default(), ids, Sampler::always_on())
                .with_recorder(Arc::clone(&recorder)),
        );
        let instrumentation =
            RequestInstrumentation::new(propagator, tracer, Arc::clone(&recorder), default_catalog());
        (instrumentation, recorder, spans)
    }

    fn headers(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_remote_parent_adopted_and_echoed() {
        let (instrumentation, _, spans) = setup();
        let inbound = headers(&[("traceparent", TRACEPARENT), ("x-correlation-id", "req-42")]);

        let request = instrumentation.begin("GET", "health_check", "/health", &inbound);
        assert_eq!(
            request.span().trace_id(),
            TraceId::from_hex("4bf92f3577b34da6a3ce929d0e0e4736").unwrap()
        );
        assert_eq!(request.correlation_id().as_str(), "req-42");

        let mut response = HashMap::new();
        request.finish(200, &mut response);

        assert_eq!(
            Extractor::get(&response, "X-Correlation-ID"),
            Some("req-42")
        );
        assert_eq!(
            Extractor::get(&response, TRACE_ID_RESPONSE_HEADER),
            Some("4bf92f3577b34da6a3ce929d0e0e4736")
        );

        let finished = spans.spans();
        assert_eq!(finished.len(), 1);
        assert_eq!(finished[0].kind, SpanKind::Server);
        assert_eq!(finished[0].parent_span_id.unwrap().to_hex(), "00f067aa0ba902b7");
        assert_eq!(
            finished[0].correlation_id.as_ref().map(CorrelationId::as_str),
            Some("req-42")
        );
    }

    #[test]
    fn test_slo_metrics_recorded() {
        let (instrumentation, recorder, _) = setup();

        let request = instrumentation.begin("GET", "health_check", "/health", &headers(&[]));
        request.finish(200, &mut HashMap::new());
        let request = instrumentation.begin("GET", "health_check", "/health", &headers(&[]));
        request.finish(503, &mut HashMap::new());

        let snapshot = recorder.histogram_snapshot(
            names::SLO_REQUEST_LATENCY_SECONDS,
            &[("slo", "api_health")],
        );
        assert_eq!(snapshot.count, 2);
        assert_eq!(
            recorder.counter_total(names::SLO_ERRORS_TOTAL, &[("slo", "api_health")]),
            1
        );
        assert_eq!(
            recorder
                .histogram_snapshot(names::REQUEST_DURATION_SECONDS, &[("endpoint", "health_check")])
                .count,
            2
        );
    }

    #[test]
    fn test_untracked_endpoint_has_no_slo_series() {
        let (instrumentation, recorder, _) = setup();
        assert!(instrumentation.slos_for("metrics_page").is_empty());

        let request = instrumentation.begin("GET", "metrics_page", "/other", &headers(&[]));
        request.finish(200, &mut HashMap::new());

        assert_eq!(
            recorder
                .histogram_snapshot(names::SLO_REQUEST_LATENCY_SECONDS, &[])
                .count,
            0
        );
    }

    #[test]
    fn test_outbound_headers_carry_child_and_correlation() {
        let (instrumentation, _, _) = setup();
        let request = instrumentation.begin(
            "GET",
            "get_external_data",
            "/external",
            &headers(&[("X-Correlation-ID", "req-7")]),
        );

        let client = request.span().child("GET https://api.example.com");
        let mut outbound = HashMap::new();
        request.inject_outbound(&client, &mut outbound);

        let traceparent = Extractor::get(&outbound, "traceparent").unwrap();
        assert!(traceparent.contains(&request.span().trace_id().to_hex()));
        assert!(traceparent.contains(&client.span_id().to_hex()));
        assert_eq!(Extractor::get(&outbound, "x-correlation-id"), Some("req-7"));
    }

    #[test]
    fn test_malformed_header_starts_fresh_trace() {
        let (instrumentation, recorder, _) = setup();
        let request = instrumentation.begin(
            "GET",
            "read_root",
            "/",
            &headers(&[("traceparent", "garbage"), ("baggage", "tenant=acme")]),
        );

        assert!(request.span().trace_id().is_valid());
        assert_eq!(request.span().parent_span_id(), None);
        assert_eq!(request.context().baggage.get("tenant"), Some("acme"));
        assert_eq!(
            recorder.counter_total(names::PROPAGATION_EXTRACT_FAILURES_TOTAL, &[]),
            1
        );
    }

    #[test]
    fn test_dropped_request_counts_against_slo() {
        let (instrumentation, recorder, spans) = setup();

        let request = instrumentation.begin("GET", "health_check", "/health", &headers(&[]));
        std::thread::sleep(Duration::from_millis(150));
        drop(request);

        let latency = recorder.histogram_snapshot(
            names::SLO_REQUEST_LATENCY_SECONDS,
            &[("slo", "api_health")],
        );
        assert_eq!(latency.count, 1);
        assert!(latency.sum >= 0.15);
        assert_eq!(
            recorder
                .histogram_snapshot(names::REQUEST_DURATION_SECONDS, &[("endpoint", "health_check")])
                .count,
            1
        );
        assert_eq!(
            recorder.counter_total(names::SLO_ERRORS_TOTAL, &[("slo", "api_health")]),
            1
        );

        let finished = spans.spans();
        assert_eq!(finished.len(), 1);
        assert_eq!(finished[0].status, SpanStatus::Error);
        assert_eq!(
            finished[0].exception.as_ref().map(|e| e.exception_type.as_str()),
            Some(CANCELLED_EXCEPTION)
        );
    }

    #[test]
    fn test_finished_request_records_once() {
        let (instrumentation, recorder, _) = setup();

        let request = instrumentation.begin("GET", "health_check", "/health", &headers(&[]));
        request.finish(200, &mut HashMap::new());

        assert_eq!(
            recorder
                .histogram_snapshot(names::SLO_REQUEST_LATENCY_SECONDS, &[("slo", "api_health")])
                .count,
            1
        );
        assert_eq!(
            recorder.counter_total(names::SLO_ERRORS_TOTAL, &[("slo", "api_health")]),
            0
        );
    }

    #[test]
    fn test_root_span_ended_early_still_finishes() {
        let (instrumentation, recorder, spans) = setup();

        let mut request = instrumentation.begin(
            "GET",
            "health_check",
            "/health",
            &headers(&[("X-Correlation-ID", "req-9")]),
        );
        request.span_mut().end().unwrap();

        let mut response = HashMap::new();
        request.finish(200, &mut response);

        assert_eq!(Extractor::get(&response, "X-Correlation-ID"), Some("req-9"));
        assert!(Extractor::get(&response, TRACE_ID_RESPONSE_HEADER).is_some());
        assert_eq!(
            recorder.counter_total(names::INVALID_SPAN_TRANSITIONS_TOTAL, &[("operation", "end")]),
            1
        );
        assert_eq!(
            recorder
                .histogram_snapshot(names::SLO_REQUEST_LATENCY_SECONDS, &[("slo", "api_health")])
                .count,
            1
        );
        assert_eq!(spans.spans().len(), 1);
    }
}
