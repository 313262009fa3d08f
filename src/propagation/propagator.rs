//! Correlation/Trace Propagator
//!
//! Extraction walks the enabled formats in order; the first `Found` wins.
//! Malformed input is logged at debug level, counted, and otherwise treated
//! exactly like an absent header. Nothing here returns an error.

use std::sync::Arc;

use tracing::debug;

use super::baggage::Baggage;
use super::carrier::{Extractor, Injector};
use super::context::TraceContext;
use super::formats::{ParseOutcome, ParsedIds, PropagationFormat, BAGGAGE_HEADER};
use crate::ids::{CorrelationId, IdGenerator, RandomIdGenerator, Sampler, SpanId};
use crate::metrics::{names, MetricsRecorder};

/// Default correlation header.
pub const DEFAULT_CORRELATION_HEADER: &str = "X-Correlation-ID";

/// Response header carrying the 32-hex trace id.
pub const TRACE_ID_RESPONSE_HEADER: &str = "X-Trace-ID";

/// Propagator settings
#[derive(Debug, Clone)]
pub struct PropagatorConfig {
    /// Formats in extraction precedence order. Injection writes all of them.
    pub formats: Vec<PropagationFormat>,

    /// Correlation header name
    pub correlation_header: String,

    /// Read and write the `baggage` header
    pub baggage: bool,
}

impl Default for PropagatorConfig {
    fn default() -> Self {
        Self {
            formats: PropagationFormat::ALL.to_vec(),
            correlation_header: DEFAULT_CORRELATION_HEADER.to_string(),
            baggage: true,
        }
    }
}

/// Reads and writes trace context and correlation ids on carriers.
#[derive(Debug, Clone)]
pub struct Propagator {
    config: PropagatorConfig,
    ids: Arc<dyn IdGenerator>,
    sampler: Sampler,
    recorder: Option<Arc<MetricsRecorder>>,
}

impl Default for Propagator {
    fn default() -> Self {
        Self::new(
            PropagatorConfig::default(),
            Arc::new(RandomIdGenerator),
            Sampler::always_on(),
        )
    }
}

impl Propagator {
    pub fn new(config: PropagatorConfig, ids: Arc<dyn IdGenerator>, sampler: Sampler) -> Self {
        Self {
            config,
            ids,
            sampler,
            recorder: None,
        }
    }

    /// Count malformed headers in `propagation_extract_failures_total`.
    pub fn with_recorder(mut self, recorder: Arc<MetricsRecorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub fn config(&self) -> &PropagatorConfig {
        &self.config
    }

    pub fn sampler(&self) -> &Sampler {
        &self.sampler
    }

    pub fn id_generator(&self) -> &Arc<dyn IdGenerator> {
        &self.ids
    }

    // =========================================================================
    // Extraction
    // =========================================================================

    /// Extract a remote caller's context, or `None` when no enabled format
    /// yields a well-formed one.
    pub fn extract_remote<E: Extractor + ?Sized>(&self, carrier: &E) -> Option<TraceContext> {
        let (format, mut ids) = self.first_match(carrier)?;

        if format == PropagationFormat::TraceContext && ids.parent_span_id.is_none() {
            ids.parent_span_id = self.b3_parent_for(carrier, &ids);
        }

        let sampled = ids
            .sampled
            .unwrap_or_else(|| self.sampler.should_sample(ids.trace_id));

        debug!(
            format = %format,
            trace_id = %ids.trace_id,
            span_id = %ids.span_id,
            sampled,
            "Extracted remote trace context"
        );

        Some(TraceContext {
            trace_id: ids.trace_id,
            span_id: ids.span_id,
            parent_span_id: ids.parent_span_id,
            sampled,
            baggage: self.extract_baggage(carrier),
        })
    }

    /// Extract a context, minting a fresh root when nothing usable is found.
    /// Inbound baggage is kept on the fresh root.
    pub fn extract<E: Extractor + ?Sized>(&self, carrier: &E) -> TraceContext {
        match self.extract_remote(carrier) {
            Some(context) => context,
            None => TraceContext::new_root(self.ids.as_ref(), &self.sampler)
                .with_baggage(self.extract_baggage(carrier)),
        }
    }

    pub fn extract_baggage<E: Extractor + ?Sized>(&self, carrier: &E) -> Baggage {
        if !self.config.baggage {
            return Baggage::new();
        }
        carrier
            .get(BAGGAGE_HEADER)
            .map(Baggage::parse)
            .unwrap_or_default()
    }

    /// Inbound correlation id, echoed verbatim; blank or absent ids are
    /// replaced by a generated one.
    pub fn extract_correlation_id<E: Extractor + ?Sized>(&self, carrier: &E) -> CorrelationId {
        match carrier.get(&self.config.correlation_header) {
            Some(value) if !value.trim().is_empty() => CorrelationId::new(value),
            _ => self.ids.new_correlation_id(),
        }
    }

    fn first_match<E: Extractor + ?Sized>(
        &self,
        carrier: &E,
    ) -> Option<(PropagationFormat, ParsedIds)> {
        for format in &self.config.formats {
            match format.extract(carrier) {
                ParseOutcome::Found(ids) => return Some((*format, ids)),
                ParseOutcome::Absent => {}
                ParseOutcome::Malformed(reason) => self.record_malformed(*format, reason),
            }
        }
        None
    }

    /// `traceparent` has no parent field; recover one from a B3 header that
    /// names the same span.
    fn b3_parent_for<E: Extractor + ?Sized>(
        &self,
        carrier: &E,
        found: &ParsedIds,
    ) -> Option<SpanId> {
        self.config
            .formats
            .iter()
            .filter(|f| **f != PropagationFormat::TraceContext)
            .find_map(|format| match format.extract(carrier) {
                ParseOutcome::Found(b3) if b3.trace_id == found.trace_id && b3.span_id == found.span_id => {
                    b3.parent_span_id
                }
                _ => None,
            })
    }

    fn record_malformed(&self, format: PropagationFormat, reason: &'static str) {
        debug!(format = %format, reason, "Ignoring malformed trace header");
        if let Some(recorder) = &self.recorder {
            recorder.increment_counter(
                names::PROPAGATION_EXTRACT_FAILURES_TOTAL,
                &[("format", format.name())],
            );
        }
    }

    // =========================================================================
    // Injection
    // =========================================================================

    /// Write every enabled trace format, baggage and the correlation header.
    pub fn inject<I: Injector + ?Sized>(
        &self,
        context: &TraceContext,
        correlation_id: &CorrelationId,
        carrier: &mut I,
    ) {
        for format in &self.config.formats {
            format.inject(context, carrier);
        }
        if self.config.baggage {
            if let Some(header) = context.baggage.to_header() {
                carrier.set(BAGGAGE_HEADER, header);
            }
        }
        carrier.set(&self.config.correlation_header, correlation_id.to_string());
    }

    /// Response headers: the correlation id and `X-Trace-ID`.
    pub fn inject_response<I: Injector + ?Sized>(
        &self,
        context: &TraceContext,
        correlation_id: &CorrelationId,
        carrier: &mut I,
    ) {
        carrier.set(&self.config.correlation_header, correlation_id.to_string());
        carrier.set(TRACE_ID_RESPONSE_HEADER, context.trace_id.to_hex());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::TraceId;
    use std::collections::HashMap;

    const TRACE: &str = "4bf92f3577b34da6a3ce929d0e0e4736";
    const SPAN: &str = "00f067aa0ba902b7";

    fn carrier(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn sample_context() -> TraceContext {
        TraceContext {
            trace_id: TraceId::from_hex(TRACE).unwrap(),
            span_id: SpanId::from_hex(SPAN).unwrap(),
            parent_span_id: SpanId::from_hex("05e3ac9a4f6e3b90"),
            sampled: true,
            baggage: [("userId", "alice"), ("flag", "a b,c")].into_iter().collect(),
        }
    }

    // =========================================================================
    // Precedence Tests
    // =========================================================================

    #[test]
    fn test_w3c_wins_over_b3() {
        let propagator = Propagator::default();
        let headers = carrier(&[
            ("traceparent", format!("00-{TRACE}-{SPAN}-01").as_str()),
            ("b3", "a3ce929d0e0e4736-1111111111111111-0"),
        ]);

        let ctx = propagator.extract(&headers);
        assert_eq!(ctx.trace_id.to_hex(), TRACE);
        assert!(ctx.sampled);
    }

    #[test]
    fn test_malformed_w3c_falls_through_to_b3_multi() {
        let recorder = Arc::new(MetricsRecorder::new());
        let propagator = Propagator::default().with_recorder(Arc::clone(&recorder));
        let headers = carrier(&[
            ("traceparent", "00-shortid-00f067aa0ba902b7-01"),
            ("x-b3-traceid", TRACE),
            ("x-b3-spanid", SPAN),
        ]);

        let ctx = propagator.extract(&headers);
        assert_eq!(ctx.trace_id.to_hex(), TRACE);
        assert_eq!(
            recorder.counter_total(
                names::PROPAGATION_EXTRACT_FAILURES_TOTAL,
                &[("format", "tracecontext")]
            ),
            1
        );
    }

    #[test]
    fn test_malformed_only_yields_fresh_root() {
        let propagator = Propagator::default();
        let headers = carrier(&[("traceparent", format!("00-{}-{SPAN}-01", &TRACE[..31]).as_str())]);

        assert!(propagator.extract_remote(&headers).is_none());
        let ctx = propagator.extract(&headers);
        assert!(ctx.is_valid());
        assert_ne!(ctx.trace_id.to_hex(), TRACE);
        assert!(ctx.parent_span_id.is_none());
    }

    #[test]
    fn test_disabled_format_is_ignored() {
        let config = PropagatorConfig {
            formats: vec![PropagationFormat::TraceContext],
            ..Default::default()
        };
        let propagator = Propagator::new(config, Arc::new(RandomIdGenerator), Sampler::always_on());
        let headers = carrier(&[("b3", format!("{TRACE}-{SPAN}-1").as_str())]);

        assert!(propagator.extract_remote(&headers).is_none());
    }

    #[test]
    fn test_deferred_sampling_uses_sampler() {
        let propagator = Propagator::new(
            PropagatorConfig::default(),
            Arc::new(RandomIdGenerator),
            Sampler::new(0.0),
        );
        let headers = carrier(&[("b3", format!("{TRACE}-{SPAN}").as_str())]);

        assert!(!propagator.extract(&headers).sampled);
    }

    #[test]
    fn test_baggage_kept_on_fresh_root() {
        let propagator = Propagator::default();
        let headers = carrier(&[("Baggage", "tenant=acme")]);

        let ctx = propagator.extract(&headers);
        assert_eq!(ctx.baggage.get("tenant"), Some("acme"));
    }

    // =========================================================================
    // Correlation Id Tests
    // =========================================================================

    #[test]
    fn test_correlation_id_echoed_verbatim() {
        let propagator = Propagator::default();
        let headers = carrier(&[("x-correlation-id", " req-42 ")]);

        assert_eq!(propagator.extract_correlation_id(&headers).as_str(), " req-42 ");
    }

    #[test]
    fn test_blank_correlation_id_is_generated() {
        let propagator = Propagator::default();
        for headers in [carrier(&[]), carrier(&[("X-Correlation-ID", "   ")])] {
            let id = propagator.extract_correlation_id(&headers);
            assert_eq!(id.as_str().len(), 36);
        }
    }

    #[test]
    fn test_custom_correlation_header() {
        let config = PropagatorConfig {
            correlation_header: "X-Request-ID".to_string(),
            ..Default::default()
        };
        let propagator = Propagator::new(config, Arc::new(RandomIdGenerator), Sampler::always_on());
        let headers = carrier(&[("x-request-id", "abc")]);

        assert_eq!(propagator.extract_correlation_id(&headers).as_str(), "abc");
    }

    // =========================================================================
    // Injection Tests
    // =========================================================================

    #[test]
    fn test_inject_writes_canonical_headers() {
        let propagator = Propagator::default();
        let ctx = sample_context();
        let mut out = HashMap::new();
        propagator.inject(&ctx, &CorrelationId::new("corr-1"), &mut out);

        assert_eq!(out["traceparent"], format!("00-{TRACE}-{SPAN}-01"));
        assert_eq!(out["b3"], format!("{TRACE}-{SPAN}-1-05e3ac9a4f6e3b90"));
        assert_eq!(out["X-B3-TraceId"], TRACE);
        assert_eq!(out["X-B3-SpanId"], SPAN);
        assert_eq!(out["X-B3-ParentSpanId"], "05e3ac9a4f6e3b90");
        assert_eq!(out["X-B3-Sampled"], "1");
        assert_eq!(out["X-Correlation-ID"], "corr-1");
        assert!(out.contains_key("baggage"));
    }

    #[test]
    fn test_roundtrip_preserves_parent_and_baggage() {
        let propagator = Propagator::default();
        let ctx = sample_context();
        let mut out = HashMap::new();
        propagator.inject(&ctx, &CorrelationId::new("c"), &mut out);

        assert_eq!(propagator.extract(&out), ctx);
    }

    #[test]
    fn test_inject_replaces_existing_case_variants() {
        let propagator = Propagator::default();
        let mut out = carrier(&[("TRACEPARENT", "stale"), ("x-correlation-id", "old")]);
        propagator.inject(&sample_context(), &CorrelationId::new("new"), &mut out);

        assert!(!out.contains_key("TRACEPARENT"));
        assert!(!out.contains_key("x-correlation-id"));
        assert_eq!(out["X-Correlation-ID"], "new");
    }

    #[test]
    fn test_inject_response_headers() {
        let propagator = Propagator::default();
        let mut out = HashMap::new();
        propagator.inject_response(&sample_context(), &CorrelationId::new("c"), &mut out);

        assert_eq!(out["X-Trace-ID"], TRACE);
        assert_eq!(out["X-Correlation-ID"], "c");
    }
}
