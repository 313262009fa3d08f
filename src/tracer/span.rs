//! Span lifecycle: `SpanBuilder` (unstarted) → `Span` (active) → `FinishedSpan`.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use tracing::{debug, error, warn};

use super::processor::SpanProcessor;
use super::scope;
use crate::error::{Error, Result};
use crate::ids::{CorrelationId, IdGenerator, Sampler, SpanId, TraceId};
use crate::metrics::{names, MetricsRecorder};
use crate::propagation::{Baggage, TraceContext};

/// Exception type recorded on spans dropped while still active.
pub const CANCELLED_EXCEPTION: &str = "Cancelled";

// =============================================================================
// Span Values
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SpanStatus {
    Unset,
    Ok,
    Error,
}

impl SpanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpanStatus::Unset => "unset",
            SpanStatus::Ok => "ok",
            SpanStatus::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SpanKind {
    #[default]
    Internal,
    Server,
    Client,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AttributeValue {
    String(String),
    Bool(bool),
    Int(i64),
    Float(f64),
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::String(s) => f.write_str(s),
            AttributeValue::Bool(b) => write!(f, "{}", b),
            AttributeValue::Int(i) => write!(f, "{}", i),
            AttributeValue::Float(v) => write!(f, "{}", v),
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(v: &str) -> Self {
        AttributeValue::String(v.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(v: String) -> Self {
        AttributeValue::String(v)
    }
}

impl From<bool> for AttributeValue {
    fn from(v: bool) -> Self {
        AttributeValue::Bool(v)
    }
}

impl From<i64> for AttributeValue {
    fn from(v: i64) -> Self {
        AttributeValue::Int(v)
    }
}

impl From<u16> for AttributeValue {
    fn from(v: u16) -> Self {
        AttributeValue::Int(i64::from(v))
    }
}

impl From<usize> for AttributeValue {
    fn from(v: usize) -> Self {
        AttributeValue::Int(i64::try_from(v).unwrap_or(i64::MAX))
    }
}

impl From<f64> for AttributeValue {
    fn from(v: f64) -> Self {
        AttributeValue::Float(v)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SpanException {
    #[serde(rename = "type")]
    pub exception_type: String,
    pub message: String,
}

fn serialize_secs<S: Serializer>(d: &Duration, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64())
}

/// A span that has ended. Immutable.
#[derive(Debug, Clone, Serialize)]
pub struct FinishedSpan {
    pub trace_id: TraceId,
    pub span_id: SpanId,
    pub parent_span_id: Option<SpanId>,
    pub name: String,
    pub service: String,
    pub kind: SpanKind,
    pub attributes: BTreeMap<String, AttributeValue>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[serde(rename = "duration_seconds", serialize_with = "serialize_secs")]
    pub duration: Duration,
    pub status: SpanStatus,
    pub exception: Option<SpanException>,
    pub sampled: bool,
    pub correlation_id: Option<CorrelationId>,
}

// =============================================================================
// Tracer
// =============================================================================

struct TracerInner {
    service: String,
    ids: Arc<dyn IdGenerator>,
    sampler: Sampler,
    recorder: Arc<MetricsRecorder>,
    processors: Vec<Arc<dyn SpanProcessor>>,
}

/// Creates spans and hands finished ones to the registered processors.
///
/// There is no ambient current span. Parents are passed explicitly, so
/// concurrent requests never see each other's spans.
#[derive(Clone)]
pub struct Tracer {
    inner: Arc<TracerInner>,
}

impl fmt::Debug for Tracer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tracer")
            .field("service", &self.inner.service)
            .field("sampler", &self.inner.sampler)
            .field("processors", &self.inner.processors.len())
            .finish()
    }
}

impl Tracer {
    pub fn new(
        service: impl Into<String>,
        ids: Arc<dyn IdGenerator>,
        sampler: Sampler,
        recorder: Arc<MetricsRecorder>,
        processors: Vec<Arc<dyn SpanProcessor>>,
    ) -> Self {
        Self {
            inner: Arc::new(TracerInner {
                service: service.into(),
                ids,
                sampler,
                recorder,
                processors,
            }),
        }
    }

    pub fn service(&self) -> &str {
        &self.inner.service
    }

    pub fn recorder(&self) -> &Arc<MetricsRecorder> {
        &self.inner.recorder
    }

    pub fn span_builder(&self, name: impl Into<String>) -> SpanBuilder {
        SpanBuilder {
            tracer: self.clone(),
            name: name.into(),
            kind: SpanKind::Internal,
            attributes: BTreeMap::new(),
            parent: None,
            correlation_id: None,
            anchor: None,
        }
    }

    /// Start a span, as a child of `parent` when given, otherwise as the
    /// root of a new trace.
    pub fn start_span(&self, name: impl Into<String>, parent: Option<&TraceContext>) -> Span {
        let mut builder = self.span_builder(name);
        if let Some(parent) = parent {
            builder = builder.with_parent(parent);
        }
        builder.start()
    }

    fn finish(&self, span: FinishedSpan) {
        debug!(
            trace_id = %span.trace_id,
            span_id = %span.span_id,
            name = %span.name,
            status = span.status.as_str(),
            duration_ms = span.duration.as_secs_f64() * 1000.0,
            correlation_id = ?span.correlation_id.as_ref().map(CorrelationId::as_str),
            "Span ended"
        );
        for processor in &self.inner.processors {
            processor.on_end(&span);
        }
    }

    fn invalid_transition(&self, span_id: SpanId, name: &str, operation: &'static str) {
        self.inner.recorder.increment_counter(
            names::INVALID_SPAN_TRANSITIONS_TOTAL,
            &[("operation", operation)],
        );
        if operation == "end" {
            error!(span_id = %span_id, name = %name, "Span ended twice");
        } else {
            warn!(span_id = %span_id, name = %name, operation, "Ignoring operation on ended span");
        }
    }
}

// =============================================================================
// Span Builder
// =============================================================================

/// An unstarted span. Attributes and kind may be set before `start`.
#[derive(Debug)]
pub struct SpanBuilder {
    tracer: Tracer,
    name: String,
    kind: SpanKind,
    attributes: BTreeMap<String, AttributeValue>,
    parent: Option<TraceContext>,
    correlation_id: Option<CorrelationId>,
    /// Parent's wall start and monotonic anchor, for local children.
    anchor: Option<(DateTime<Utc>, Instant)>,
}

impl SpanBuilder {
    pub fn with_kind(mut self, kind: SpanKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn with_parent(mut self, parent: &TraceContext) -> Self {
        self.parent = Some(parent.clone());
        self
    }

    /// Tag the span with a correlation id. Defaults to the id of the
    /// current request scope.
    pub fn with_correlation_id(mut self, correlation_id: CorrelationId) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    pub fn start(self) -> Span {
        let inner = &self.tracer.inner;

        let (trace_id, parent_span_id, sampled, baggage) = match self.parent {
            Some(parent) => (
                parent.trace_id,
                Some(parent.span_id),
                parent.sampled,
                parent.baggage,
            ),
            None => {
                let trace_id = inner.ids.new_trace_id();
                (trace_id, None, inner.sampler.should_sample(trace_id), Baggage::new())
            }
        };

        let start_time = match self.anchor {
            Some((parent_start, parent_instant)) => {
                parent_start + to_chrono(parent_instant.elapsed())
            }
            None => Utc::now(),
        };

        Span {
            tracer: self.tracer.clone(),
            trace_id,
            span_id: inner.ids.new_span_id(),
            parent_span_id,
            sampled,
            name: self.name,
            start_time,
            start_instant: Instant::now(),
            correlation_id: self
                .correlation_id
                .or_else(scope::current_correlation_id),
            state: SpanState::Active(Box::new(ActiveData {
                kind: self.kind,
                attributes: self.attributes,
                baggage,
                status: SpanStatus::Unset,
                exception: None,
            })),
        }
    }
}

fn to_chrono(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or_else(|_| chrono::Duration::zero())
}

// =============================================================================
// Active Span
// =============================================================================

#[derive(Debug)]
struct ActiveData {
    kind: SpanKind,
    attributes: BTreeMap<String, AttributeValue>,
    baggage: Baggage,
    status: SpanStatus,
    exception: Option<SpanException>,
}

#[derive(Debug)]
enum SpanState {
    Active(Box<ActiveData>),
    Ended { baggage: Baggage },
}

/// A started span, owned by exactly one unit of work.
///
/// Mutation requires `&mut self`. Dropping a span that is still active ends
/// it with status `error` and a `Cancelled` exception.
#[derive(Debug)]
pub struct Span {
    tracer: Tracer,
    trace_id: TraceId,
    span_id: SpanId,
    parent_span_id: Option<SpanId>,
    sampled: bool,
    name: String,
    start_time: DateTime<Utc>,
    start_instant: Instant,
    correlation_id: Option<CorrelationId>,
    state: SpanState,
}

impl Span {
    pub fn trace_id(&self) -> TraceId {
        self.trace_id
    }

    pub fn span_id(&self) -> SpanId {
        self.span_id
    }

    pub fn parent_span_id(&self) -> Option<SpanId> {
        self.parent_span_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_sampled(&self) -> bool {
        self.sampled
    }

    pub fn is_ended(&self) -> bool {
        matches!(self.state, SpanState::Ended { .. })
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    pub fn correlation_id(&self) -> Option<&CorrelationId> {
        self.correlation_id.as_ref()
    }

    fn baggage(&self) -> &Baggage {
        match &self.state {
            SpanState::Active(data) => &data.baggage,
            SpanState::Ended { baggage } => baggage,
        }
    }

    /// Context naming this span, for injection into outbound carriers.
    pub fn context(&self) -> TraceContext {
        TraceContext {
            trace_id: self.trace_id,
            span_id: self.span_id,
            parent_span_id: self.parent_span_id,
            sampled: self.sampled,
            baggage: self.baggage().clone(),
        }
    }

    pub fn attribute(&self, key: &str) -> Option<&AttributeValue> {
        match &self.state {
            SpanState::Active(data) => data.attributes.get(key),
            SpanState::Ended { .. } => None,
        }
    }

    fn active_mut(&mut self, operation: &'static str) -> Option<&mut ActiveData> {
        if self.is_ended() {
            self.tracer.invalid_transition(self.span_id, &self.name, operation);
            return None;
        }
        match &mut self.state {
            SpanState::Active(data) => Some(data.as_mut()),
            SpanState::Ended { .. } => None,
        }
    }

    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl Into<AttributeValue>) {
        if let Some(data) = self.active_mut("set_attribute") {
            data.attributes.insert(key.into(), value.into());
        }
    }

    /// Record an exception. The span ends with status `error` unless a
    /// status was set explicitly.
    pub fn record_exception(&mut self, exception_type: impl Into<String>, message: impl Into<String>) {
        if let Some(data) = self.active_mut("record_exception") {
            data.exception = Some(SpanException {
                exception_type: exception_type.into(),
                message: message.into(),
            });
        }
    }

    /// Record an error value as the span's exception.
    pub fn record_error<E: std::error::Error>(&mut self, err: &E) {
        let type_name = std::any::type_name::<E>();
        let short = type_name.rsplit("::").next().unwrap_or(type_name);
        self.record_exception(short, err.to_string());
    }

    pub fn set_status(&mut self, status: SpanStatus) {
        if let Some(data) = self.active_mut("set_status") {
            data.status = status;
        }
    }

    pub fn set_baggage_item(&mut self, key: impl Into<String>, value: impl Into<String>) {
        if let Some(data) = self.active_mut("set_baggage_item") {
            data.baggage.insert(key, value);
        }
    }

    pub fn clear_baggage(&mut self) {
        if let Some(data) = self.active_mut("clear_baggage") {
            data.baggage.clear();
        }
    }

    /// Start a local child span. Its start is derived from this span's
    /// monotonic anchor, so it never precedes this span's start.
    pub fn child(&self, name: impl Into<String>) -> Span {
        self.child_builder(name).start()
    }

    pub fn child_builder(&self, name: impl Into<String>) -> SpanBuilder {
        let mut builder = self.tracer.span_builder(name).with_parent(&self.context());
        builder.anchor = Some((self.start_time, self.start_instant));
        builder.correlation_id = self.correlation_id.clone();
        builder
    }

    /// End the span and return its duration.
    ///
    /// A second call is an error: it is logged, counted, and reported as
    /// [`Error::SpanAlreadyEnded`].
    pub fn end(&mut self) -> Result<Duration> {
        if self.is_ended() {
            self.tracer.invalid_transition(self.span_id, &self.name, "end");
            return Err(Error::SpanAlreadyEnded {
                span_id: self.span_id.to_hex(),
                name: self.name.clone(),
            });
        }
        Ok(self.finish(None))
    }

    fn finish(&mut self, cancelled: Option<SpanException>) -> Duration {
        let duration = self.start_instant.elapsed();
        let end_time = self.start_time + to_chrono(duration);

        let state = std::mem::replace(
            &mut self.state,
            SpanState::Ended {
                baggage: Baggage::new(),
            },
        );
        let SpanState::Active(data) = state else {
            return duration;
        };
        let ActiveData {
            kind,
            attributes,
            baggage,
            status,
            exception,
        } = *data;

        let (status, exception) = match cancelled {
            Some(cancel) => (SpanStatus::Error, Some(cancel)),
            None => {
                let status = match status {
                    SpanStatus::Unset if exception.is_some() => SpanStatus::Error,
                    SpanStatus::Unset => SpanStatus::Ok,
                    explicit => explicit,
                };
                (status, exception)
            }
        };

        self.state = SpanState::Ended {
            baggage: baggage.clone(),
        };

        self.tracer.finish(FinishedSpan {
            trace_id: self.trace_id,
            span_id: self.span_id,
            parent_span_id: self.parent_span_id,
            name: self.name.clone(),
            service: self.tracer.service().to_string(),
            kind,
            attributes,
            start_time: self.start_time,
            end_time,
            duration,
            status,
            exception,
            sampled: self.sampled,
            correlation_id: self.correlation_id.clone(),
        });

        duration
    }
}

impl Drop for Span {
    fn drop(&mut self) {
        if self.is_ended() {
            return;
        }
        warn!(
            span_id = %self.span_id,
            name = %self.name,
            "Span dropped while active, closing as cancelled"
        );
        self.finish(Some(SpanException {
            exception_type: CANCELLED_EXCEPTION.to_string(),
            message: "span dropped before end".to_string(),
        }));
    }
}
