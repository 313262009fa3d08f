//! Span Tracer
//!
//! Spans are created from an explicit parent context, mutated only by the
//! task that owns them, and handed to every registered processor when they
//! end.
//!
//! ```text
//! Tracer::start_span ──▶ Span ──end()──▶ FinishedSpan ──▶ MetricsSpanProcessor
//!                                                     └──▶ BatchExportProcessor (sampled)
//! ```

pub mod export;
pub mod processor;
pub mod scope;
pub mod span;

pub use export::{BatchConfig, BatchExportProcessor};
pub use processor::{InMemorySpanProcessor, MetricsSpanProcessor, SpanProcessor};
pub use scope::{in_request_scope, RequestScope};
pub use span::{
    AttributeValue, FinishedSpan, Span, SpanBuilder, SpanException, SpanKind, SpanStatus, Tracer,
    CANCELLED_EXCEPTION,
};
