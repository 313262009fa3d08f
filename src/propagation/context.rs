//! Trace context carried across process boundaries.

use serde::{Deserialize, Serialize};

use super::baggage::Baggage;
use crate::ids::{IdGenerator, Sampler, SpanId, TraceId};

/// Identifiers and baggage for one position in a trace.
///
/// `span_id` is the span this context points at: for an extracted context it
/// is the remote caller's span, for an injected one it is the local span that
/// made the outbound call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceContext {
    pub trace_id: TraceId,
    pub span_id: SpanId,
    pub parent_span_id: Option<SpanId>,
    pub sampled: bool,
    #[serde(default)]
    pub baggage: Baggage,
}

impl TraceContext {
    /// Mint a fresh root context.
    pub fn new_root(ids: &dyn IdGenerator, sampler: &Sampler) -> Self {
        let trace_id = ids.new_trace_id();
        Self {
            trace_id,
            span_id: ids.new_span_id(),
            parent_span_id: None,
            sampled: sampler.should_sample(trace_id),
            baggage: Baggage::new(),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.trace_id.is_valid() && self.span_id.is_valid()
    }

    pub fn with_baggage(mut self, baggage: Baggage) -> Self {
        self.baggage = baggage;
        self
    }

    /// W3C flags byte.
    pub fn flags(&self) -> u8 {
        u8::from(self.sampled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::RandomIdGenerator;

    #[test]
    fn test_new_root_is_valid() {
        let ctx = TraceContext::new_root(&RandomIdGenerator, &Sampler::always_on());

        assert!(ctx.is_valid());
        assert!(ctx.parent_span_id.is_none());
        assert!(ctx.sampled);
        assert!(ctx.baggage.is_empty());
        assert_eq!(ctx.flags(), 1);
    }

    #[test]
    fn test_unsampled_root() {
        let ctx = TraceContext::new_root(&RandomIdGenerator, &Sampler::new(0.0));
        assert!(!ctx.sampled);
        assert_eq!(ctx.flags(), 0);
    }

    #[test]
    fn test_context_serializes_hex_ids() {
        let ctx = TraceContext {
            trace_id: TraceId::new(1),
            span_id: SpanId::new(2),
            parent_span_id: None,
            sampled: true,
            baggage: [("k", "v")].into_iter().collect(),
        };
        let json = serde_json::to_string(&ctx).unwrap();

        assert!(json.contains("\"trace_id\":\"00000000000000000000000000000001\""));
        assert!(json.contains("\"span_id\":\"0000000000000002\""));
        assert!(json.contains("\"baggage\":{\"k\":\"v\"}"));
    }
}
