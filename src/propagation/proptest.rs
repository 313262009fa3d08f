//! Property-Based Tests for Propagation
//!
//! # Test Properties
//!
//! 1. **Roundtrip**: extract(inject(C)) = C, baggage included
//! 2. **Totality**: arbitrary header values never panic and always yield a
//!    valid context
//! 3. **Hex Stability**: every format writes the same trace id

#![cfg(test)]

use std::collections::HashMap;

use proptest::prelude::*;

use super::baggage::Baggage;
use super::context::TraceContext;
use super::formats::{B3_SINGLE_HEADER, B3_TRACE_ID_HEADER, TRACEPARENT_HEADER};
use super::propagator::Propagator;
use crate::ids::{CorrelationId, SpanId, TraceId};

// =============================================================================
// Property Strategies
// =============================================================================

fn baggage_strategy() -> impl Strategy<Value = Baggage> {
    prop::collection::btree_map("[a-zA-Z][a-zA-Z0-9_.]{0,15}", "[ -~]{0,24}", 0..8)
        .prop_map(|m| m.into_iter().collect())
}

fn context_strategy() -> impl Strategy<Value = TraceContext> {
    (
        1u128..,
        1u64..,
        prop::option::of(1u64..),
        any::<bool>(),
        baggage_strategy(),
    )
        .prop_map(|(trace, span, parent, sampled, baggage)| TraceContext {
            trace_id: TraceId::new(trace),
            span_id: SpanId::new(span),
            parent_span_id: parent.map(SpanId::new),
            sampled,
            baggage,
        })
}

// =============================================================================
// Roundtrip Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn prop_inject_extract_roundtrip(ctx in context_strategy()) {
        let propagator = Propagator::default();
        let mut carrier = HashMap::new();
        propagator.inject(&ctx, &CorrelationId::new("corr"), &mut carrier);

        prop_assert_eq!(propagator.extract(&carrier), ctx);
    }

    #[test]
    fn prop_formats_agree_on_trace_id(ctx in context_strategy()) {
        let propagator = Propagator::default();
        let mut carrier = HashMap::new();
        propagator.inject(&ctx, &CorrelationId::new("corr"), &mut carrier);

        let hex = ctx.trace_id.to_hex();
        prop_assert!(carrier[TRACEPARENT_HEADER].contains(&hex));
        prop_assert!(carrier[B3_SINGLE_HEADER].starts_with(&hex));
        prop_assert_eq!(&carrier[B3_TRACE_ID_HEADER], &hex);
    }
}

// =============================================================================
// Robustness Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(300))]

    #[test]
    fn prop_arbitrary_headers_never_fail(
        traceparent in "\\PC{0,80}",
        b3 in "[0-9a-fA-Fxd-]{0,70}",
        sampled in "\\PC{0,6}",
    ) {
        let propagator = Propagator::default();
        let mut carrier = HashMap::new();
        carrier.insert("traceparent".to_string(), traceparent);
        carrier.insert("b3".to_string(), b3);
        carrier.insert("X-B3-Sampled".to_string(), sampled);

        let ctx = propagator.extract(&carrier);
        prop_assert!(ctx.is_valid());
    }
}
