//! Wire formats for trace identifiers.
//!
//! ```text
//! traceparent: 00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01
//! b3:          4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-1-05e3ac9a4f6e3b90
//! X-B3-TraceId / X-B3-SpanId / X-B3-ParentSpanId / X-B3-Sampled / X-B3-Flags
//! ```
//!
//! Each format parses into a [`ParseOutcome`]; the propagator walks the
//! enabled formats in order and stops at the first `Found`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::carrier::{Extractor, Injector};
use super::context::TraceContext;
use crate::error::Error;
use crate::ids::{SpanId, TraceId};

pub const TRACEPARENT_HEADER: &str = "traceparent";
pub const B3_SINGLE_HEADER: &str = "b3";
pub const B3_TRACE_ID_HEADER: &str = "X-B3-TraceId";
pub const B3_SPAN_ID_HEADER: &str = "X-B3-SpanId";
pub const B3_PARENT_SPAN_ID_HEADER: &str = "X-B3-ParentSpanId";
pub const B3_SAMPLED_HEADER: &str = "X-B3-Sampled";
pub const B3_FLAGS_HEADER: &str = "X-B3-Flags";
pub const BAGGAGE_HEADER: &str = "baggage";

const TRACEPARENT_VERSION: &str = "00";

/// Identifiers recovered from one format. `sampled` is `None` when the
/// format deferred the sampling decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedIds {
    pub trace_id: TraceId,
    pub span_id: SpanId,
    pub parent_span_id: Option<SpanId>,
    pub sampled: Option<bool>,
}

/// Result of one parser attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseOutcome {
    Found(ParsedIds),
    Absent,
    Malformed(&'static str),
}

/// Supported trace-id header formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropagationFormat {
    /// W3C `traceparent`
    TraceContext,
    /// B3 single header
    B3,
    /// B3 multi header
    B3Multi,
}

impl PropagationFormat {
    /// Default extraction order.
    pub const ALL: [PropagationFormat; 3] = [
        PropagationFormat::TraceContext,
        PropagationFormat::B3,
        PropagationFormat::B3Multi,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            PropagationFormat::TraceContext => "tracecontext",
            PropagationFormat::B3 => "b3",
            PropagationFormat::B3Multi => "b3multi",
        }
    }

    pub fn extract<E: Extractor + ?Sized>(&self, carrier: &E) -> ParseOutcome {
        match self {
            PropagationFormat::TraceContext => match carrier.get(TRACEPARENT_HEADER) {
                Some(value) => parse_traceparent(value),
                None => ParseOutcome::Absent,
            },
            PropagationFormat::B3 => match carrier.get(B3_SINGLE_HEADER) {
                Some(value) => parse_b3_single(value),
                None => ParseOutcome::Absent,
            },
            PropagationFormat::B3Multi => parse_b3_multi(carrier),
        }
    }

    pub fn inject<I: Injector + ?Sized>(&self, context: &TraceContext, carrier: &mut I) {
        match self {
            PropagationFormat::TraceContext => {
                carrier.set(TRACEPARENT_HEADER, format_traceparent(context));
            }
            PropagationFormat::B3 => {
                carrier.set(B3_SINGLE_HEADER, format_b3_single(context));
            }
            PropagationFormat::B3Multi => {
                carrier.set(B3_TRACE_ID_HEADER, context.trace_id.to_hex());
                carrier.set(B3_SPAN_ID_HEADER, context.span_id.to_hex());
                if let Some(parent) = context.parent_span_id {
                    carrier.set(B3_PARENT_SPAN_ID_HEADER, parent.to_hex());
                }
                carrier.set(B3_SAMPLED_HEADER, sampled_flag(context.sampled).to_string());
            }
        }
    }
}

impl fmt::Display for PropagationFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PropagationFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tracecontext" | "w3c" => Ok(PropagationFormat::TraceContext),
            "b3" | "b3single" => Ok(PropagationFormat::B3),
            "b3multi" => Ok(PropagationFormat::B3Multi),
            other => Err(Error::Config(format!("unknown propagation format: {}", other))),
        }
    }
}

// =============================================================================
// W3C traceparent
// =============================================================================

fn is_lower_hex(s: &str) -> bool {
    s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

/// Parse a `traceparent` value.
pub fn parse_traceparent(value: &str) -> ParseOutcome {
    let parts: Vec<&str> = value.trim().split('-').collect();
    if parts.len() < 4 {
        return ParseOutcome::Malformed("traceparent has fewer than four fields");
    }

    let version = parts[0];
    if version.len() != 2 || !is_lower_hex(version) {
        return ParseOutcome::Malformed("traceparent version is not two hex digits");
    }
    if version == "ff" {
        return ParseOutcome::Malformed("traceparent version ff is forbidden");
    }
    if version == TRACEPARENT_VERSION && parts.len() != 4 {
        return ParseOutcome::Malformed("traceparent version 00 must have four fields");
    }

    let (trace, span, flags) = (parts[1], parts[2], parts[3]);
    if trace.len() != 32 || !is_lower_hex(trace) {
        return ParseOutcome::Malformed("traceparent trace id is not 32 lowercase hex digits");
    }
    if span.len() != 16 || !is_lower_hex(span) {
        return ParseOutcome::Malformed("traceparent parent id is not 16 lowercase hex digits");
    }
    if flags.len() != 2 || !is_lower_hex(flags) {
        return ParseOutcome::Malformed("traceparent flags are not two hex digits");
    }

    let (Some(trace_id), Some(span_id)) = (TraceId::from_hex(trace), SpanId::from_hex(span)) else {
        return ParseOutcome::Malformed("traceparent carries an all-zero id");
    };
    let flags = u8::from_str_radix(flags, 16).unwrap_or_default();

    ParseOutcome::Found(ParsedIds {
        trace_id,
        span_id,
        parent_span_id: None,
        sampled: Some(flags & 0x01 == 0x01),
    })
}

pub fn format_traceparent(context: &TraceContext) -> String {
    format!(
        "{}-{}-{}-{:02x}",
        TRACEPARENT_VERSION,
        context.trace_id,
        context.span_id,
        context.flags()
    )
}

// =============================================================================
// B3
// =============================================================================

fn sampled_flag(sampled: bool) -> &'static str {
    if sampled {
        "1"
    } else {
        "0"
    }
}

fn parse_b3_trace_id(s: &str) -> Option<TraceId> {
    if s.len() == 16 || s.len() == 32 {
        TraceId::from_hex(&s.to_ascii_lowercase())
    } else {
        None
    }
}

/// Parse a single `b3` header value.
pub fn parse_b3_single(value: &str) -> ParseOutcome {
    let value = value.trim();
    // A bare sampling decision carries no identifiers.
    if matches!(value, "0" | "1" | "d") {
        return ParseOutcome::Absent;
    }

    let parts: Vec<&str> = value.split('-').collect();
    if !(2..=4).contains(&parts.len()) {
        return ParseOutcome::Malformed("b3 header must have two to four fields");
    }

    let Some(trace_id) = parse_b3_trace_id(parts[0]) else {
        return ParseOutcome::Malformed("b3 trace id is not 16 or 32 hex digits");
    };
    let Some(span_id) = SpanId::from_hex(parts[1]) else {
        return ParseOutcome::Malformed("b3 span id is not 16 hex digits");
    };

    let sampled = match parts.get(2).copied() {
        None => None,
        Some("1") | Some("d") => Some(true),
        Some("0") => Some(false),
        Some(_) => return ParseOutcome::Malformed("b3 sampling state is not 0, 1 or d"),
    };

    let parent_span_id = match parts.get(3) {
        None => None,
        Some(parent) => match SpanId::from_hex(parent) {
            Some(id) => Some(id),
            None => return ParseOutcome::Malformed("b3 parent span id is not 16 hex digits"),
        },
    };

    ParseOutcome::Found(ParsedIds {
        trace_id,
        span_id,
        parent_span_id,
        sampled,
    })
}

pub fn format_b3_single(context: &TraceContext) -> String {
    match context.parent_span_id {
        Some(parent) => format!(
            "{}-{}-{}-{}",
            context.trace_id,
            context.span_id,
            sampled_flag(context.sampled),
            parent
        ),
        None => format!(
            "{}-{}-{}",
            context.trace_id,
            context.span_id,
            sampled_flag(context.sampled)
        ),
    }
}

/// Parse the `X-B3-*` header family.
pub fn parse_b3_multi<E: Extractor + ?Sized>(carrier: &E) -> ParseOutcome {
    let Some(trace) = carrier.get(B3_TRACE_ID_HEADER) else {
        return ParseOutcome::Absent;
    };

    let Some(trace_id) = parse_b3_trace_id(trace.trim()) else {
        return ParseOutcome::Malformed("X-B3-TraceId is not 16 or 32 hex digits");
    };
    let Some(span_id) = carrier.get(B3_SPAN_ID_HEADER).and_then(|s| SpanId::from_hex(s.trim()))
    else {
        return ParseOutcome::Malformed("X-B3-SpanId missing or not 16 hex digits");
    };

    let parent_span_id = match carrier.get(B3_PARENT_SPAN_ID_HEADER) {
        None => None,
        Some(parent) => match SpanId::from_hex(parent.trim()) {
            Some(id) => Some(id),
            None => return ParseOutcome::Malformed("X-B3-ParentSpanId is not 16 hex digits"),
        },
    };

    let mut sampled = match carrier.get(B3_SAMPLED_HEADER).map(str::trim) {
        None => None,
        Some("1") | Some("true") => Some(true),
        Some("0") | Some("false") => Some(false),
        Some(_) => return ParseOutcome::Malformed("X-B3-Sampled is not 0, 1, true or false"),
    };

    // Debug flag forces sampling.
    if carrier.get(B3_FLAGS_HEADER).map(str::trim) == Some("1") {
        sampled = Some(true);
    }

    ParseOutcome::Found(ParsedIds {
        trace_id,
        span_id,
        parent_span_id,
        sampled,
    })
}
