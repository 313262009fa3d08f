//! Trace-context propagation across service boundaries.
//!
//! # Components
//!
//! - [`carrier`] - Case-insensitive header access over maps and `HeaderMap`
//! - [`context`] - The `TraceContext` value carried between hops
//! - [`formats`] - W3C `traceparent`, B3 single and B3 multi parsers
//! - [`baggage`] - `baggage` header encoding
//! - [`propagator`] - Ordered extraction chain and injection
//!
//! # Precedence
//!
//! ```text
//! traceparent ──▶ b3 ──▶ X-B3-* ──▶ fresh root
//! ```

pub mod baggage;
pub mod carrier;
pub mod context;
pub mod formats;
pub mod propagator;

mod proptest;

pub use baggage::Baggage;
pub use carrier::{Extractor, Injector};
pub use context::TraceContext;
pub use formats::{ParseOutcome, ParsedIds, PropagationFormat};
pub use propagator::{
    Propagator, PropagatorConfig, DEFAULT_CORRELATION_HEADER, TRACE_ID_RESPONSE_HEADER,
};
