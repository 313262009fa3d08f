//! Identifier Generator
//!
//! Mints trace ids, span ids and correlation ids when none are supplied by
//! the caller, and decides head sampling for freshly minted traces.

use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// Trace / Span Identifiers
// =============================================================================

/// 128-bit trace identifier. Zero is never a valid trace id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TraceId(u128);

impl TraceId {
    /// The invalid all-zero id.
    pub const INVALID: TraceId = TraceId(0);

    pub fn new(value: u128) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u128 {
        self.0
    }

    pub fn is_valid(&self) -> bool {
        self.0 != 0
    }

    /// Parse 32 hex digits (or 16, zero-extended to 128 bits).
    pub fn from_hex(s: &str) -> Option<Self> {
        if s.len() != 32 && s.len() != 16 {
            return None;
        }
        if !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        u128::from_str_radix(s, 16)
            .ok()
            .map(TraceId)
            .filter(TraceId::is_valid)
    }

    /// Lowercase 32-digit hex form.
    pub fn to_hex(&self) -> String {
        format!("{:032x}", self.0)
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

impl Serialize for TraceId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for TraceId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        TraceId::from_hex(&s).ok_or_else(|| serde::de::Error::custom("invalid trace id"))
    }
}

/// 64-bit span identifier. Zero is never a valid span id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SpanId(u64);

impl SpanId {
    /// The invalid all-zero id.
    pub const INVALID: SpanId = SpanId(0);

    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }

    pub fn is_valid(&self) -> bool {
        self.0 != 0
    }

    /// Parse exactly 16 hex digits.
    pub fn from_hex(s: &str) -> Option<Self> {
        if s.len() != 16 || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        u64::from_str_radix(s, 16)
            .ok()
            .map(SpanId)
            .filter(SpanId::is_valid)
    }

    /// Lowercase 16-digit hex form.
    pub fn to_hex(&self) -> String {
        format!("{:016x}", self.0)
    }
}

impl fmt::Display for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl Serialize for SpanId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for SpanId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        SpanId::from_hex(&s).ok_or_else(|| serde::de::Error::custom("invalid span id"))
    }
}

// =============================================================================
// Correlation Identifier
// =============================================================================

/// Application-level request identifier, echoed verbatim across hops.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Wrap an inbound value without validation; supplied ids are opaque.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for CorrelationId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for CorrelationId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// =============================================================================
// Generator Port
// =============================================================================

/// Source of fresh identifiers.
pub trait IdGenerator: Send + Sync + fmt::Debug {
    fn new_trace_id(&self) -> TraceId;
    fn new_span_id(&self) -> SpanId;
    fn new_correlation_id(&self) -> CorrelationId;
}

/// Thread-local RNG backed generator. Never returns the zero id.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomIdGenerator;

impl IdGenerator for RandomIdGenerator {
    fn new_trace_id(&self) -> TraceId {
        let mut rng = rand::thread_rng();
        loop {
            let id: u128 = rng.gen();
            if id != 0 {
                return TraceId(id);
            }
        }
    }

    fn new_span_id(&self) -> SpanId {
        let mut rng = rand::thread_rng();
        loop {
            let id: u64 = rng.gen();
            if id != 0 {
                return SpanId(id);
            }
        }
    }

    fn new_correlation_id(&self) -> CorrelationId {
        CorrelationId(Uuid::new_v4().hyphenated().to_string())
    }
}

// =============================================================================
// Sampler
// =============================================================================

/// Trace-id ratio sampler.
///
/// The decision is a pure function of the trace id, so every service that
/// sees the same root trace id with the same ratio agrees on it.
#[derive(Debug, Clone, Copy)]
pub struct Sampler {
    ratio: f64,
    bound: u64,
}

impl Sampler {
    pub fn new(ratio: f64) -> Self {
        let ratio = if ratio.is_nan() { 0.0 } else { ratio.clamp(0.0, 1.0) };
        let bound = if ratio >= 1.0 {
            u64::MAX
        } else {
            (ratio * u64::MAX as f64) as u64
        };
        Self { ratio, bound }
    }

    pub fn always_on() -> Self {
        Self::new(1.0)
    }

    pub fn ratio(&self) -> f64 {
        self.ratio
    }

    pub fn should_sample(&self, trace_id: TraceId) -> bool {
        if self.ratio >= 1.0 {
            return true;
        }
        if self.ratio <= 0.0 {
            return false;
        }
        // Low 64 bits carry the randomness for both 64- and 128-bit ids.
        let low = trace_id.value() as u64;
        low < self.bound
    }
}

impl Default for Sampler {
    fn default() -> Self {
        Self::always_on()
    }
}
