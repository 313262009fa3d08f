//! Error types for tracewarden

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in tracewarden
///
/// Propagation never surfaces errors: malformed inbound headers are treated
/// as absent. Everything here is either a configuration problem, a
/// programming error detected at runtime, or a best-effort delivery failure.
#[derive(Error, Debug)]
#[allow(clippy::enum_variant_names)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration file could not be parsed
    #[error("Failed to parse configuration file: {0}")]
    ConfigParse(#[from] serde_yaml::Error),

    /// Duration parse error
    #[error("Failed to parse duration: {0}")]
    DurationParse(String),

    // =========================================================================
    // SLO Errors
    // =========================================================================
    /// Invalid SLO definition
    #[error("Invalid SLO definition {name}: {reason}")]
    InvalidSlo { name: String, reason: String },

    /// Unknown SLO
    #[error("SLO not found: {0}")]
    SloNotFound(String),

    /// Invalid alert rule
    #[error("Invalid alert rule {rule}: {reason}")]
    InvalidAlertRule { rule: String, reason: String },

    // =========================================================================
    // Span Errors
    // =========================================================================
    /// A span was ended more than once
    #[error("Span {span_id} ({name}) was already ended")]
    SpanAlreadyEnded { span_id: String, name: String },

    // =========================================================================
    // Delivery Errors
    // =========================================================================
    /// Span exporter failed
    #[error("Span export failed: {0}")]
    ExportFailed(String),

    /// Collector endpoint could not be reached
    #[error("Collector connection error: {0}")]
    CollectorConnection(#[source] reqwest::Error),

    /// Alert delivery failed
    #[error("Alert delivery to {target} failed: {reason}")]
    AlertDelivery { target: String, reason: String },

    /// Cache backend error
    #[error("Cache backend error: {0}")]
    Cache(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}
