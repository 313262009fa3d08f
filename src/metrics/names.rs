//! Well-known series names, help text and bucket layouts.

pub const REQUEST_DURATION_SECONDS: &str = "request_duration_seconds";
pub const SPAN_DURATION_SECONDS: &str = "span_duration_seconds";
pub const TRACE_OPERATIONS_TOTAL: &str = "trace_operations_total";
pub const TRACE_ERRORS_TOTAL: &str = "trace_errors_total";
pub const DB_OPERATION_DURATION_SECONDS: &str = "db_operation_duration_seconds";
pub const CACHE_OPERATION_DURATION_SECONDS: &str = "cache_operation_duration_seconds";

pub const SLO_REQUEST_LATENCY_SECONDS: &str = "slo_request_latency_seconds";
pub const SLO_ERRORS_TOTAL: &str = "slo_errors_total";
pub const SLO_COMPLIANCE_RATIO: &str = "slo_compliance_ratio";
pub const SLO_ERROR_BUDGET_REMAINING: &str = "slo_error_budget_remaining";
pub const SLO_BURN_RATE: &str = "slo_burn_rate";
pub const SLO_ALERT_TRANSITIONS_TOTAL: &str = "slo_alert_transitions_total";

pub const SPAN_EXPORT_DROPPED_TOTAL: &str = "span_export_dropped_total";
pub const SPAN_EXPORT_FAILURES_TOTAL: &str = "span_export_failures_total";
pub const ALERT_DELIVERY_FAILURES_TOTAL: &str = "alert_delivery_failures_total";
pub const INVALID_SPAN_TRANSITIONS_TOTAL: &str = "invalid_span_transitions_total";
pub const PROPAGATION_EXTRACT_FAILURES_TOTAL: &str = "propagation_extract_failures_total";

/// General-purpose latency layout in seconds.
pub const DEFAULT_LATENCY_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.075, 0.1, 0.25, 0.5, 0.75, 1.0, 2.5, 5.0, 7.5, 10.0,
];

/// Layout for SLO-tracked latency. Every configured SLO threshold is merged
/// in at startup so within-threshold counts read straight off a bucket.
pub const SLO_LATENCY_BUCKETS: &[f64] = &[0.025, 0.05, 0.1, 0.25, 0.3, 0.5, 1.0, 2.5, 5.0];

/// Cache and store calls are expected to be fast.
pub const BACKEND_LATENCY_BUCKETS: &[f64] = &[
    0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0,
];

/// Help text for a known series, or a generic fallback.
pub fn help_for(name: &str) -> &'static str {
    match name {
        REQUEST_DURATION_SECONDS => "Request latency in seconds",
        SPAN_DURATION_SECONDS => "Span duration in seconds",
        TRACE_OPERATIONS_TOTAL => "Total number of operations executed",
        TRACE_ERRORS_TOTAL => "Total number of errors in traces",
        DB_OPERATION_DURATION_SECONDS => "Store operation latency in seconds",
        CACHE_OPERATION_DURATION_SECONDS => "Cache operation latency in seconds",
        SLO_REQUEST_LATENCY_SECONDS => "Request latency for SLO tracking",
        SLO_ERRORS_TOTAL => "Total number of errors for SLO tracking",
        SLO_COMPLIANCE_RATIO => "Compliance with SLO targets",
        SLO_ERROR_BUDGET_REMAINING => "Remaining error budget for the SLO",
        SLO_BURN_RATE => "Error budget consumed over the shortest SLO window",
        SLO_ALERT_TRANSITIONS_TOTAL => "SLO alert state transitions",
        SPAN_EXPORT_DROPPED_TOTAL => "Finished spans dropped because the export queue was full",
        SPAN_EXPORT_FAILURES_TOTAL => "Spans lost because the exporter returned an error",
        ALERT_DELIVERY_FAILURES_TOTAL => "Alert events a publisher failed to deliver",
        INVALID_SPAN_TRANSITIONS_TOTAL => "Operations attempted on spans that had already ended",
        PROPAGATION_EXTRACT_FAILURES_TOTAL => "Malformed inbound trace headers treated as absent",
        _ => "tracewarden metric",
    }
}
