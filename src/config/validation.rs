//! Configuration validation.

use hyper::header::HeaderName;

use super::{ExportTarget, SloFile, TelemetryConfig};
use crate::error::{Error, Result};
use crate::slo::alert::validate_rules;
use crate::slo::definition::validate_all;

pub fn validate_telemetry(config: &TelemetryConfig) -> Result<()> {
    if config.service_name.trim().is_empty() {
        return Err(Error::Config("service name must not be empty".to_string()));
    }
    if !(0.0..=1.0).contains(&config.sampling_ratio) {
        return Err(Error::Config(format!(
            "sampling ratio must be between 0 and 1, got {}",
            config.sampling_ratio
        )));
    }
    if config.propagation.formats.is_empty() {
        return Err(Error::Config(
            "at least one propagation format must be enabled".to_string(),
        ));
    }
    if HeaderName::from_bytes(config.propagation.correlation_header.as_bytes()).is_err() {
        return Err(Error::Config(format!(
            "invalid correlation header name: {}",
            config.propagation.correlation_header
        )));
    }
    if config.batch.max_batch_size == 0 || config.batch.queue_capacity == 0 {
        return Err(Error::Config(
            "span export queue and batch size must be positive".to_string(),
        ));
    }
    if config.batch.flush_interval.is_zero() {
        return Err(Error::Config("span flush interval must be positive".to_string()));
    }
    if let ExportTarget::Http { endpoint, .. } = &config.export {
        validate_url("span collector endpoint", endpoint)?;
    }
    if let Some(webhook) = &config.alert_webhook {
        validate_url("alert webhook", webhook)?;
    }
    Ok(())
}

pub fn validate_slo_file(file: &mut SloFile) -> Result<()> {
    validate_all(&mut file.slos)?;
    if let Some(rules) = &file.alert_rules {
        validate_rules(rules)?;
    }
    if let Some(interval) = file.evaluation_interval {
        if interval.is_zero() {
            return Err(Error::Config("evaluation interval must be positive".to_string()));
        }
    }
    Ok(())
}

fn validate_url(what: &str, url: &str) -> Result<()> {
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(())
    } else {
        Err(Error::Config(format!(
            "{} must be an http(s) URL, got {}",
            what, url
        )))
    }
}
