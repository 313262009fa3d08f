//! Alert Publisher Adapters
//!
//! Implements the `AlertPublisher` port with various backends.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, info, warn};

use crate::domain::events::{AlertEvent, AlertState};
use crate::domain::ports::AlertPublisher;
use crate::error::{Error, Result};

/// Logging-based alert publisher.
///
/// Firing alerts are logged at warn level, other transitions at info level.
#[derive(Debug, Clone, Default)]
pub struct LoggingAlertPublisher;

impl LoggingAlertPublisher {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl AlertPublisher for LoggingAlertPublisher {
    fn name(&self) -> &str {
        "logging"
    }

    async fn publish(&self, event: AlertEvent) -> Result<()> {
        let json = serde_json::to_string(&event).unwrap_or_else(|_| format!("{:?}", event));

        if event.state == AlertState::Firing {
            warn!(rule = %event.rule_name, slo = %event.slo_name, event = %json, "SLO alert");
        } else {
            info!(rule = %event.rule_name, slo = %event.slo_name, event = %json, "SLO alert");
        }

        Ok(())
    }
}

/// In-memory alert collector for testing.
#[derive(Debug, Default)]
pub struct InMemoryAlertPublisher {
    events: parking_lot::RwLock<Vec<AlertEvent>>,
}

impl InMemoryAlertPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all collected events.
    pub fn events(&self) -> Vec<AlertEvent> {
        self.events.read().clone()
    }

    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    pub fn clear(&self) {
        self.events.write().clear();
    }

    /// Events for one rule, in delivery order.
    pub fn events_for_rule(&self, rule_name: &str) -> Vec<AlertEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.rule_name == rule_name)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl AlertPublisher for InMemoryAlertPublisher {
    fn name(&self) -> &str {
        "memory"
    }

    async fn publish(&self, event: AlertEvent) -> Result<()> {
        self.events.write().push(event);
        Ok(())
    }
}

/// Posts each alert event as JSON to a webhook endpoint.
#[derive(Debug, Clone)]
pub struct WebhookAlertPublisher {
    url: String,
    client: Client,
}

impl WebhookAlertPublisher {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            url: url.into(),
            client,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl AlertPublisher for WebhookAlertPublisher {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn publish(&self, event: AlertEvent) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .json(&event)
            .send()
            .await
            .map_err(|e| Error::AlertDelivery {
                target: self.url.clone(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::AlertDelivery {
                target: self.url.clone(),
                reason: format!("webhook returned {}", status),
            });
        }

        debug!(url = %self.url, rule = %event.rule_name, state = %event.state, "Alert delivered");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::events::Severity;
    use assert_matches::assert_matches;
    use chrono::Utc;

    fn event(rule: &str, state: AlertState) -> AlertEvent {
        AlertEvent {
            rule_name: rule.to_string(),
            severity: Severity::Warning,
            state,
            previous_state: AlertState::Normal,
            summary: "summary".to_string(),
            description: "description".to_string(),
            window: "5m".to_string(),
            slo_name: "api_health".to_string(),
            value: Some(0.9),
            threshold: 0.95,
            reference_link: "https://runbooks.example/slo#SLOBreached".to_string(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_logging_publisher() {
        let publisher = LoggingAlertPublisher::new();

        tokio_test::block_on(async {
            publisher.publish(event("SLOBreached", AlertState::Firing)).await.unwrap();
            publisher.publish(event("SLOBreached", AlertState::Resolved)).await.unwrap();
        });
    }

    #[tokio::test]
    async fn test_in_memory_collector() {
        let collector = InMemoryAlertPublisher::new();
        assert!(collector.is_empty());

        for e in [
            event("SLOBreached", AlertState::Pending),
            event("ErrorBudgetCritical", AlertState::Pending),
            event("SLOBreached", AlertState::Firing),
        ] {
            collector.publish(e).await.unwrap();
        }

        assert_eq!(collector.len(), 3);
        let breached = collector.events_for_rule("SLOBreached");
        assert_eq!(breached.len(), 2);
        assert_eq!(breached[1].state, AlertState::Firing);

        collector.clear();
        assert!(collector.is_empty());
    }

    #[tokio::test]
    async fn test_webhook_unreachable_is_delivery_error() {
        let publisher =
            WebhookAlertPublisher::new("http://127.0.0.1:9/alerts", Duration::from_millis(200))
                .unwrap();

        let result = publisher.publish(event("SLOBreached", AlertState::Firing)).await;
        assert_matches!(result, Err(Error::AlertDelivery { .. }));
    }
}
