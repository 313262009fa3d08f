//! Infrastructure Adapters
//!
//! This module contains adapter implementations for the domain ports,
//! following the Port/Adapter (Hexagonal) architecture pattern.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Domain Layer                             │
//! │  ┌────────────────────────────────────────────────────────────┐ │
//! │  │                    Ports (Traits)                          │ │
//! │  │      SpanExporter │ AlertPublisher │ CacheBackend          │ │
//! │  └────────────────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Adapters (This Module)                      │
//! │  ┌────────────────────────────────────────────────────────────┐ │
//! │  │ HttpSpanExporter │ LoggingSpanExporter │ NoopSpanExporter  │ │
//! │  │ WebhookAlertPublisher │ LoggingAlertPublisher │ Composite  │ │
//! │  │ InMemoryCache │ NoopCache                                  │ │
//! │  └────────────────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use tracewarden::adapters::WebhookAlertPublisher;
//! use tracewarden::domain::ports::AlertPublisher;
//!
//! let webhook = WebhookAlertPublisher::new("http://alerts.local/hook", timeout)?;
//! webhook.publish(event).await?;
//! ```

pub mod alert_publisher;
pub mod cache;
pub mod span_exporter;

pub use alert_publisher::{InMemoryAlertPublisher, LoggingAlertPublisher, WebhookAlertPublisher};
pub use cache::{InMemoryCache, NoopCache};
pub use span_exporter::{HttpSpanExporter, InMemorySpanExporter, LoggingSpanExporter, NoopSpanExporter};
