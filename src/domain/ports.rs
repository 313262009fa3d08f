//! Domain Ports (Port/Adapter Pattern)
//!
//! Capability traits the core depends on. Adapters in [`crate::adapters`]
//! implement them; fallbacks such as the no-op cache or exporter are
//! ordinary implementations selected at startup.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                       Ports (Traits)                     │
//! │     SpanExporter  │  AlertPublisher  │  CacheBackend     │
//! └──────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌──────────────────────────────────────────────────────────┐
//! │                      Adapters (Impls)                    │
//! │  Http/Logging/InMemory/Noop  │  Webhook/Logging  │  Mem  │
//! └──────────────────────────────────────────────────────────┘
//! ```

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::events::AlertEvent;
use crate::error::Result;
use crate::tracer::FinishedSpan;

// =============================================================================
// Span Export Port
// =============================================================================

/// Destination for batches of finished, sampled spans.
///
/// Called only from the background batch task, never from request handling.
#[async_trait]
pub trait SpanExporter: Send + Sync + Debug {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Export one batch.
    async fn export(&self, batch: Vec<FinishedSpan>) -> Result<()>;

    /// Flush and release resources.
    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }
}

// =============================================================================
// Alert Publisher Port
// =============================================================================

/// Port for delivering alert transitions.
#[async_trait]
pub trait AlertPublisher: Send + Sync + Debug {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Publish one alert event.
    async fn publish(&self, event: AlertEvent) -> Result<()>;
}

// =============================================================================
// Cache Port
// =============================================================================

/// Key-value cache used by request handlers.
#[async_trait]
pub trait CacheBackend: Send + Sync + Debug {
    /// Short name for span attributes.
    fn name(&self) -> &str;

    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<()>;

    /// Returns whether a value was removed.
    async fn delete(&self, key: &str) -> Result<bool>;
}

#[async_trait]
impl<C: CacheBackend + ?Sized> CacheBackend for Arc<C> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        (**self).get(key).await
    }

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<()> {
        (**self).set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        (**self).delete(key).await
    }
}
