//! Domain Layer
//!
//! - **Ports** (`ports.rs`) - Capability traits for span export, alert
//!   delivery and caching
//! - **Events** (`events.rs`) - Alert transitions emitted by the SLO engine
//!
//! # Usage
//!
//! ```ignore
//! use tracewarden::domain::ports::AlertPublisher;
//!
//! async fn deliver<P: AlertPublisher>(publisher: &P, events: Vec<AlertEvent>) -> Result<()> {
//!     for event in events {
//!         publisher.publish(event).await?;
//!     }
//!     Ok(())
//! }
//! ```

pub mod events;
pub mod ports;

pub use events::{AlertEvent, AlertState, Severity};
pub use ports::{AlertPublisher, CacheBackend, SpanExporter};
