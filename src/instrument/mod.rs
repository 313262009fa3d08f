//! Boundary Instrumentation
//!
//! Spans and metrics around the places a request crosses a boundary:
//!
//! - [`request`] - Inbound requests: extract, root span, SLO metrics, response headers
//! - [`cache`] - Cache calls via [`TracedCache`]
//! - [`store`] - Store statements via [`traced_statement`]
//! - [`operation`] - Units of work via [`time_operation`], outbound calls via [`time_outbound`]

pub mod cache;
pub mod operation;
pub mod request;
pub mod store;

pub use cache::{CacheStats, CacheStatsSnapshot, TracedCache, MAX_KEY_ATTRIBUTE_LEN};
pub use operation::{time_operation, time_outbound};
pub use request::{
    InboundRequest, RequestInstrumentation, CLIENT_CLOSED_STATUS, SLO_ERROR_STATUS,
};
pub use store::{traced_statement, StatementInfo};
