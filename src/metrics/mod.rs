//! Metrics module
//!
//! Cumulative histograms, counters and gauges recorded in-process and
//! exposed for pull-based scraping.
//!
//! # Components
//!
//! - [`recorder`] - Sharded series store, write and read side
//! - [`histogram`] - Lock-free cumulative histogram with exemplars
//! - [`exposition`] - Prometheus text and exemplar JSON encoding
//! - [`names`] - Well-known series names and bucket layouts

pub mod exposition;
pub mod histogram;
pub mod names;
pub mod recorder;

pub use histogram::{AtomicHistogram, Exemplar, HistogramSnapshot};
pub use recorder::{ExemplarRecord, Labels, MetricsRecorder, SeriesKey};
