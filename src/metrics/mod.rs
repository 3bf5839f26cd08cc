//! Canonical raw samples, the per-session aggregate, and histogram utilities.
mod aggregate;
mod histogram;
mod types;
mod view;


pub use aggregate::SessionAggregate;
pub(crate) use aggregate::rate_x100;
pub use histogram::{HISTOGRAM_HIGHEST_US, HISTOGRAM_LOWEST_US, LatencyHistogram, Percentiles};
pub use types::{AggregateSnapshot, EndpointDelta, EndpointSnapshot, RawSample};
pub use view::{EndpointView, MetricsView, from_x100, micros_to_millis};
