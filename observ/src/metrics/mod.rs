//! # Metrics
//!
//! Counters, gauges and histograms live in a [`MetricRegistry`] owned by the
//! observer. They are updated in place, never buffered: every update takes
//! the instrument's own lock, so concurrent updates on one instrument are
//! linearizable with respect to each other and to reads.
mod counter;
mod gauge;
mod histogram;
mod registry;

pub use counter::Counter;
pub use gauge::Gauge;
pub use histogram::{Histogram, HistogramSnapshot};
pub use registry::MetricRegistry;

use std::collections::BTreeMap;

/// Label name to label value mapping of an instrument.
pub type Labels = BTreeMap<String, String>;

/// The value part of a [`MetricData`].
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub enum MetricValue {
    /// Current counter total
    Counter(f64),
    /// Last gauge value
    Gauge(f64),
    /// Histogram snapshot
    Histogram(HistogramSnapshot),
}

/// Point in time copy of one registered instrument.
#[derive(Clone, Debug, PartialEq)]
pub struct MetricData {
    /// Registry name
    pub name: String,
    /// Instrument labels
    pub labels: Labels,
    /// Current value
    pub value: MetricValue,
}
