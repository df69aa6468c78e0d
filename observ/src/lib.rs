//! # observ
//!
//! An in-process telemetry pipeline. Application code emits log entries,
//! updates counters, gauges and histograms, and records trace spans through
//! an [`Observer`]. Log entries are buffered and delivered asynchronously to
//! pluggable [`Sink`](logs::Sink)s by a single background worker; metrics are
//! aggregated in place; spans are correlated through a
//! [`CorrelationContext`](trace::CorrelationContext).
//!
//! Telemetry never fails its host: producer calls do not block and do not
//! return errors. Entries that do not fit in the buffer are counted, sink
//! failures are isolated and reported through the crate's own diagnostics.
//!
//! ## Getting started
//!
//! ```
//! use observ::logs::{ConfigBuilder, InMemorySink, Level};
//! use observ::trace::CorrelationContext;
//! use observ::Observer;
//! use std::time::Duration;
//!
//! let sink = InMemorySink::default();
//! let observer = Observer::builder()
//!     .with_config(
//!         ConfigBuilder::default()
//!             .with_buffer_capacity(512)
//!             .with_flush_interval(Duration::from_millis(200))
//!             .build(),
//!     )
//!     .with_sink(sink.clone())
//!     .build();
//!
//! let cx = CorrelationContext::new().with_request_id("req-42");
//! {
//!     let span = observer.span(&cx, "checkout");
//!     observer.log(span.context(), Level::Info, "charging card");
//!     observer.counter("checkouts_total").inc();
//! }
//!
//! observer.close().unwrap();
//! assert_eq!(sink.entries()[0].request_id(), Some("req-42"));
//! ```
//!
//! ## Crate feature flags
//!
//! * `internal-logs` (enabled by default): routes the crate's own
//!   diagnostics (worker lifecycle, flush reasons, dropped entries, sink
//!   failures) to `tracing`.
#![warn(
    future_incompatible,
    missing_debug_implementations,
    missing_docs,
    nonstandard_style,
    rust_2018_idioms,
    unreachable_pub,
    unused
)]
#![cfg_attr(docsrs, feature(doc_cfg), deny(rustdoc::broken_intra_doc_links))]

mod common;
pub mod error;
mod internal_logging;
pub mod logs;
pub mod metrics;
mod observer;
pub mod trace;

pub use common::{Fields, Value};
pub use observer::{Observer, ObserverBuilder};

#[cfg(feature = "internal-logs")]
#[doc(hidden)]
pub mod _private {
    pub use tracing::{debug, error, info, warn};
}
