//! JSON-lines sinks for [`observ`].
//!
//! [`JsonSink`] renders every entry of a batch as one JSON object on its own
//! line, to standard output or any [`std::io::Write`].
//!
//! ```no_run
//! use observ::trace::CorrelationContext;
//! use observ::Observer;
//! use observ_stdout::JsonSink;
//!
//! let observer = Observer::builder()
//!     .with_sink(JsonSink::stdout().with_colors(true))
//!     .build();
//!
//! observer.info(&CorrelationContext::new().with_request_id("req-1"), "service started");
//! observer.close().unwrap();
//! ```
//!
//! Output shape:
//!
//! ```json
//! {"timestamp":"2024-05-01T12:00:00.123Z","level":"info","message":"service started","request_id":"req-1"}
//! ```
//!
//! Absent correlation ids and an empty `data` object are omitted. Span entries
//! carry `"kind":"span"`. Non-finite floats are written as `null`.
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

mod sink;
mod transform;

pub use sink::JsonSink;
