//! # Trace and correlation
//!
//! Correlation identifiers tie the log entries and spans of one logical
//! request together. A [`CorrelationContext`] carries them through the call
//! chain; [`Observer::start_span`] derives a child context for each nested
//! unit of work:
//!
//! - the trace id is stable across every span of one request;
//! - the span id changes at every `start_span`;
//! - a child's parent id is the span id of the context it was started in.
//!
//! Ids are opaque strings to every component. Generated trace ids carry 128
//! random bits and span ids 64, see [`RandomIdGenerator`].
//!
//! [`Observer::start_span`]: crate::Observer::start_span
mod context;
mod id_generator;
mod span;

pub use context::{ContextGuard, CorrelationContext};
pub use id_generator::{IdGenerator, IncrementIdGenerator, RandomIdGenerator, SpanId, TraceId};
pub(crate) use span::SpanRecorder;
pub use span::{Span, SpanEvent, SpanGuard, SpanStatus};

/// Generates a new random request id: 64 bits as 16 lowercase hex characters.
pub fn new_request_id() -> String {
    RandomIdGenerator::default().new_request_id()
}
