//! # Log entries and the buffering pipeline
//!
//! Log calls on the [`Observer`](crate::Observer) build an [`Entry`] and push
//! it into a bounded [`IngestionBuffer`]. A single background worker drains
//! the buffer on a timer, when it fills up, on explicit flush and at
//! shutdown, and delivers every batch to each registered [`Sink`].
//!
//! Producers never block on sinks: an entry that does not fit is handled by
//! the buffer's [`OverflowPolicy`] and counted.
mod buffer;
mod config;
mod entry;
mod in_memory_sink;
mod level;
pub(crate) mod scheduler;
pub(crate) mod sink;

pub use buffer::{Enqueued, IngestionBuffer, OverflowPolicy};
pub use config::{Config, ConfigBuilder};
pub use entry::{Entry, EntryBuilder, EntryKind};
pub use in_memory_sink::InMemorySink;
pub use level::{Level, ParseLevelError};
pub use sink::{ErrorHandler, Sink};
