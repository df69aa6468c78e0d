//! Error types shared by the pipeline and its sinks.
//!
//! Producer-facing calls never return these: an entry that cannot be buffered
//! is counted, not reported. Errors only surface from [`Sink`] implementations
//! and from the explicit [`Observer::flush`] and [`Observer::close`] calls.
//!
//! [`Sink`]: crate::logs::Sink
//! [`Observer::flush`]: crate::Observer::flush
//! [`Observer::close`]: crate::Observer::close
use std::sync::PoisonError;
use thiserror::Error;

/// Errors returned by a [`Sink`](crate::logs::Sink).
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum SinkError {
    /// The sink was already closed and cannot accept more work.
    #[error("sink is already closed")]
    AlreadyClosed,

    /// The underlying writer failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Any other failure, with a human readable description.
    #[error("sink failure: {0}")]
    InternalFailure(String),
}

impl<T> From<PoisonError<T>> for SinkError {
    fn from(err: PoisonError<T>) -> Self {
        SinkError::InternalFailure(format!("sink mutex poisoned: {}", err))
    }
}

/// Result of a single sink operation.
pub type SinkResult = Result<(), SinkError>;

/// Errors returned by [`Observer`](crate::Observer) flush and shutdown.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ObserveError {
    /// The observer was shut down; the requested flush did not run.
    #[error("observer is already shut down")]
    AlreadyShutdown,

    /// A sink failed. `index` is the sink's registration position.
    #[error("sink #{index} failed: {source}")]
    Sink {
        /// Registration position of the failing sink
        index: usize,
        /// The failure reported by the sink
        #[source]
        source: SinkError,
    },

    /// The flush worker could not be reached or stopped unexpectedly.
    #[error("internal failure: {0}")]
    InternalFailure(String),
}

/// Result of an explicit flush or shutdown.
pub type ObserveResult = Result<(), ObserveError>;
