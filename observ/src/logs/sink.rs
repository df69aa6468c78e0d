use crate::error::{ObserveError, ObserveResult, SinkResult};
use crate::logs::{Entry, IngestionBuffer};
use crate::{obs_debug, obs_error, obs_warn};
use std::fmt::{self, Debug};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// `Sink` defines the interface that destinations of flushed entries
/// implement.
///
/// The flush worker calls a sink from a single thread at a time, so
/// implementations take `&mut self` and need no internal locking. A sink may
/// block; while it does, further flushes wait, but producers never do.
pub trait Sink: Send + Debug {
    /// Writes a batch of entries, oldest first.
    ///
    /// An empty batch must be a no-op.
    fn write(&mut self, batch: &[Entry]) -> SinkResult;

    /// Flushes anything the sink buffers internally.
    fn flush(&mut self) -> SinkResult {
        Ok(())
    }

    /// Releases the sink's resources. Called exactly once, after the final
    /// flush.
    fn close(&mut self) -> SinkResult {
        Ok(())
    }
}

/// Receives every isolated sink failure.
pub type ErrorHandler = Arc<dyn Fn(&ObserveError) + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SinkOp {
    Write,
    Flush,
    Close,
}

impl fmt::Display for SinkOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SinkOp::Write => "write",
            SinkOp::Flush => "flush",
            SinkOp::Close => "close",
        })
    }
}

struct Sinks {
    sinks: Vec<Box<dyn Sink>>,
    closed: bool,
}

/// The registered sinks and the fan-out over them.
///
/// Every delivery holds the sink lock from the drain of the buffer until the
/// last sink has returned, so two flushes never interleave their batches.
pub(crate) struct SinkSet {
    inner: Mutex<Sinks>,
    error_handler: Option<ErrorHandler>,
}

impl SinkSet {
    pub(crate) fn new(sinks: Vec<Box<dyn Sink>>, error_handler: Option<ErrorHandler>) -> Self {
        SinkSet {
            inner: Mutex::new(Sinks {
                sinks,
                closed: false,
            }),
            error_handler,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Sinks> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn add(&self, sink: Box<dyn Sink>) {
        let mut inner = self.lock();
        if inner.closed {
            obs_warn!(
                name: "SinkSet.AddAfterClose",
                message = "A sink was added after shutdown. It will never receive entries."
            );
            return;
        }
        inner.sinks.push(sink);
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().sinks.len()
    }

    /// Drains `buffer` and delivers the batch to every sink. With
    /// `flush_sinks`, each sink's own flush runs afterwards even when the
    /// batch was empty.
    ///
    /// Returns the number of delivered entries and the first failure. The
    /// error handler runs after the sink lock has been released.
    pub(crate) fn deliver_from(
        &self,
        buffer: &IngestionBuffer,
        flush_sinks: bool,
    ) -> (usize, ObserveResult) {
        let mut errors = Vec::new();
        let delivered = {
            let mut inner = self.lock();
            let batch = buffer.drain();
            if inner.closed {
                return (0, Err(ObserveError::AlreadyShutdown));
            }

            if !batch.is_empty() {
                for (index, sink) in inner.sinks.iter_mut().enumerate() {
                    collect(index, SinkOp::Write, sink.write(&batch), &mut errors);
                }
            }
            if flush_sinks {
                for (index, sink) in inner.sinks.iter_mut().enumerate() {
                    collect(index, SinkOp::Flush, sink.flush(), &mut errors);
                }
            }
            batch.len()
        };

        (delivered, self.report(errors))
    }

    /// Closes every sink in registration order, continuing past failures.
    /// Later calls do nothing.
    pub(crate) fn close_all(&self) -> ObserveResult {
        let mut errors = Vec::new();
        {
            let mut inner = self.lock();
            if inner.closed {
                return Ok(());
            }
            inner.closed = true;

            for (index, sink) in inner.sinks.iter_mut().enumerate() {
                collect(index, SinkOp::Close, sink.close(), &mut errors);
            }
            obs_debug!(name: "SinkSet.Closed", sink_count = inner.sinks.len());
        }
        self.report(errors)
    }

    /// Hands every failure to the error handler and returns the first one.
    /// Must be called without the sink lock held: the handler may call back
    /// into the observer.
    fn report(&self, errors: Vec<ObserveError>) -> ObserveResult {
        if let Some(handler) = &self.error_handler {
            for err in &errors {
                handler(err);
            }
        }
        errors.into_iter().next().map_or(Ok(()), Err)
    }
}

fn collect(index: usize, op: SinkOp, result: SinkResult, errors: &mut Vec<ObserveError>) {
    let Err(source) = result else {
        return;
    };
    obs_error!(
        name: "SinkSet.SinkFailed",
        sink_index = index,
        operation = op,
        error = source
    );
    errors.push(ObserveError::Sink { index, source });
}

impl Debug for SinkSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        f.debug_struct("SinkSet")
            .field("sinks", &inner.sinks)
            .field("closed", &inner.closed)
            .field("error_handler", &self.error_handler.is_some())
            .finish()
    }
}
