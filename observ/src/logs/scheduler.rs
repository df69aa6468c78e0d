//! # Flush scheduler
//!
//! One dedicated thread per observer drains the [`IngestionBuffer`] and hands
//! each batch to the sinks. It wakes up for:
//!
//! - the flush interval elapsing (skipped while the buffer is empty);
//! - the buffer reaching capacity, signalled by producers;
//! - an explicit flush, which also flushes every sink and replies when done;
//! - shutdown, which runs one final drain, closes the sinks and exits.
//!
//! ```ascii
//!   +-----------+      +-----------------+      +----------------+      +---------+
//!   | producers +----->| IngestionBuffer +----->| FlushScheduler +----->| SinkSet |
//!   +-----------+      +-----------------+      +-------^--------+      +---------+
//!                                                       | control channel
//!                                          flush / shutdown / capacity
//! ```
//!
//! Explicit flushes and shutdown travel over the same control channel as the
//! capacity signal, so they are serialized with the worker's own timer
//! flushes.
use crate::error::{ObserveError, ObserveResult};
use crate::logs::sink::SinkSet;
use crate::logs::{Config, Enqueued, IngestionBuffer};
use crate::metrics::{Counter, Histogram, MetricRegistry};
use crate::{obs_debug, obs_error, obs_warn};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, SyncSender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

pub(crate) const BUFFER_ENTRIES_ADDED: &str = "buffer_entries_added_total";
pub(crate) const BUFFER_ENTRIES_DROPPED: &str = "buffer_entries_dropped_total";
pub(crate) const BUFFER_SIZE: &str = "buffer_size_current";
pub(crate) const BUFFER_FLUSH_DURATION: &str = "buffer_flush_duration_ms";
const FLUSH_DURATION_BUCKETS: [f64; 6] = [1.0, 5.0, 10.0, 50.0, 100.0, 500.0];

/// Messages sent between producers or the observer and the flush worker.
#[derive(Debug)]
enum FlushMessage {
    /// Sent ONLY when the buffer has reached capacity. The flag is reset by
    /// the worker once the message has been processed.
    FlushDueToCapacity(Arc<AtomicBool>),
    /// Drain the buffer, flush every sink and reply.
    Flush(SyncSender<ObserveResult>),
    /// Final drain, close every sink, reply and exit.
    Shutdown(SyncSender<ObserveResult>),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum FlushReason {
    Timer,
    Capacity,
    Explicit,
    Shutdown,
}

impl fmt::Display for FlushReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FlushReason::Timer => "timer",
            FlushReason::Capacity => "capacity",
            FlushReason::Explicit => "explicit",
            FlushReason::Shutdown => "shutdown",
        })
    }
}

/// The buffer's own instruments, registered in the observer's registry.
#[derive(Clone, Debug)]
pub(crate) struct BufferMetrics {
    added: Counter,
    dropped: Counter,
    flush_duration: Histogram,
}

impl BufferMetrics {
    pub(crate) fn register(registry: &MetricRegistry) -> Self {
        BufferMetrics {
            added: registry.counter(BUFFER_ENTRIES_ADDED),
            dropped: registry.counter(BUFFER_ENTRIES_DROPPED),
            flush_duration: registry.histogram(BUFFER_FLUSH_DURATION, &FLUSH_DURATION_BUCKETS),
        }
    }

    pub(crate) fn record_enqueue(&self, outcome: Enqueued) {
        match outcome {
            Enqueued::Accepted { .. } => self.added.inc(),
            Enqueued::Overwrote { .. } => {
                self.added.inc();
                self.dropped.inc();
            }
            Enqueued::Dropped => self.dropped.inc(),
        }
    }

    fn record_flush(&self, elapsed: Duration) {
        self.flush_duration.observe(elapsed.as_secs_f64() * 1_000.0);
    }
}

/// The state the worker operates on. Also used inline by the calling thread
/// when the worker thread could not be started.
#[derive(Debug)]
struct FlushWorker {
    buffer: Arc<IngestionBuffer>,
    sinks: Arc<SinkSet>,
    metrics: BufferMetrics,
}

impl FlushWorker {
    fn flush(&self, reason: FlushReason) -> ObserveResult {
        let flush_sinks = matches!(reason, FlushReason::Explicit | FlushReason::Shutdown);
        let start = Instant::now();
        let (delivered, result) = self.sinks.deliver_from(&self.buffer, flush_sinks);
        self.metrics.record_flush(start.elapsed());

        obs_debug!(
            name: "FlushScheduler.Flushed",
            reason = reason,
            entries = delivered
        );
        result
    }

    fn shutdown(&self) -> ObserveResult {
        let flush_result = self.flush(FlushReason::Shutdown);
        let close_result = self.sinks.close_all();

        let dropped = self.buffer.dropped_count();
        if dropped > 0 {
            obs_warn!(
                name: "FlushScheduler.EntriesDropped",
                dropped_entries_count = dropped,
                buffer_capacity = self.buffer.capacity(),
                message = "Entries were discarded because the buffer was full. The count covers the lifetime of this observer. Consider a larger buffer or a shorter flush interval."
            );
        }
        close_result.and(flush_result)
    }
}

/// Owns the flush worker thread.
pub(crate) struct FlushScheduler {
    message_sender: SyncSender<FlushMessage>,
    handle: Mutex<Option<thread::JoinHandle<()>>>,
    capacity_message_sent: Arc<AtomicBool>,
    is_shutdown: AtomicBool,
    worker_thread: Option<thread::ThreadId>,
    // Set when no thread could be spawned; flushes then run on the caller.
    inline: Option<FlushWorker>,
}

impl FlushScheduler {
    pub(crate) fn start(
        buffer: Arc<IngestionBuffer>,
        sinks: Arc<SinkSet>,
        metrics: BufferMetrics,
        config: &Config,
    ) -> Self {
        let (message_sender, message_receiver) = mpsc::sync_channel::<FlushMessage>(64);
        let interval = config.flush_interval();
        let worker = FlushWorker {
            buffer: Arc::clone(&buffer),
            sinks: Arc::clone(&sinks),
            metrics: metrics.clone(),
        };

        let spawned = thread::Builder::new()
            .name("observ.FlushScheduler".to_string())
            .spawn(move || {
                obs_debug!(
                    name: "FlushScheduler.ThreadStarted",
                    interval_in_millisecs = interval.as_millis(),
                    buffer_capacity = worker.buffer.capacity(),
                );
                let mut last_flush = Instant::now();

                loop {
                    let remaining_time = interval
                        .checked_sub(last_flush.elapsed())
                        .unwrap_or(Duration::ZERO);

                    match message_receiver.recv_timeout(remaining_time) {
                        Ok(FlushMessage::FlushDueToCapacity(capacity_message_sent)) => {
                            capacity_message_sent.store(false, Ordering::Relaxed);
                            let _ = worker.flush(FlushReason::Capacity);
                            last_flush = Instant::now();
                        }
                        Ok(FlushMessage::Flush(sender)) => {
                            let result = worker.flush(FlushReason::Explicit);
                            last_flush = Instant::now();
                            let _ = sender.send(result);
                        }
                        Ok(FlushMessage::Shutdown(sender)) => {
                            let result = worker.shutdown();
                            let _ = sender.send(result);

                            obs_debug!(
                                name: "FlushScheduler.ThreadExiting",
                                reason = "ShutdownRequested"
                            );
                            break;
                        }
                        Err(RecvTimeoutError::Timeout) => {
                            if !worker.buffer.is_empty() {
                                let _ = worker.flush(FlushReason::Timer);
                            }
                            last_flush = Instant::now();
                        }
                        Err(RecvTimeoutError::Disconnected) => {
                            // The scheduler was dropped without a shutdown.
                            obs_debug!(
                                name: "FlushScheduler.ThreadExiting",
                                reason = "MessageSenderDisconnected"
                            );
                            break;
                        }
                    }
                }
                obs_debug!(name: "FlushScheduler.ThreadStopped");
            });

        let (handle, inline) = match spawned {
            Ok(handle) => (Some(handle), None),
            Err(err) => {
                obs_error!(
                    name: "FlushScheduler.ThreadSpawnFailed",
                    error = err,
                    message = "Entries are only delivered on explicit flush and shutdown."
                );
                let inline = FlushWorker {
                    buffer,
                    sinks,
                    metrics,
                };
                (None, Some(inline))
            }
        };

        let worker_thread = handle.as_ref().map(|handle| handle.thread().id());
        FlushScheduler {
            message_sender,
            worker_thread,
            handle: Mutex::new(handle),
            capacity_message_sent: Arc::new(AtomicBool::new(false)),
            is_shutdown: AtomicBool::new(false),
            inline,
        }
    }

    /// Asks the worker to flush early because the buffer is full. Never
    /// blocks; repeated signals before the worker reacts are collapsed.
    pub(crate) fn notify_capacity(&self) {
        if self.inline.is_some() {
            return;
        }
        // Cheap load first, the swap needs exclusive access to the cache line.
        if !self.capacity_message_sent.load(Ordering::Relaxed)
            && !self.capacity_message_sent.swap(true, Ordering::Relaxed)
        {
            let message = FlushMessage::FlushDueToCapacity(Arc::clone(&self.capacity_message_sent));
            if self.message_sender.try_send(message).is_err() {
                self.capacity_message_sent.store(false, Ordering::Relaxed);
            }
        }
    }

    /// Delivers everything buffered so far and flushes every sink. Returns
    /// after the sinks have returned.
    pub(crate) fn flush(&self) -> ObserveResult {
        if self.is_shutdown.load(Ordering::Acquire) {
            return Err(ObserveError::AlreadyShutdown);
        }
        if let Some(worker) = &self.inline {
            return worker.flush(FlushReason::Explicit);
        }
        if self.on_worker_thread() {
            // Called from the error handler; waiting would wait on ourselves.
            obs_warn!(
                name: "FlushScheduler.FlushFromWorker",
                message = "Flush was requested from the flush worker itself and is skipped."
            );
            return Err(ObserveError::InternalFailure(
                "flush requested from the flush worker".into(),
            ));
        }

        let (sender, receiver) = mpsc::sync_channel(1);
        self.message_sender
            .send(FlushMessage::Flush(sender))
            .map_err(|_| ObserveError::AlreadyShutdown)?;
        receiver.recv().map_err(|err| {
            if self.is_shutdown() {
                // Shutdown overtook this flush in the control channel.
                ObserveError::AlreadyShutdown
            } else {
                ObserveError::InternalFailure(format!("flush worker stopped: {}", err))
            }
        })?
    }

    /// Runs the final drain, closes every sink and stops the worker. Only the
    /// first call does any work.
    pub(crate) fn shutdown(&self) -> ObserveResult {
        if self.is_shutdown.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        if let Some(worker) = &self.inline {
            return worker.shutdown();
        }
        if self.on_worker_thread() {
            // The worker runs the final flush once the current delivery
            // returns. Neither waiting for it nor joining is possible here.
            obs_debug!(name: "FlushScheduler.ShutdownFromWorker");
            return self
                .message_sender
                .try_send(FlushMessage::Shutdown(mpsc::sync_channel(1).0))
                .map_err(|err| {
                    ObserveError::InternalFailure(format!("shutdown not delivered: {}", err))
                });
        }

        let (sender, receiver) = mpsc::sync_channel(1);
        self.message_sender
            .send(FlushMessage::Shutdown(sender))
            .map_err(|_| {
                ObserveError::InternalFailure("flush worker is no longer running".into())
            })?;
        let result = receiver.recv().map_err(|err| {
            obs_error!(name: "FlushScheduler.Shutdown.Error", error = err);
            ObserveError::InternalFailure(format!("flush worker stopped: {}", err))
        })?;

        let handle = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                obs_error!(name: "FlushScheduler.Shutdown.JoinFailed");
            }
        }
        result
    }

    pub(crate) fn is_shutdown(&self) -> bool {
        self.is_shutdown.load(Ordering::Acquire)
    }

    fn on_worker_thread(&self) -> bool {
        self.worker_thread == Some(thread::current().id())
    }
}

impl fmt::Debug for FlushScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlushScheduler")
            .field("message_sender", &self.message_sender)
            .field("is_shutdown", &self.is_shutdown())
            .field("inline", &self.inline.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{SinkError, SinkResult};
    use crate::logs::{ConfigBuilder, Entry, InMemorySink, Level, OverflowPolicy, Sink};
    use std::sync::atomic::AtomicUsize;

    struct Harness {
        buffer: Arc<IngestionBuffer>,
        scheduler: FlushScheduler,
        registry: MetricRegistry,
    }

    fn start(config: Config, sinks: Vec<Box<dyn Sink>>) -> Harness {
        let registry = MetricRegistry::new();
        let buffer = Arc::new(
            IngestionBuffer::new(config.buffer_capacity(), config.overflow_policy())
                .with_size_gauge(registry.gauge(BUFFER_SIZE)),
        );
        let sinks = Arc::new(SinkSet::new(sinks, None));
        let scheduler = FlushScheduler::start(
            Arc::clone(&buffer),
            sinks,
            BufferMetrics::register(&registry),
            &config,
        );
        Harness {
            buffer,
            scheduler,
            registry,
        }
    }

    fn slow_timer() -> Config {
        ConfigBuilder::default()
            .with_buffer_capacity(16)
            .with_flush_interval(Duration::from_secs(3_600))
            .with_overflow_policy(OverflowPolicy::DropNewest)
            .build()
    }

    fn wait_for(condition: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn explicit_flush_is_synchronous() {
        let sink = InMemorySink::default();
        let harness = start(slow_timer(), vec![Box::new(sink.clone())]);
        harness.buffer.enqueue(Entry::new(Level::Info, "A"));
        harness.buffer.enqueue(Entry::new(Level::Info, "B"));

        harness.scheduler.flush().unwrap();

        assert_eq!(sink.batches().len(), 1);
        assert_eq!(sink.flush_count(), 1);
        assert!(harness.buffer.is_empty());
        harness.scheduler.shutdown().unwrap();
    }

    #[test]
    fn timer_flushes_without_explicit_call() {
        let sink = InMemorySink::default();
        let config = ConfigBuilder::default()
            .with_flush_interval(Duration::from_millis(20))
            .build();
        let harness = start(config, vec![Box::new(sink.clone())]);
        harness.buffer.enqueue(Entry::new(Level::Info, "tick"));

        assert!(wait_for(|| sink.has_entries()));
        // Timer flushes do not flush the sinks themselves.
        assert_eq!(sink.flush_count(), 0);
        harness.scheduler.shutdown().unwrap();
    }

    #[test]
    fn capacity_signal_triggers_flush() {
        let sink = InMemorySink::default();
        let harness = start(slow_timer(), vec![Box::new(sink.clone())]);
        harness.buffer.enqueue(Entry::new(Level::Info, "full"));

        harness.scheduler.notify_capacity();

        assert!(wait_for(|| sink.has_entries()));
        assert!(wait_for(|| !harness
            .scheduler
            .capacity_message_sent
            .load(Ordering::Relaxed)));
        harness.scheduler.shutdown().unwrap();
    }

    #[test]
    fn shutdown_drains_then_closes_once() {
        let sink = InMemorySink::default();
        let harness = start(slow_timer(), vec![Box::new(sink.clone())]);
        harness.buffer.enqueue(Entry::new(Level::Info, "last words"));

        harness.scheduler.shutdown().unwrap();
        harness.scheduler.shutdown().unwrap();

        assert_eq!(sink.entries().len(), 1);
        assert_eq!(sink.close_count(), 1);
        assert!(matches!(
            harness.scheduler.flush(),
            Err(ObserveError::AlreadyShutdown)
        ));
    }

    #[derive(Debug)]
    struct CloseFails(Arc<AtomicUsize>);

    impl Sink for CloseFails {
        fn write(&mut self, _batch: &[Entry]) -> SinkResult {
            Ok(())
        }

        fn close(&mut self) -> SinkResult {
            self.0.fetch_add(1, Ordering::SeqCst);
            Err(SinkError::InternalFailure("close refused".into()))
        }
    }

    #[test]
    fn shutdown_reports_first_close_error_after_closing_all() {
        let closes = Arc::new(AtomicUsize::new(0));
        let harness = start(
            slow_timer(),
            vec![
                Box::new(CloseFails(Arc::clone(&closes))),
                Box::new(CloseFails(Arc::clone(&closes))),
            ],
        );

        let result = harness.scheduler.shutdown();

        assert!(matches!(result, Err(ObserveError::Sink { index: 0, .. })));
        assert_eq!(closes.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn flush_records_buffer_metrics() {
        let harness = start(slow_timer(), vec![]);
        harness.buffer.enqueue(Entry::new(Level::Info, "A"));

        harness.scheduler.flush().unwrap();

        let duration = harness.registry.histogram(BUFFER_FLUSH_DURATION, &[]);
        assert_eq!(duration.snapshot().count, 1);
        assert_eq!(harness.registry.gauge(BUFFER_SIZE).value(), 0.0);
        harness.scheduler.shutdown().unwrap();
    }
}
