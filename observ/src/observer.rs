//! # Observer
//!
//! The facade application code talks to. An `Observer` owns the metric
//! registry, the ingestion buffer, the flush worker and the registered
//! sinks for its whole lifetime.
//!
//! ```ascii
//!   log() ----> IngestionBuffer ----> FlushScheduler ----> Sink, Sink, ...
//!   counter() / gauge() / histogram() ----> MetricRegistry (updated in place)
//!   start_span() ----> Span + child CorrelationContext
//! ```
//!
//! Every producer call is non-blocking and infallible. Only [`Observer::flush`]
//! and [`Observer::close`] report errors, and only after every sink has been
//! attempted.
use crate::common::Value;
use crate::error::{ObserveError, ObserveResult};
use crate::logs::scheduler::{BufferMetrics, FlushScheduler, BUFFER_SIZE};
use crate::logs::sink::SinkSet;
use crate::logs::{Config, Entry, EntryBuilder, ErrorHandler, IngestionBuffer, Level, Sink};
use crate::metrics::{Counter, Gauge, Histogram, MetricRegistry};
use crate::trace::{
    CorrelationContext, IdGenerator, RandomIdGenerator, Span, SpanGuard, SpanRecorder, SpanStatus,
};
use crate::{obs_debug, obs_info, obs_warn};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread;

/// Cloneable handle to one telemetry pipeline.
///
/// All clones share the same buffer, sinks and registry. The pipeline shuts
/// down when [`close`](Observer::close) is called or, failing that, when the
/// last clone is dropped.
#[derive(Clone)]
pub struct Observer {
    inner: Arc<ObserverInner>,
}

struct ObserverInner {
    config: Config,
    buffer: Arc<IngestionBuffer>,
    sinks: Arc<SinkSet>,
    scheduler: FlushScheduler,
    registry: MetricRegistry,
    buffer_metrics: BufferMetrics,
    id_generator: Box<dyn IdGenerator>,
    span_entries: bool,
    is_shutdown: AtomicBool,
    // Producers between their shutdown check and the end of their enqueue.
    // Shutdown waits for zero so nothing lands after the final drain.
    in_flight: AtomicUsize,
    warned_after_shutdown: AtomicBool,
}

impl ObserverInner {
    fn emit(&self, entry: Entry) {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        if self.is_shutdown.load(Ordering::SeqCst) {
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            if !self.warned_after_shutdown.swap(true, Ordering::Relaxed) {
                obs_warn!(
                    name: "Observer.EmitAfterShutdown",
                    message = "Entries are being logged after shutdown. They are discarded; no further warning is emitted."
                );
            }
            return;
        }

        let outcome = self.buffer.enqueue(entry);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.buffer_metrics.record_enqueue(outcome);

        let at_capacity = outcome
            .queue_len()
            .map_or(true, |len| len >= self.buffer.capacity());
        if at_capacity && self.config.flush_on_capacity() {
            self.scheduler.notify_capacity();
        }
    }

    fn shutdown(&self) -> ObserveResult {
        if self.is_shutdown.swap(true, Ordering::SeqCst) {
            obs_debug!(name: "Observer.Close.AlreadyShutdown");
            return Ok(());
        }
        // Enqueues never block, so this wait is short.
        while self.in_flight.load(Ordering::SeqCst) > 0 {
            thread::yield_now();
        }
        let result = self.scheduler.shutdown();
        obs_info!(
            name: "Observer.Closed",
            dropped_entries = self.buffer.dropped_count(),
            succeeded = result.is_ok()
        );
        result
    }
}

impl SpanRecorder for ObserverInner {
    fn on_end(&self, span: &Span) {
        if !self.span_entries {
            return;
        }
        let status = span.status();
        let level = if status.is_error() {
            Level::Error
        } else {
            Level::Info
        };

        let mut entry = Entry::from_span(span, level)
            .with_field("name", span.name())
            .with_field("duration_ms", span.duration().as_secs_f64() * 1_000.0)
            .with_field("status", status.to_string())
            .with_field("events", span.events().len());
        if let SpanStatus::Error { description } = status {
            entry = entry.with_field("status_description", description);
        }
        self.emit(entry);
    }
}

impl Drop for ObserverInner {
    fn drop(&mut self) {
        if !self.is_shutdown.load(Ordering::Relaxed) {
            let _ = self.shutdown();
        }
    }
}

impl Observer {
    /// Create a new [`ObserverBuilder`].
    pub fn builder() -> ObserverBuilder {
        ObserverBuilder::default()
    }

    /// The effective, sanitized configuration.
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Logs `message` at `level`, correlated with `cx`. Never blocks.
    pub fn log(&self, cx: &CorrelationContext, level: Level, message: impl Into<String>) {
        self.emit(Entry::from_context(cx, level, message));
    }

    /// Logs `message` with extra fields. Fields override context attributes
    /// of the same name.
    pub fn log_with_fields<K, V>(
        &self,
        cx: &CorrelationContext,
        level: Level,
        message: impl Into<String>,
        fields: impl IntoIterator<Item = (K, V)>,
    ) where
        K: Into<String>,
        V: Into<Value>,
    {
        let fields = fields.into_iter().map(|(k, v)| (k.into(), v.into()));
        self.emit(Entry::from_context(cx, level, message).with_fields(fields));
    }

    /// Logs at debug level.
    pub fn debug(&self, cx: &CorrelationContext, message: impl Into<String>) {
        self.log(cx, Level::Debug, message);
    }

    /// Logs at info level.
    pub fn info(&self, cx: &CorrelationContext, message: impl Into<String>) {
        self.log(cx, Level::Info, message);
    }

    /// Logs at warn level.
    pub fn warn(&self, cx: &CorrelationContext, message: impl Into<String>) {
        self.log(cx, Level::Warn, message);
    }

    /// Logs at error level.
    pub fn error(&self, cx: &CorrelationContext, message: impl Into<String>) {
        self.log(cx, Level::Error, message);
    }

    /// Starts building an entry; nothing is logged until
    /// [`EntryBuilder::emit`].
    pub fn entry(
        &self,
        cx: &CorrelationContext,
        level: Level,
        message: impl Into<String>,
    ) -> EntryBuilder<'_> {
        EntryBuilder::new(self, Entry::from_context(cx, level, message))
    }

    pub(crate) fn emit(&self, entry: Entry) {
        self.inner.emit(entry);
    }

    /// The counter named `name`, created on first use.
    pub fn counter(&self, name: &str) -> Counter {
        self.inner.registry.counter(name)
    }

    /// The gauge named `name`, created on first use.
    pub fn gauge(&self, name: &str) -> Gauge {
        self.inner.registry.gauge(name)
    }

    /// The histogram named `name`, created with `buckets` on first use.
    pub fn histogram(&self, name: &str, buckets: &[f64]) -> Histogram {
        self.inner.registry.histogram(name, buckets)
    }

    /// The observer's own metric registry.
    pub fn registry(&self) -> &MetricRegistry {
        &self.inner.registry
    }

    /// Entries discarded by the buffer's overflow policy so far.
    pub fn dropped_count(&self) -> u64 {
        self.inner.buffer.dropped_count()
    }

    /// Starts a span named `name` under `cx`.
    ///
    /// The new span gets a fresh span id. Its trace id is the context's trace
    /// id, or a fresh one when the context has none; the context's active
    /// span, if any, becomes its parent. The returned context carries the new
    /// span so nested calls chain. End the span with [`Span::end`], or use
    /// [`Observer::span`] to have it ended on scope exit.
    pub fn start_span(
        &self,
        cx: &CorrelationContext,
        name: impl Into<String>,
    ) -> (Span, CorrelationContext) {
        let generator = &self.inner.id_generator;
        let span_id = generator.new_span_id();
        let trace_id = cx
            .trace_id()
            .cloned()
            .unwrap_or_else(|| generator.new_trace_id());

        let child = cx.with_span(trace_id.clone(), span_id.clone());
        let recorder = Arc::downgrade(&self.inner) as Weak<dyn SpanRecorder>;
        let span = Span::new(
            name.into(),
            trace_id,
            span_id,
            cx.span_id().cloned(),
            cx,
            Some(recorder),
        );
        (span, child)
    }

    /// Ends `span`. Same as [`Span::end`]; only the first call has an effect.
    pub fn end_span(&self, span: &Span) {
        span.end();
    }

    /// Starts a span that ends when the returned guard is dropped, on every
    /// exit path including unwinding.
    pub fn span(&self, cx: &CorrelationContext, name: impl Into<String>) -> SpanGuard {
        let (span, child) = self.start_span(cx, name);
        SpanGuard::new(span, child)
    }

    /// Runs `f` inside a new span and ends the span when `f` returns.
    ///
    /// ```
    /// use observ::trace::CorrelationContext;
    /// use observ::Observer;
    ///
    /// let observer = Observer::builder().build();
    /// let answer = observer.in_span(&CorrelationContext::new(), "compute", |span, cx| {
    ///     span.set_attribute("input", 21);
    ///     assert_eq!(cx.span_id(), Some(span.span_id()));
    ///     42
    /// });
    /// assert_eq!(answer, 42);
    /// # observer.close().unwrap();
    /// ```
    pub fn in_span<T>(
        &self,
        cx: &CorrelationContext,
        name: impl Into<String>,
        f: impl FnOnce(&Span, &CorrelationContext) -> T,
    ) -> T {
        let guard = self.span(cx, name);
        f(guard.span(), guard.context())
    }

    /// Registers another sink. It receives batches flushed from now on.
    pub fn add_sink(&self, sink: impl Sink + 'static) {
        self.inner.sinks.add(Box::new(sink));
    }

    /// Delivers every buffered entry to every sink and flushes the sinks.
    ///
    /// Returns once every sink has returned, with the first failure if any.
    pub fn flush(&self) -> ObserveResult {
        if self.is_shutdown() {
            return Err(ObserveError::AlreadyShutdown);
        }
        self.inner.scheduler.flush()
    }

    /// Stops accepting entries, runs the final flush and closes every sink in
    /// registration order.
    ///
    /// Returns the first sink close failure after every sink has been
    /// closed. Calling `close` again does nothing and returns `Ok(())`.
    pub fn close(&self) -> ObserveResult {
        self.inner.shutdown()
    }

    /// Whether [`close`](Observer::close) has been called.
    pub fn is_shutdown(&self) -> bool {
        self.inner.is_shutdown.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for Observer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observer")
            .field("config", &self.inner.config)
            .field("buffer", &self.inner.buffer)
            .field("sinks", &self.inner.sinks.len())
            .field("is_shutdown", &self.is_shutdown())
            .finish()
    }
}

/// Builder for [`Observer`].
pub struct ObserverBuilder {
    config: Option<Config>,
    sinks: Vec<Box<dyn Sink>>,
    id_generator: Box<dyn IdGenerator>,
    error_handler: Option<ErrorHandler>,
    span_entries: bool,
}

impl Default for ObserverBuilder {
    fn default() -> Self {
        ObserverBuilder {
            config: None,
            sinks: Vec::new(),
            id_generator: Box::new(RandomIdGenerator::default()),
            error_handler: None,
            span_entries: false,
        }
    }
}

impl ObserverBuilder {
    /// Uses `config` instead of [`Config::default`], which reads the
    /// environment.
    pub fn with_config(self, config: Config) -> Self {
        ObserverBuilder {
            config: Some(config),
            ..self
        }
    }

    /// Registers a sink. Sinks are written, flushed and closed in
    /// registration order.
    pub fn with_sink<S: Sink + 'static>(mut self, sink: S) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }

    /// Replaces the id generator used for trace and span ids.
    pub fn with_id_generator<G: IdGenerator + 'static>(self, id_generator: G) -> Self {
        ObserverBuilder {
            id_generator: Box::new(id_generator),
            ..self
        }
    }

    /// Installs a callback receiving every isolated sink failure.
    ///
    /// The handler usually runs on the flush worker, with no pipeline lock
    /// held, so it may use the observer. A `flush` from the handler returns
    /// an error instead of waiting on the worker; a `close` from the handler
    /// returns at once, and the worker runs the final flush afterwards.
    pub fn with_error_handler<F>(self, handler: F) -> Self
    where
        F: Fn(&ObserveError) + Send + Sync + 'static,
    {
        ObserverBuilder {
            error_handler: Some(Arc::new(handler)),
            ..self
        }
    }

    /// When enabled, every ending span is also logged as an
    /// [`EntryKind::Span`] entry. Disabled by default.
    pub fn with_span_entries(self, enabled: bool) -> Self {
        ObserverBuilder {
            span_entries: enabled,
            ..self
        }
    }

    /// Starts the flush worker and returns the observer.
    pub fn build(self) -> Observer {
        let config = self.config.unwrap_or_default();
        let registry = MetricRegistry::new();
        let buffer_metrics = BufferMetrics::register(&registry);
        let buffer = Arc::new(
            IngestionBuffer::new(config.buffer_capacity(), config.overflow_policy())
                .with_size_gauge(registry.gauge(BUFFER_SIZE)),
        );
        let sinks = Arc::new(SinkSet::new(self.sinks, self.error_handler));
        let scheduler = FlushScheduler::start(
            Arc::clone(&buffer),
            Arc::clone(&sinks),
            buffer_metrics.clone(),
            &config,
        );

        obs_info!(
            name: "Observer.Built",
            buffer_capacity = config.buffer_capacity(),
            flush_interval_in_millisecs = config.flush_interval().as_millis(),
            overflow_policy = config.overflow_policy(),
            sink_count = sinks.len()
        );

        Observer {
            inner: Arc::new(ObserverInner {
                config,
                buffer,
                sinks,
                scheduler,
                registry,
                buffer_metrics,
                id_generator: self.id_generator,
                span_entries: self.span_entries,
                is_shutdown: AtomicBool::new(false),
                in_flight: AtomicUsize::new(0),
                warned_after_shutdown: AtomicBool::new(false),
            }),
        }
    }
}

impl fmt::Debug for ObserverBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObserverBuilder")
            .field("config", &self.config)
            .field("sinks", &self.sinks)
            .field("id_generator", &self.id_generator)
            .field("span_entries", &self.span_entries)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logs::{ConfigBuilder, EntryKind, InMemorySink, OverflowPolicy};
    use crate::trace::IncrementIdGenerator;
    use std::time::Duration;

    fn quiet_config(capacity: usize) -> Config {
        ConfigBuilder::default()
            .with_buffer_capacity(capacity)
            .with_flush_interval(Duration::from_secs(3_600))
            .with_overflow_policy(OverflowPolicy::DropNewest)
            .with_flush_on_capacity(false)
            .build()
    }

    fn observer_with(sink: &InMemorySink) -> Observer {
        Observer::builder()
            .with_config(quiet_config(100))
            .with_sink(sink.clone())
            .with_id_generator(IncrementIdGenerator::new())
            .build()
    }

    #[test]
    fn log_copies_context_into_entry() {
        let sink = InMemorySink::default();
        let observer = observer_with(&sink);
        let cx = CorrelationContext::new()
            .with_request_id("req-1")
            .with_attribute("tenant", "acme");

        observer.log_with_fields(&cx, Level::Warn, "slow", [("elapsed_ms", 250)]);
        observer.flush().unwrap();

        let entry = sink.last_entry().unwrap();
        assert_eq!(entry.level(), Level::Warn);
        assert_eq!(entry.request_id(), Some("req-1"));
        assert_eq!(entry.data().get("tenant"), Some(&Value::from("acme")));
        assert_eq!(entry.data().get("elapsed_ms"), Some(&Value::I64(250)));
        observer.close().unwrap();
    }

    #[test]
    fn entry_builder_records_error_field() {
        let sink = InMemorySink::default();
        let observer = observer_with(&sink);
        let err = std::io::Error::new(std::io::ErrorKind::Other, "refused");

        observer
            .entry(&CorrelationContext::new(), Level::Error, "call failed")
            .with_field("attempt", 2)
            .with_error(&err)
            .emit();
        observer.flush().unwrap();

        let entry = sink.last_entry().unwrap();
        assert_eq!(entry.data().get("error"), Some(&Value::from("refused")));
        observer.close().unwrap();
    }

    #[test]
    fn child_span_chains_to_parent() {
        let observer = observer_with(&InMemorySink::default());
        let (root, root_cx) = observer.start_span(&CorrelationContext::new(), "root");
        let (child, child_cx) = observer.start_span(&root_cx, "child");

        assert_eq!(root.parent_id(), None);
        assert_eq!(child.parent_id(), Some(root.span_id()));
        assert_eq!(child.trace_id(), root.trace_id());
        assert_ne!(child.span_id(), root.span_id());
        assert_eq!(child_cx.span_id(), Some(child.span_id()));
        assert_eq!(child_cx.parent_id(), Some(root.span_id()));

        child.end();
        root.end();
        observer.close().unwrap();
    }

    #[test]
    fn inbound_trace_id_is_inherited() {
        let observer = observer_with(&InMemorySink::default());
        let cx = CorrelationContext::new().with_trace_id("from-header");
        let (span, _) = observer.start_span(&cx, "handler");

        assert_eq!(span.trace_id().as_str(), "from-header");
        assert_eq!(span.parent_id(), None);
        observer.close().unwrap();
    }

    #[test]
    fn span_entries_are_emitted_when_enabled() {
        let sink = InMemorySink::default();
        let observer = Observer::builder()
            .with_config(quiet_config(100))
            .with_sink(sink.clone())
            .with_span_entries(true)
            .build();

        observer.in_span(&CorrelationContext::new(), "work", |span, _| {
            span.add_event("halfway");
            span.set_status(SpanStatus::error("timeout"));
        });
        observer.flush().unwrap();

        let entry = sink.last_entry().unwrap();
        assert_eq!(entry.kind(), EntryKind::Span);
        assert_eq!(entry.level(), Level::Error);
        assert_eq!(entry.data().get("name"), Some(&Value::from("work")));
        assert_eq!(entry.data().get("status"), Some(&Value::from("error")));
        assert_eq!(entry.data().get("events"), Some(&Value::I64(1)));
        assert!(entry.data().contains_key("duration_ms"));
        assert!(entry.span_id().is_some());
        observer.close().unwrap();
    }

    #[test]
    fn span_entries_are_off_by_default() {
        let sink = InMemorySink::default();
        let observer = observer_with(&sink);
        drop(observer.span(&CorrelationContext::new(), "quiet"));
        observer.flush().unwrap();
        assert!(!sink.has_entries());
        observer.close().unwrap();
    }

    #[test]
    fn buffer_metrics_are_registered() {
        let observer = Observer::builder().with_config(quiet_config(1)).build();
        let cx = CorrelationContext::new();
        observer.info(&cx, "kept");
        observer.info(&cx, "dropped");

        assert_eq!(observer.counter("buffer_entries_added_total").value(), 1.0);
        assert_eq!(observer.counter("buffer_entries_dropped_total").value(), 1.0);
        assert_eq!(observer.gauge("buffer_size_current").value(), 1.0);
        assert_eq!(observer.dropped_count(), 1);
        observer.close().unwrap();
    }

    #[test]
    fn logging_after_close_is_discarded() {
        let sink = InMemorySink::default();
        let observer = observer_with(&sink);
        observer.close().unwrap();

        observer.info(&CorrelationContext::new(), "too late");

        assert!(!sink.has_entries());
        assert!(matches!(observer.flush(), Err(ObserveError::AlreadyShutdown)));
    }

    #[test]
    fn dropping_last_handle_flushes_and_closes() {
        let sink = InMemorySink::default();
        {
            let observer = observer_with(&sink);
            let clone = observer.clone();
            clone.info(&CorrelationContext::new(), "pending");
        }
        assert_eq!(sink.entries().len(), 1);
        assert_eq!(sink.close_count(), 1);
    }

    #[test]
    fn observers_do_not_share_registries() {
        let first = Observer::builder().with_config(quiet_config(4)).build();
        let second = Observer::builder().with_config(quiet_config(4)).build();
        first.counter("requests").inc();
        assert_eq!(second.counter("requests").value(), 0.0);
        first.close().unwrap();
        second.close().unwrap();
    }
}
