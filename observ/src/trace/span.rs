//! # Span
//!
//! A `Span` is a timed unit of work within a trace. It is started with
//! [`Observer::start_span`], which also returns the child context that nested
//! work should run in, and terminated exactly once with [`Span::end`].
//!
//! `Span` is a cheaply cloneable handle: every clone refers to the same span,
//! so status, attributes and events can be recorded from any thread holding
//! one. After the end time has been set the span is frozen; further mutations
//! are ignored.
//!
//! [`Observer::start_span`]: crate::Observer::start_span
use crate::common::{Fields, Value};
use crate::obs_debug;
use crate::trace::{CorrelationContext, SpanId, TraceId};
use std::fmt;
use std::ops::Deref;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant, SystemTime};

/// Receives spans as they end.
pub(crate) trait SpanRecorder: Send + Sync {
    fn on_end(&self, span: &Span);
}

/// Status of a span. A new span starts out `Ok`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum SpanStatus {
    /// The operation completed successfully.
    #[default]
    Ok,
    /// The operation failed.
    Error {
        /// Human readable description of the failure
        description: String,
    },
}

impl SpanStatus {
    /// Creates an error status with the given description.
    pub fn error(description: impl Into<String>) -> Self {
        SpanStatus::Error {
            description: description.into(),
        }
    }

    /// Whether this is an error status.
    pub fn is_error(&self) -> bool {
        matches!(self, SpanStatus::Error { .. })
    }
}

impl fmt::Display for SpanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpanStatus::Ok => f.write_str("ok"),
            SpanStatus::Error { .. } => f.write_str("error"),
        }
    }
}

/// A timestamped, named event recorded on a span.
#[derive(Clone, Debug, PartialEq)]
pub struct SpanEvent {
    /// Event name
    pub name: String,
    /// When the event was recorded
    pub timestamp: SystemTime,
    /// Event attributes
    pub attributes: Fields,
}

#[derive(Debug)]
struct SpanState {
    end: Option<(SystemTime, Instant)>,
    status: SpanStatus,
    attributes: Fields,
    events: Vec<SpanEvent>,
}

struct SpanInner {
    name: String,
    trace_id: TraceId,
    span_id: SpanId,
    parent_id: Option<SpanId>,
    request_id: Option<Arc<str>>,
    // Attributes of the context the span was started in.
    context_attributes: Fields,
    start_time: SystemTime,
    started: Instant,
    state: Mutex<SpanState>,
    recorder: Option<Weak<dyn SpanRecorder>>,
}

/// Thread safe handle to a span.
#[derive(Clone)]
pub struct Span {
    inner: Arc<SpanInner>,
}

impl Span {
    pub(crate) fn new(
        name: String,
        trace_id: TraceId,
        span_id: SpanId,
        parent_id: Option<SpanId>,
        origin: &CorrelationContext,
        recorder: Option<Weak<dyn SpanRecorder>>,
    ) -> Self {
        Span {
            inner: Arc::new(SpanInner {
                name,
                trace_id,
                span_id,
                parent_id,
                request_id: origin.request_id().map(Arc::from),
                context_attributes: origin.attributes().clone(),
                start_time: SystemTime::now(),
                started: Instant::now(),
                state: Mutex::new(SpanState {
                    end: None,
                    status: SpanStatus::Ok,
                    attributes: Fields::new(),
                    events: Vec::new(),
                }),
                recorder,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, SpanState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` on the span state if the span is still open.
    fn with_open_state(&self, op: &'static str, f: impl FnOnce(&mut SpanState)) {
        let mut state = self.state();
        if state.end.is_some() {
            obs_debug!(
                name: "Span.MutationAfterEnd",
                span_name = self.inner.name,
                operation = op
            );
            return;
        }
        f(&mut state);
    }

    /// The span's name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The id of the trace this span belongs to.
    pub fn trace_id(&self) -> &TraceId {
        &self.inner.trace_id
    }

    /// This span's id.
    pub fn span_id(&self) -> &SpanId {
        &self.inner.span_id
    }

    /// The id of the span this span was started under, if any.
    pub fn parent_id(&self) -> Option<&SpanId> {
        self.inner.parent_id.as_ref()
    }

    /// Request id of the context the span was started in.
    pub fn request_id(&self) -> Option<&str> {
        self.inner.request_id.as_deref()
    }

    /// Attributes of the context the span was started in. Attributes set on
    /// the span itself are kept apart, see [`Span::attributes`].
    pub fn context_attributes(&self) -> &Fields {
        &self.inner.context_attributes
    }

    /// Wall clock start time.
    pub fn start_time(&self) -> SystemTime {
        self.inner.start_time
    }

    /// Wall clock end time, `None` until the span has ended.
    pub fn end_time(&self) -> Option<SystemTime> {
        self.state().end.map(|(time, _)| time)
    }

    /// Whether [`Span::end`] has been called.
    pub fn is_ended(&self) -> bool {
        self.state().end.is_some()
    }

    /// Elapsed time of the span: end minus start once ended, now minus start
    /// while still open.
    pub fn duration(&self) -> Duration {
        match self.state().end {
            Some((_, ended)) => ended.saturating_duration_since(self.inner.started),
            None => self.inner.started.elapsed(),
        }
    }

    /// Current status.
    pub fn status(&self) -> SpanStatus {
        self.state().status.clone()
    }

    /// A copy of the span's attributes.
    pub fn attributes(&self) -> Fields {
        self.state().attributes.clone()
    }

    /// A copy of the span's events in recording order.
    pub fn events(&self) -> Vec<SpanEvent> {
        self.state().events.clone()
    }

    /// Sets the status of this span.
    pub fn set_status(&self, status: SpanStatus) {
        self.with_open_state("set_status", |state| state.status = status);
    }

    /// Sets a single attribute, replacing any previous value for the key.
    pub fn set_attribute(&self, key: impl Into<String>, value: impl Into<Value>) {
        let (key, value) = (key.into(), value.into());
        self.with_open_state("set_attribute", |state| {
            state.attributes.insert(key, value);
        });
    }

    /// Records an event without attributes.
    pub fn add_event(&self, name: impl Into<String>) {
        self.add_event_with_attributes(name, Fields::new());
    }

    /// Records an event with attributes.
    pub fn add_event_with_attributes(&self, name: impl Into<String>, attributes: Fields) {
        let event = SpanEvent {
            name: name.into(),
            timestamp: SystemTime::now(),
            attributes,
        };
        self.with_open_state("add_event", |state| state.events.push(event));
    }

    /// Marks the span failed, recording the error as an event and as the
    /// status description.
    pub fn record_error(&self, err: &dyn std::error::Error) {
        let description = err.to_string();
        let mut attributes = Fields::new();
        attributes.insert("error".into(), Value::from(description.as_str()));
        self.add_event_with_attributes("exception", attributes);
        self.set_status(SpanStatus::error(description));
    }

    /// Stamps the end time and hands the span to the observer that started it.
    ///
    /// Only the first call has an effect.
    pub fn end(&self) {
        {
            let mut state = self.state();
            if state.end.is_some() {
                obs_debug!(name: "Span.DoubleEnd", span_name = self.inner.name);
                return;
            }
            state.end = Some((SystemTime::now(), Instant::now()));
        }

        if let Some(recorder) = self.inner.recorder.as_ref().and_then(Weak::upgrade) {
            recorder.on_end(self);
        }
    }

    /// Whether both handles refer to the same span.
    pub fn ptr_eq(&self, other: &Span) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        f.debug_struct("Span")
            .field("name", &self.inner.name)
            .field("trace_id", &self.inner.trace_id)
            .field("span_id", &self.inner.span_id)
            .field("parent_id", &self.inner.parent_id)
            .field("request_id", &self.inner.request_id)
            .field("start_time", &self.inner.start_time)
            .field("state", &*state)
            .finish()
    }
}

/// Ends its span when dropped, including during unwinding.
///
/// Created by [`Observer::span`](crate::Observer::span). Dereferences to the
/// [`Span`]; [`SpanGuard::context`] is the context nested work runs in.
#[derive(Debug)]
#[must_use = "dropping the guard ends the span immediately"]
pub struct SpanGuard {
    span: Span,
    cx: CorrelationContext,
}

impl SpanGuard {
    pub(crate) fn new(span: Span, cx: CorrelationContext) -> Self {
        SpanGuard { span, cx }
    }

    /// The child context carrying this span.
    pub fn context(&self) -> &CorrelationContext {
        &self.cx
    }

    /// A handle to the guarded span.
    pub fn span(&self) -> &Span {
        &self.span
    }
}

impl Deref for SpanGuard {
    type Target = Span;

    fn deref(&self) -> &Span {
        &self.span
    }
}

impl Drop for SpanGuard {
    fn drop(&mut self) {
        if !self.span.is_ended() {
            self.span.end();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn detached(name: &str) -> Span {
        Span::new(
            name.into(),
            "t".into(),
            "s".into(),
            None,
            &CorrelationContext::new(),
            None,
        )
    }

    #[derive(Default)]
    struct CountingRecorder(AtomicUsize);

    impl SpanRecorder for CountingRecorder {
        fn on_end(&self, _span: &Span) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn new_span_is_open_and_ok() {
        let span = detached("op");
        assert_eq!(span.status(), SpanStatus::Ok);
        assert!(span.end_time().is_none());
        assert!(!span.is_ended());
    }

    #[test]
    fn end_is_idempotent_and_notifies_once() {
        let recorder = Arc::new(CountingRecorder::default());
        let weak: Weak<dyn SpanRecorder> = Arc::downgrade(&recorder) as Weak<dyn SpanRecorder>;
        let span = Span::new(
            "op".into(),
            "t".into(),
            "s".into(),
            None,
            &CorrelationContext::new(),
            Some(weak),
        );

        span.end();
        let first_end = span.end_time();
        span.end();

        assert_eq!(recorder.0.load(Ordering::SeqCst), 1);
        assert_eq!(span.end_time(), first_end);
    }

    #[test]
    fn origin_context_is_captured_at_start() {
        let origin = CorrelationContext::new()
            .with_request_id("req-3")
            .with_attribute("tenant", "acme");
        let span = Span::new("op".into(), "t".into(), "s".into(), None, &origin, None);
        span.set_attribute("rows", 4);

        assert_eq!(span.request_id(), Some("req-3"));
        assert_eq!(span.context_attributes().get("tenant"), Some(&Value::from("acme")));
        assert!(!span.attributes().contains_key("tenant"));
    }

    #[test]
    fn mutations_after_end_are_ignored() {
        let span = detached("op");
        span.set_attribute("before", 1);
        span.end();
        span.set_attribute("after", 2);
        span.add_event("late");
        span.set_status(SpanStatus::error("late"));

        assert_eq!(span.attributes().len(), 1);
        assert!(span.events().is_empty());
        assert_eq!(span.status(), SpanStatus::Ok);
    }

    #[test]
    fn duration_is_frozen_after_end() {
        let span = detached("op");
        span.end();
        let frozen = span.duration();
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(span.duration(), frozen);
    }

    #[test]
    fn events_keep_recording_order() {
        let span = detached("op");
        span.add_event("first");
        span.add_event("second");
        let names: Vec<_> = span.events().into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["first", "second"]);
    }

    #[test]
    fn record_error_sets_error_status() {
        let span = detached("op");
        let err = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        span.record_error(&err);

        assert_eq!(span.status(), SpanStatus::error("disk full"));
        assert_eq!(span.events()[0].name, "exception");
    }

    #[test]
    fn guard_ends_span_on_drop() {
        let span = detached("op");
        {
            let _guard = SpanGuard::new(span.clone(), CorrelationContext::new());
        }
        assert!(span.is_ended());
    }

    #[test]
    fn guard_ends_span_on_unwind() {
        let span = detached("op");
        let handle = span.clone();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let _guard = SpanGuard::new(handle, CorrelationContext::new());
            panic!("boom");
        }));
        assert!(result.is_err());
        assert!(span.is_ended());
    }

    #[test]
    fn clones_share_state_across_threads() {
        let span = detached("op");
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let span = span.clone();
                std::thread::spawn(move || span.set_attribute(format!("k{}", i), i))
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(span.attributes().len(), 4);
    }
}
