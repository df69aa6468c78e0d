use crate::common::{Fields, Value};
use crate::logs::Level;
use crate::trace::{CorrelationContext, Span, SpanId, TraceId};
use crate::Observer;
use std::time::SystemTime;

/// What an [`Entry`] records.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[non_exhaustive]
pub enum EntryKind {
    /// A log line.
    #[default]
    Log,
    /// A finished span, emitted when span entries are enabled on the observer.
    Span,
}

/// One buffered observation.
///
/// The message is fully formatted when the entry is created. Once the entry
/// has been handed to the observer it is never mutated; sinks receive shared
/// references to it.
#[derive(Clone, Debug, PartialEq)]
pub struct Entry {
    timestamp: SystemTime,
    level: Level,
    kind: EntryKind,
    message: String,
    trace_id: Option<TraceId>,
    span_id: Option<SpanId>,
    parent_id: Option<SpanId>,
    request_id: Option<String>,
    data: Fields,
}

impl Entry {
    /// Creates a log entry stamped with the current time and no correlation ids.
    pub fn new(level: Level, message: impl Into<String>) -> Self {
        Entry {
            timestamp: SystemTime::now(),
            level,
            kind: EntryKind::Log,
            message: message.into(),
            trace_id: None,
            span_id: None,
            parent_id: None,
            request_id: None,
            data: Fields::new(),
        }
    }

    /// Creates a log entry correlated with `cx`: its ids are copied and its
    /// attributes become the entry's initial data.
    pub fn from_context(cx: &CorrelationContext, level: Level, message: impl Into<String>) -> Self {
        Entry {
            trace_id: cx.trace_id().cloned(),
            span_id: cx.span_id().cloned(),
            parent_id: cx.parent_id().cloned(),
            request_id: cx.request_id().map(str::to_owned),
            data: cx.attributes().clone(),
            ..Entry::new(level, message)
        }
    }

    /// Creates a [`EntryKind::Span`] entry for a finished span. It carries the
    /// span's ids, the request id and attributes of the context the span was
    /// started in, and the span's own attributes, which win on name clashes.
    pub(crate) fn from_span(span: &Span, level: Level) -> Self {
        let mut data = span.context_attributes().clone();
        data.extend(span.attributes());
        Entry {
            kind: EntryKind::Span,
            trace_id: Some(span.trace_id().clone()),
            span_id: Some(span.span_id().clone()),
            parent_id: span.parent_id().cloned(),
            request_id: span.request_id().map(str::to_owned),
            data,
            ..Entry::new(level, span.name())
        }
    }

    /// Sets the kind.
    pub fn with_kind(mut self, kind: EntryKind) -> Self {
        self.kind = kind;
        self
    }

    /// Overrides the creation timestamp.
    pub fn with_timestamp(mut self, timestamp: SystemTime) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Adds a field. A field with the same name, including one copied from the
    /// context's attributes, is replaced.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    /// Adds every field of `fields`, replacing existing names.
    pub fn with_fields(mut self, fields: impl IntoIterator<Item = (String, Value)>) -> Self {
        self.data.extend(fields);
        self
    }

    /// When the entry was created.
    pub fn timestamp(&self) -> SystemTime {
        self.timestamp
    }

    /// Severity.
    pub fn level(&self) -> Level {
        self.level
    }

    /// What the entry records.
    pub fn kind(&self) -> EntryKind {
        self.kind
    }

    /// The formatted message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Trace id, if the entry was logged inside a trace.
    pub fn trace_id(&self) -> Option<&TraceId> {
        self.trace_id.as_ref()
    }

    /// Span id, if the entry was logged inside a span.
    pub fn span_id(&self) -> Option<&SpanId> {
        self.span_id.as_ref()
    }

    /// Parent span id, if any.
    pub fn parent_id(&self) -> Option<&SpanId> {
        self.parent_id.as_ref()
    }

    /// Request id, if any.
    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    /// Structured fields.
    pub fn data(&self) -> &Fields {
        &self.data
    }
}

/// Builds an entry field by field and hands it to the observer on
/// [`emit`](EntryBuilder::emit).
///
/// ```
/// use observ::{logs::Level, trace::CorrelationContext, Observer};
///
/// let observer = Observer::builder().build();
/// let cx = CorrelationContext::new();
/// let err = std::io::Error::new(std::io::ErrorKind::Other, "refused");
///
/// observer
///     .entry(&cx, Level::Error, "upstream call failed")
///     .with_field("attempt", 3)
///     .with_error(&err)
///     .emit();
/// # observer.close().unwrap();
/// ```
#[derive(Debug)]
#[must_use = "an entry is only logged when `emit` is called"]
pub struct EntryBuilder<'a> {
    observer: &'a Observer,
    entry: Entry,
}

impl<'a> EntryBuilder<'a> {
    pub(crate) fn new(observer: &'a Observer, entry: Entry) -> Self {
        EntryBuilder { observer, entry }
    }

    /// Adds a field.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.entry = self.entry.with_field(key, value);
        self
    }

    /// Records an error's message under the `error` field.
    pub fn with_error(self, err: &dyn std::error::Error) -> Self {
        let message = err.to_string();
        self.with_field("error", message)
    }

    /// Enqueues the entry. Never blocks.
    pub fn emit(self) {
        self.observer.emit(self.entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_context_copies_ids_and_attributes() {
        let cx = CorrelationContext::new()
            .with_trace_id("t1")
            .with_request_id("r1")
            .with_attribute("tenant", "acme");
        let entry = Entry::from_context(&cx, Level::Warn, "hello");

        assert_eq!(entry.trace_id().map(TraceId::as_str), Some("t1"));
        assert_eq!(entry.span_id(), None);
        assert_eq!(entry.request_id(), Some("r1"));
        assert_eq!(entry.data().get("tenant"), Some(&Value::from("acme")));
        assert_eq!(entry.kind(), EntryKind::Log);
    }

    #[test]
    fn explicit_fields_override_context_attributes() {
        let cx = CorrelationContext::new().with_attribute("user", "ctx");
        let entry = Entry::from_context(&cx, Level::Info, "m").with_field("user", "explicit");
        assert_eq!(entry.data().get("user"), Some(&Value::from("explicit")));
    }

    #[test]
    fn span_entry_carries_origin_request_and_attributes() {
        let origin = CorrelationContext::new()
            .with_request_id("req-7")
            .with_attribute("tenant", "acme")
            .with_attribute("route", "/ctx");
        let span = Span::new(
            "handle".into(),
            "t1".into(),
            "s1".into(),
            None,
            &origin,
            None,
        );
        span.set_attribute("route", "/span");

        let entry = Entry::from_span(&span, Level::Info);

        assert_eq!(entry.kind(), EntryKind::Span);
        assert_eq!(entry.request_id(), Some("req-7"));
        assert_eq!(entry.data().get("tenant"), Some(&Value::from("acme")));
        assert_eq!(entry.data().get("route"), Some(&Value::from("/span")));
    }

    #[test]
    fn entry_does_not_track_later_context_changes() {
        let cx = CorrelationContext::new().with_attribute("a", 1);
        let entry = Entry::from_context(&cx, Level::Info, "m");
        let _changed = cx.with_attribute("b", 2);
        assert_eq!(entry.data().len(), 1);
    }
}
