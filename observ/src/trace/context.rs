//! Correlation context propagation.
//!
//! A [`CorrelationContext`] carries the identifiers that tie log entries and
//! spans of one logical request together: trace id, span id, parent span id
//! and request id, plus a map of attributes copied into every entry logged
//! with it. It also carries the caller's own execution-scoped state: a
//! deadline and arbitrary typed values.
//!
//! Contexts are immutable. Every `with_*` call returns a new context and
//! leaves the original untouched, so a context can be shared between threads
//! and read concurrently without locking.
use crate::common::{Fields, Value};
use crate::obs_warn;
use crate::trace::{SpanId, TraceId};
use std::any::{Any, TypeId};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Instant;

thread_local! {
    static CURRENT_CONTEXT: RefCell<ContextStack> = RefCell::new(ContextStack::default());
}

type ValueMap = HashMap<TypeId, Arc<dyn Any + Send + Sync>>;

/// Identifiers, attributes and caller state for one logical request.
///
/// # Examples
///
/// ```
/// use observ::trace::CorrelationContext;
///
/// let cx = CorrelationContext::new()
///     .with_request_id("req-7")
///     .with_attribute("tenant", "acme");
///
/// assert_eq!(cx.request_id(), Some("req-7"));
/// assert!(cx.trace_id().is_none());
/// assert_eq!(cx.attributes().get("tenant").map(|v| v.to_string()), Some("acme".into()));
/// ```
#[derive(Clone, Default)]
pub struct CorrelationContext {
    trace_id: Option<TraceId>,
    span_id: Option<SpanId>,
    parent_id: Option<SpanId>,
    request_id: Option<Arc<str>>,
    attributes: Option<Arc<Fields>>,
    deadline: Option<Instant>,
    values: Option<Arc<ValueMap>>,
}

impl CorrelationContext {
    /// Creates an empty context: no ids, no attributes, no deadline.
    pub fn new() -> Self {
        CorrelationContext::default()
    }

    /// Returns an immutable snapshot of the current thread's context.
    pub fn current() -> Self {
        Self::map_current(|cx| cx.clone())
    }

    /// Applies a function to the current thread's context.
    ///
    /// Attaching another context from inside `f` panics.
    pub fn map_current<T>(f: impl FnOnce(&CorrelationContext) -> T) -> T {
        CURRENT_CONTEXT.with(|stack| f(&stack.borrow().current_cx))
    }

    /// The trace this context belongs to, if any.
    pub fn trace_id(&self) -> Option<&TraceId> {
        self.trace_id.as_ref()
    }

    /// The span currently active in this context, if any.
    pub fn span_id(&self) -> Option<&SpanId> {
        self.span_id.as_ref()
    }

    /// The parent of the active span, if any.
    pub fn parent_id(&self) -> Option<&SpanId> {
        self.parent_id.as_ref()
    }

    /// The request id, if any.
    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    /// Attributes copied into every entry logged with this context.
    pub fn attributes(&self) -> &Fields {
        static EMPTY: Fields = Fields::new();
        self.attributes.as_deref().unwrap_or(&EMPTY)
    }

    /// The caller supplied deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Whether the deadline, if any, has passed.
    pub fn is_expired(&self) -> bool {
        self.deadline.map_or(false, |d| Instant::now() >= d)
    }

    /// Returns a copy of this context with the given trace id.
    ///
    /// An empty id clears the trace id, so a missing inbound header can be
    /// passed through unchecked.
    pub fn with_trace_id(&self, trace_id: impl Into<TraceId>) -> Self {
        let trace_id = trace_id.into();
        CorrelationContext {
            trace_id: (!trace_id.as_str().is_empty()).then_some(trace_id),
            ..self.clone()
        }
    }

    /// Returns a copy of this context with the given request id.
    /// An empty id clears the request id.
    pub fn with_request_id(&self, request_id: impl AsRef<str>) -> Self {
        let request_id = request_id.as_ref();
        CorrelationContext {
            request_id: (!request_id.is_empty()).then(|| Arc::from(request_id)),
            ..self.clone()
        }
    }

    /// Returns a copy of this context with one more attribute. An existing
    /// attribute with the same key is replaced.
    pub fn with_attribute(&self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let mut attributes = self.attributes.as_deref().cloned().unwrap_or_default();
        attributes.insert(key.into(), value.into());
        CorrelationContext {
            attributes: Some(Arc::new(attributes)),
            ..self.clone()
        }
    }

    /// Returns a copy of this context with the given deadline.
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        CorrelationContext {
            deadline: Some(deadline),
            ..self.clone()
        }
    }

    /// Returns a reference to the caller value of type `T`, if one was set.
    ///
    /// ```
    /// use observ::trace::CorrelationContext;
    ///
    /// #[derive(Debug, PartialEq)]
    /// struct UserId(u64);
    ///
    /// let cx = CorrelationContext::new().with_value(UserId(42));
    /// assert_eq!(cx.get::<UserId>(), Some(&UserId(42)));
    /// assert_eq!(cx.get::<String>(), None);
    /// ```
    pub fn get<T: 'static>(&self) -> Option<&T> {
        self.values
            .as_ref()?
            .get(&TypeId::of::<T>())?
            .downcast_ref()
    }

    /// Returns a copy of this context with a caller value of type `T`.
    /// A previous value of the same type is replaced.
    pub fn with_value<T: 'static + Send + Sync>(&self, value: T) -> Self {
        let mut values = self.values.as_deref().cloned().unwrap_or_default();
        values.insert(TypeId::of::<T>(), Arc::new(value));
        CorrelationContext {
            values: Some(Arc::new(values)),
            ..self.clone()
        }
    }

    /// Returns the context a new span runs in: same trace, request,
    /// attributes and caller state, with `span_id` active and the previously
    /// active span recorded as its parent.
    pub(crate) fn with_span(&self, trace_id: TraceId, span_id: SpanId) -> Self {
        CorrelationContext {
            trace_id: Some(trace_id),
            parent_id: self.span_id.clone(),
            span_id: Some(span_id),
            ..self.clone()
        }
    }

    /// Replaces the current context on this thread with this context.
    ///
    /// Dropping the returned [`ContextGuard`] restores the previous context.
    ///
    /// ```
    /// use observ::trace::CorrelationContext;
    ///
    /// let guard = CorrelationContext::new().with_request_id("r1").attach();
    /// assert_eq!(CorrelationContext::current().request_id(), Some("r1"));
    ///
    /// drop(guard);
    /// assert_eq!(CorrelationContext::current().request_id(), None);
    /// ```
    pub fn attach(self) -> ContextGuard {
        let cx_pos = CURRENT_CONTEXT.with(|stack| stack.borrow_mut().push(self));

        ContextGuard {
            cx_pos,
            _marker: PhantomData,
        }
    }
}

impl fmt::Debug for CorrelationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CorrelationContext")
            .field("trace_id", &self.trace_id)
            .field("span_id", &self.span_id)
            .field("parent_id", &self.parent_id)
            .field("request_id", &self.request_id)
            .field("attributes", &self.attributes())
            .field("deadline", &self.deadline)
            .field("values count", &self.values.as_ref().map_or(0, |v| v.len()))
            .finish()
    }
}

/// A guard that resets the current context to the prior context when dropped.
#[derive(Debug)]
pub struct ContextGuard {
    cx_pos: u16,
    // !Send: the position refers to this thread's stack.
    _marker: PhantomData<*const ()>,
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        let pos = self.cx_pos;
        if pos > ContextStack::BASE_POS && pos < ContextStack::MAX_POS {
            CURRENT_CONTEXT.with(|stack| stack.borrow_mut().pop_id(pos));
        }
    }
}

/// The attached contexts of one thread.
///
/// Guards may be dropped out of order; a slot is cleared when its guard is
/// dropped and the current context only changes once the top is popped.
struct ContextStack {
    current_cx: CorrelationContext,
    stack: Vec<Option<CorrelationContext>>,
    _marker: PhantomData<*const ()>,
}

impl ContextStack {
    const BASE_POS: u16 = 0;
    const MAX_POS: u16 = u16::MAX;
    const INITIAL_CAPACITY: usize = 8;

    fn push(&mut self, cx: CorrelationContext) -> u16 {
        let next_id = self.stack.len() + 1;
        if next_id < ContextStack::MAX_POS.into() {
            let previous = std::mem::replace(&mut self.current_cx, cx);
            self.stack.push(Some(previous));
            next_id as u16
        } else {
            obs_warn!(
                name: "CorrelationContext.AttachFailed",
                max_depth = ContextStack::MAX_POS,
                message = "too many attached contexts, current context left unchanged"
            );
            ContextStack::MAX_POS
        }
    }

    fn pop_id(&mut self, pos: u16) {
        let len = self.stack.len() as u16;
        if pos == len {
            // Skip slots whose guards were already dropped out of order.
            while let Some(None) = self.stack.last() {
                let _ = self.stack.pop();
            }
            if let Some(Some(previous)) = self.stack.pop() {
                self.current_cx = previous;
            }
        } else if pos < len {
            let _ = self.stack[pos as usize].take();
        } else {
            obs_warn!(
                name: "CorrelationContext.PopOutOfBounds",
                position = pos,
                stack_length = len
            );
        }
    }
}

impl Default for ContextStack {
    fn default() -> Self {
        ContextStack {
            current_cx: CorrelationContext::default(),
            stack: Vec::with_capacity(ContextStack::INITIAL_CAPACITY),
            _marker: PhantomData,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn with_methods_leave_the_original_untouched() {
        let base = CorrelationContext::new().with_attribute("a", 1);
        let derived = base.with_attribute("b", true).with_request_id("r");

        assert_eq!(base.attributes().len(), 1);
        assert_eq!(base.request_id(), None);
        assert_eq!(derived.attributes().len(), 2);
        assert_eq!(derived.request_id(), Some("r"));
    }

    #[test]
    fn empty_ids_are_treated_as_absent() {
        let cx = CorrelationContext::new()
            .with_trace_id("")
            .with_request_id("");
        assert!(cx.trace_id().is_none());
        assert!(cx.request_id().is_none());
    }

    #[test]
    fn with_span_chains_parent_ids() {
        let root = CorrelationContext::new().with_span("t1".into(), "s1".into());
        let child = root.with_span("t1".into(), "s2".into());

        assert_eq!(root.parent_id(), None);
        assert_eq!(child.span_id().map(SpanId::as_str), Some("s2"));
        assert_eq!(child.parent_id().map(SpanId::as_str), Some("s1"));
        assert_eq!(child.trace_id().map(TraceId::as_str), Some("t1"));
    }

    #[test]
    fn deadline_expiry() {
        let past = CorrelationContext::new().with_deadline(Instant::now());
        let future = CorrelationContext::new().with_deadline(Instant::now() + Duration::from_secs(60));

        assert!(past.is_expired());
        assert!(!future.is_expired());
        assert!(!CorrelationContext::new().is_expired());
    }

    #[test]
    fn nested_attach_restores_in_order() {
        let _outer = CorrelationContext::new().with_request_id("outer").attach();
        {
            let _inner = CorrelationContext::current().with_attribute("k", "v").attach();
            let current = CorrelationContext::current();
            assert_eq!(current.request_id(), Some("outer"));
            assert_eq!(current.attributes().len(), 1);
        }
        let current = CorrelationContext::current();
        assert_eq!(current.request_id(), Some("outer"));
        assert!(current.attributes().is_empty());
    }

    #[test]
    fn out_of_order_guard_drop() {
        let first = CorrelationContext::new().with_request_id("first").attach();
        let second = CorrelationContext::new().with_request_id("second").attach();

        drop(first);
        assert_eq!(CorrelationContext::current().request_id(), Some("second"));

        drop(second);
        assert_eq!(CorrelationContext::current().request_id(), None);
    }

    #[test]
    fn contexts_are_shareable_across_threads() {
        let cx = CorrelationContext::new().with_attribute("k", "v");
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let cx = cx.clone();
                std::thread::spawn(move || cx.attributes().len())
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), 1);
        }
    }
}
