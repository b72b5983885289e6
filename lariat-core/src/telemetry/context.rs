//! TraceContext - request-scoped span bookkeeping.
//!
//! One context exists per logical request. It owns the trace identity, the
//! active-span stack (strict LIFO for call-scoped spans), and the handle to
//! the finished-span buffer. The context is explicitly constructed and torn
//! down with the request; there is no process-global mutable state.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

use super::buffer::TraceBuffer;
use super::span::{generate_trace_id, Span};

#[derive(Debug)]
struct ContextInner {
    trace_id: String,
    service: String,
    /// Active-span stack, bottom to top. Only call-scoped spans live here;
    /// resource-bound spans are tracked by the buffer and the binding table.
    stack: Vec<Span>,
}

/// Request-scoped trace state. Cheap to clone; clones share the same stack
/// and buffer.
#[derive(Debug, Clone)]
pub struct TraceContext {
    inner: Arc<Mutex<ContextInner>>,
    buffer: TraceBuffer,
}

impl TraceContext {
    /// Start a fresh trace for one request.
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ContextInner {
                trace_id: generate_trace_id(),
                service: service.into(),
                stack: Vec::new(),
            })),
            buffer: TraceBuffer::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ContextInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn trace_id(&self) -> String {
        self.lock().trace_id.clone()
    }

    pub fn service(&self) -> String {
        self.lock().service.clone()
    }

    pub fn buffer(&self) -> &TraceBuffer {
        &self.buffer
    }

    /// The span on top of the active stack, if any.
    pub fn active_span(&self) -> Option<Span> {
        self.lock().stack.last().cloned()
    }

    /// Current nesting depth of the active stack.
    pub fn depth(&self) -> usize {
        self.lock().stack.len()
    }

    /// Create a span parented on the current stack top (root if the stack is
    /// empty). The span is tracked by the buffer but NOT pushed; pushing is
    /// the call scope's decision, and resource-bound spans never get pushed.
    pub fn start_span(&self, name: impl Into<String>) -> Span {
        let inner = self.lock();
        let parent_id = inner.stack.last().map(|s| s.span_id());
        let span = Span::new(name, inner.trace_id.clone(), parent_id, inner.service.clone());
        drop(inner);
        self.buffer.track(&span);
        span
    }

    /// Push a span onto the active stack.
    pub(crate) fn push(&self, span: &Span) {
        span.activate();
        self.lock().stack.push(span.clone());
    }

    /// Pop entries until the given span has been removed, returning any
    /// unfinished entries that were stacked above it (deepest first). The
    /// caller decides what to do with the stragglers.
    ///
    /// If the span is not on the stack (already removed by a drop guard)
    /// nothing is popped.
    pub(crate) fn pop_through(&self, span: &Span) -> Vec<Span> {
        let span_id = span.span_id();
        let mut inner = self.lock();
        let Some(position) = inner.stack.iter().rposition(|s| s.span_id() == span_id) else {
            debug!(span_id = %span_id, "span no longer on the active stack");
            return Vec::new();
        };
        let mut above: Vec<Span> = inner.stack.drain(position..).collect();
        // First drained entry is the span itself; the rest are stragglers,
        // returned top-of-stack first so children close before parents.
        above.remove(0);
        above.reverse();
        above
    }

    /// Take the whole active stack, top first.
    pub(crate) fn drain_stack(&self) -> Vec<Span> {
        let mut stack = std::mem::take(&mut self.lock().stack);
        stack.reverse();
        stack
    }
}
