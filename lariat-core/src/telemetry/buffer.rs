//! Finished-span buffer.
//!
//! The buffer is the owner of span lifetimes: it keeps a strong handle to
//! every open span (so a resource binding's weak back-reference stays
//! resolvable) and collects the immutable [`SpanRecord`] of every finished
//! span exactly once. Eviction beyond [`TraceBuffer::drain`] is the
//! exporter's problem, not this engine's.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::trace;

use super::span::{Span, SpanRecord};

#[derive(Debug, Default)]
struct BufferInner {
    /// Strong handles to started-but-unfinished spans.
    open: Vec<Span>,
    /// Export records, one per finished span, in finish order.
    finished: Vec<SpanRecord>,
}

/// Shared buffer of open spans and finished records.
#[derive(Debug, Clone, Default)]
pub struct TraceBuffer {
    inner: Arc<Mutex<BufferInner>>,
}

impl TraceBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BufferInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Hold a strong handle to an open span until it finishes.
    pub(crate) fn track(&self, span: &Span) {
        let mut inner = self.lock();
        inner.open.push(span.clone());
    }

    /// Finish a span and take its record.
    ///
    /// This is the single handoff point from mutable span to immutable
    /// record. Returns true only when this call performed the finish; a span
    /// already finished elsewhere is left untouched.
    pub fn complete(&self, span: &Span) -> bool {
        if !span.finish() {
            return false;
        }
        let record = span.to_record();
        let span_id = record.span_id.clone();
        let mut inner = self.lock();
        inner.open.retain(|open| open.span_id() != span_id);
        inner.finished.push(record);
        trace!(span_id = %span_id, "span handed to trace buffer");
        true
    }

    /// Number of started-but-unfinished spans still owned by the buffer.
    pub fn open_len(&self) -> usize {
        self.lock().open.len()
    }

    /// Number of finished records awaiting drain.
    pub fn finished_len(&self) -> usize {
        self.lock().finished.len()
    }

    /// Take all finished records, oldest first.
    pub fn drain(&self) -> Vec<SpanRecord> {
        std::mem::take(&mut self.lock().finished)
    }

    /// Take every still-open span. Shutdown-only: the sweeper uses this to
    /// close spans that lost their owner (e.g. a binding replaced before its
    /// resource was destroyed).
    pub(crate) fn take_open(&self) -> Vec<Span> {
        std::mem::take(&mut self.lock().open)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::context::TraceContext;

    #[test]
    fn complete_records_each_span_once() {
        let context = TraceContext::new("test-service");
        let buffer = context.buffer().clone();
        let span = context.start_span("op");

        assert_eq!(buffer.open_len(), 1);
        assert!(buffer.complete(&span));
        assert!(!buffer.complete(&span));

        assert_eq!(buffer.open_len(), 0);
        assert_eq!(buffer.finished_len(), 1);
    }

    #[test]
    fn drain_empties_the_finished_records() {
        let context = TraceContext::new("test-service");
        let buffer = context.buffer().clone();
        buffer.complete(&context.start_span("a"));
        buffer.complete(&context.start_span("b"));

        let records = buffer.drain();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].name, "a");
        assert!(buffer.drain().is_empty());
    }

    #[test]
    fn open_handles_keep_weak_references_alive() {
        let context = TraceContext::new("test-service");
        let buffer = context.buffer().clone();
        let weak = {
            let span = context.start_span("held");
            span.downgrade()
            // the local strong handle drops here
        };

        // The buffer still owns the span, so the binding-side weak resolves.
        let span = weak.upgrade().expect("buffer should keep the span alive");
        buffer.complete(&span);
        drop(span);
        // After finish the buffer holds only the record.
        assert!(weak.upgrade().is_none());
    }
}
