//! Span types for the lifecycle engine.
//!
//! A [`Span`] is a timed, taggable record of one unit of work. Handles are
//! cheap clones over shared state so the same span can be referenced from the
//! active-call stack, a resource binding, and an integration callback at the
//! same time; [`WeakSpan`] is the non-owning form held by resource bindings.
//!
//! The lifecycle is a one-way state machine:
//!
//! ```text
//! Created ──> Active ──> Finished (terminal)
//! ```
//!
//! Every mutator is a silent no-op once the span is finished, and
//! [`Span::finish`] is idempotent: the first call freezes duration, tags and
//! error state for good.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use uuid::Uuid;

use crate::error::CallError;

/// Generate a unique 16-character hex span ID (8 bytes).
fn generate_span_id() -> String {
    let uuid = Uuid::now_v7();
    hex::encode(&uuid.as_bytes()[8..16])
}

/// Generate a 32-character hex trace ID (UUID v7, time-ordered).
pub(crate) fn generate_trace_id() -> String {
    Uuid::now_v7().simple().to_string()
}

/// Convert SystemTime to nanoseconds since Unix epoch.
fn system_time_to_nanos(time: &SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

/// Lifecycle state of a span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SpanStatus {
    /// Constructed but not yet tracked by a call scope or resource binding.
    Created,
    /// Tracked; tags and metrics may be mutated.
    Active,
    /// Terminal. No transition is defined out of this state.
    Finished,
}

/// Structured error details recorded on a span, at most once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorInfo {
    pub message: String,
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

#[derive(Debug)]
struct SpanInner {
    span_id: String,
    trace_id: String,
    parent_id: Option<String>,
    name: String,
    resource: String,
    service: String,
    span_type: String,
    meta: HashMap<String, String>,
    metrics: HashMap<String, f64>,
    start_time_unix_nano: u64,
    start_instant: Instant,
    duration: Option<Duration>,
    error: bool,
    error_info: Option<ErrorInfo>,
    status: SpanStatus,
}

/// Shared handle to one span.
#[derive(Debug, Clone)]
pub struct Span {
    inner: Arc<Mutex<SpanInner>>,
}

/// Non-owning back-reference to a span.
///
/// Resource bindings hold this form so that a binding never extends a span's
/// lifetime past its eviction from the trace buffer.
#[derive(Debug, Clone)]
pub struct WeakSpan {
    inner: Weak<Mutex<SpanInner>>,
}

impl WeakSpan {
    /// Upgrade to a strong handle, if the span is still alive.
    pub fn upgrade(&self) -> Option<Span> {
        self.inner.upgrade().map(|inner| Span { inner })
    }
}

impl Span {
    /// Create a new span. Name doubles as the default resource.
    pub(crate) fn new(
        name: impl Into<String>,
        trace_id: String,
        parent_id: Option<String>,
        service: String,
    ) -> Self {
        let name = name.into();
        let now = SystemTime::now();
        Self {
            inner: Arc::new(Mutex::new(SpanInner {
                span_id: generate_span_id(),
                trace_id,
                parent_id,
                resource: name.clone(),
                name,
                service,
                span_type: String::new(),
                meta: HashMap::new(),
                metrics: HashMap::new(),
                start_time_unix_nano: system_time_to_nanos(&now),
                start_instant: Instant::now(),
                duration: None,
                error: false,
                error_info: None,
                status: SpanStatus::Created,
            })),
        }
    }

    // A poisoned lock means some callback panicked mid-mutation. The span
    // data is still structurally sound (String/HashMap writes), and teardown
    // paths must keep working, so recover the guard instead of propagating.
    fn lock(&self) -> MutexGuard<'_, SpanInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn span_id(&self) -> String {
        self.lock().span_id.clone()
    }

    pub fn trace_id(&self) -> String {
        self.lock().trace_id.clone()
    }

    pub fn parent_id(&self) -> Option<String> {
        self.lock().parent_id.clone()
    }

    pub fn name(&self) -> String {
        self.lock().name.clone()
    }

    pub fn status(&self) -> SpanStatus {
        self.lock().status
    }

    pub fn is_finished(&self) -> bool {
        self.lock().status == SpanStatus::Finished
    }

    /// Duration of the span; `None` until finished.
    pub fn duration(&self) -> Option<Duration> {
        self.lock().duration
    }

    pub fn error(&self) -> bool {
        self.lock().error
    }

    /// Read a single tag.
    pub fn tag(&self, key: &str) -> Option<String> {
        self.lock().meta.get(key).cloned()
    }

    /// Read a single metric.
    pub fn metric(&self, key: &str) -> Option<f64> {
        self.lock().metrics.get(key).copied()
    }

    /// Set the specific resource name (file path, SQL text, command line).
    pub fn set_resource(&self, resource: impl Into<String>) {
        let mut inner = self.lock();
        if inner.status != SpanStatus::Finished {
            inner.resource = resource.into();
        }
    }

    /// Set the category tag, e.g. "system" or "http.client".
    pub fn set_span_type(&self, span_type: impl Into<String>) {
        let mut inner = self.lock();
        if inner.status != SpanStatus::Finished {
            inner.span_type = span_type.into();
        }
    }

    /// Set a string tag. Last write wins; no-op once finished.
    pub fn set_tag(&self, key: impl Into<String>, value: impl Into<String>) {
        let mut inner = self.lock();
        if inner.status != SpanStatus::Finished {
            inner.meta.insert(key.into(), value.into());
        }
    }

    /// Set a numeric metric. No-op once finished.
    pub fn set_metric(&self, key: impl Into<String>, value: f64) {
        let mut inner = self.lock();
        if inner.status != SpanStatus::Finished {
            inner.metrics.insert(key.into(), value);
        }
    }

    /// Record a structured error. Only the first call sticks; the error flag
    /// and `error.*` tags mirror it for export.
    pub fn record_error(&self, error: &CallError) {
        let mut inner = self.lock();
        if inner.status == SpanStatus::Finished || inner.error_info.is_some() {
            return;
        }
        inner.error = true;
        inner
            .meta
            .insert("error.message".to_string(), error.message.clone());
        inner.meta.insert("error.type".to_string(), error.kind.clone());
        if let Some(stack) = &error.stack {
            inner.meta.insert("error.stack".to_string(), stack.clone());
        }
        inner.error_info = Some(ErrorInfo {
            message: error.message.clone(),
            kind: error.kind.clone(),
            stack: error.stack.clone(),
        });
    }

    /// Flag the span as errored with a bare message tag, without structured
    /// details. Used by the resource teardown paths.
    pub fn record_error_message(&self, message: impl Into<String>) {
        let mut inner = self.lock();
        if inner.status == SpanStatus::Finished {
            return;
        }
        inner.error = true;
        inner
            .meta
            .insert("error.message".to_string(), message.into());
    }

    /// Mark the span as tracked by a call scope or resource binding.
    pub(crate) fn activate(&self) {
        let mut inner = self.lock();
        if inner.status == SpanStatus::Created {
            inner.status = SpanStatus::Active;
        }
    }

    /// Transition to Finished, freezing the duration.
    ///
    /// Returns true only for the call that performed the transition; any
    /// later call is a no-op and returns false.
    pub fn finish(&self) -> bool {
        let mut inner = self.lock();
        if inner.status == SpanStatus::Finished {
            return false;
        }
        inner.duration = Some(inner.start_instant.elapsed());
        inner.status = SpanStatus::Finished;
        true
    }

    /// Non-owning back-reference for resource bindings.
    pub fn downgrade(&self) -> WeakSpan {
        WeakSpan {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Immutable snapshot for export.
    pub fn to_record(&self) -> SpanRecord {
        let inner = self.lock();
        SpanRecord {
            span_id: inner.span_id.clone(),
            trace_id: inner.trace_id.clone(),
            parent_id: inner.parent_id.clone(),
            name: inner.name.clone(),
            resource: inner.resource.clone(),
            service: inner.service.clone(),
            span_type: inner.span_type.clone(),
            meta: inner.meta.clone(),
            metrics: inner.metrics.clone(),
            start_time_unix_nano: inner.start_time_unix_nano,
            duration_ns: inner.duration.map(|d| d.as_nanos() as u64).unwrap_or(0),
            error: inner.error,
            error_info: inner.error_info.clone(),
        }
    }
}

/// Immutable-after-finish export form of a span.
#[derive(Debug, Clone, Serialize)]
pub struct SpanRecord {
    pub span_id: String,
    pub trace_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    pub name: String,
    pub resource: String,
    pub service: String,
    #[serde(rename = "type", skip_serializing_if = "String::is_empty")]
    pub span_type: String,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub meta: HashMap<String, String>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub metrics: HashMap<String, f64>,
    pub start_time_unix_nano: u64,
    pub duration_ns: u64,
    pub error: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_info: Option<ErrorInfo>,
}
