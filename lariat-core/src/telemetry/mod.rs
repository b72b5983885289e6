//! Span data model and request-scoped trace state.
//!
//! ```text
//! TraceContext (one per request)
//!   ├── trace_id, service
//!   ├── active-span stack        <- call-scoped spans, strict LIFO
//!   └── TraceBuffer
//!         ├── open spans         <- strong handles until finish
//!         └── finished records   <- immutable, drained by the exporter
//! ```
//!
//! Spans move exactly once from the open set to the finished records, via
//! [`TraceBuffer::complete`]. The engine components in [`crate::engine`]
//! decide *when* that happens; nothing in this module does.

pub mod buffer;
pub mod context;
pub mod span;
pub mod writer;

pub use buffer::TraceBuffer;
pub use context::TraceContext;
pub use span::{ErrorInfo, Span, SpanRecord, SpanStatus, WeakSpan};
pub use writer::{ExportFormat, TelemetryWriter};
