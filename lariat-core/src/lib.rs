//! Lariat core - span-lifecycle association engine.
//!
//! Every span is bound either to the dynamic extent of an intercepted call
//! or to the lifetime of an OS resource handle, and is finished exactly
//! once: on return, on error, on resource destruction, or at the final
//! shutdown sweep. The instrumented program's functional behavior is
//! untouched; only the span side-channel differs.

pub mod engine;
pub mod error;
pub mod telemetry;

pub use engine::{
    CallArgs, CallFrame, CallOutcome, CallScope, CallTarget, ExitDisposition, HookDefinition,
    HookHandle, HookRegistry, HookTarget, Integration, ProcessReaper, ResourceHandle, ResourceId,
    ResourceKind, ResourceSpanBinder, ShutdownSweeper, SysReaper, Tracer,
};
pub use error::{CallError, EngineError, Result};
pub use telemetry::{
    ErrorInfo, ExportFormat, Span, SpanRecord, SpanStatus, TelemetryWriter, TraceBuffer,
    TraceContext, WeakSpan,
};
