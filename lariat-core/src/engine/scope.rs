//! CallScope - brackets one invocation of an intercepted call.
//!
//! `enter` creates the span and `exit_normal`/`exit_with_error` close it;
//! exactly one of the two runs for every real frame, on every control path.
//! The frame itself is the last line of defense: a frame dropped without an
//! explicit exit (a panic unwinding through the call, a forgotten guard)
//! still finishes its span once, so instrumentation can never leak spans.
//!
//! The engine never touches the wrapped call's outcome: return values and
//! errors pass through unchanged, and only the side-channel span differs
//! between an instrumented and an uninstrumented program.

use std::sync::{Arc, Mutex, PoisonError};
use tracing::{trace, warn};

use crate::error::CallError;
use crate::telemetry::context::TraceContext;
use crate::telemetry::span::Span;

use super::registry::{CallArgs, CallOutcome, CallTarget, HookDefinition, HookRegistry};

/// Bookkeeping for one in-flight intercepted call.
///
/// A sentinel frame (uninstrumented target) carries the arguments but no
/// span; every operation on it is a no-op.
#[derive(Debug)]
pub struct CallFrame {
    args: CallArgs,
    inner: Option<FrameInner>,
}

#[derive(Debug)]
struct FrameInner {
    span: Span,
    hooks: Vec<Arc<HookDefinition>>,
    context: TraceContext,
    pending_error: Option<CallError>,
}

impl CallFrame {
    /// True when the target had no hooks and no span was created.
    pub fn is_sentinel(&self) -> bool {
        self.inner.is_none()
    }

    /// The span of this frame, if it is a real frame.
    pub fn span(&self) -> Option<Span> {
        self.inner.as_ref().map(|inner| inner.span.clone())
    }

    /// Arguments the call was entered with.
    pub fn args(&self) -> &CallArgs {
        &self.args
    }
}

impl Drop for CallFrame {
    fn drop(&mut self) {
        let Some(mut inner) = self.inner.take() else {
            return;
        };
        // Reaching this point means neither exit ran: the call was aborted
        // (panic unwind, early drop). Treat abort as an error and close the
        // span exactly once. After-callbacks are deliberately not run here.
        warn!(
            span_id = %inner.span.span_id(),
            "call frame dropped without an explicit exit; finishing span"
        );
        let error = inner
            .pending_error
            .take()
            .unwrap_or_else(|| CallError::new("abort", "call aborted before exit"));
        inner.span.record_error(&error);
        close_frame(&inner.context, &inner.span);
    }
}

/// Pop the span (and any leaked children above it) off the active stack and
/// hand everything to the buffer. The single closing path for call frames.
fn close_frame(context: &TraceContext, span: &Span) {
    let buffer = context.buffer();
    for straggler in context.pop_through(span) {
        if !straggler.is_finished() {
            warn!(
                span_id = %straggler.span_id(),
                "unfinished child span left on the stack; force-finishing"
            );
        }
        buffer.complete(&straggler);
    }
    buffer.complete(span);
}

/// Wraps intercepted invocations so that exactly one span is created and
/// exactly one span is finished per call, however control leaves it.
#[derive(Debug, Clone)]
pub struct CallScope {
    registry: Arc<Mutex<HookRegistry>>,
    context: TraceContext,
}

impl CallScope {
    pub fn new(registry: Arc<Mutex<HookRegistry>>, context: TraceContext) -> Self {
        Self { registry, context }
    }

    pub fn context(&self) -> &TraceContext {
        &self.context
    }

    /// Begin an intercepted call.
    ///
    /// With no hooks registered for the target this is the fast path: a
    /// sentinel frame, zero spans, zero allocations beyond the args the
    /// caller already built. Otherwise a span is created (parented on the
    /// active stack top), `before` callbacks run, and the span is pushed.
    pub fn enter(&self, target: &CallTarget, args: CallArgs) -> CallFrame {
        let hooks = self
            .registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .lookup(target);
        if hooks.is_empty() {
            trace!(callee = %target.operation_name(), "uninstrumented target, sentinel frame");
            return CallFrame { args, inner: None };
        }

        let span = self.context.start_span(target.operation_name());
        for definition in &hooks {
            if let Some(before) = &definition.before {
                before(&span, &args);
            }
        }
        self.context.push(&span);

        CallFrame {
            args,
            inner: Some(FrameInner {
                span,
                hooks,
                context: self.context.clone(),
                pending_error: None,
            }),
        }
    }

    /// Close a frame for a call that returned normally.
    pub fn exit_normal(&self, mut frame: CallFrame, return_value: serde_json::Value) {
        let Some(inner) = frame.inner.take() else {
            return;
        };
        let outcome = CallOutcome::Return(&return_value);
        for definition in &inner.hooks {
            if let Some(after) = &definition.after {
                after(&inner.span, &frame.args, &outcome);
            }
        }
        close_frame(&self.context, &inner.span);
    }

    /// Close a frame for a call that raised, handing the error back
    /// unchanged for the caller to propagate.
    ///
    /// `after` callbacks still run (integrations tag failed calls too), then
    /// the span is flagged with the error metadata and finished.
    pub fn exit_with_error(&self, mut frame: CallFrame, error: CallError) -> CallError {
        let Some(mut inner) = frame.inner.take() else {
            return error;
        };
        inner.pending_error = Some(error.clone());
        let outcome = CallOutcome::Error(&error);
        for definition in &inner.hooks {
            if let Some(after) = &definition.after {
                after(&inner.span, &frame.args, &outcome);
            }
        }
        inner.span.record_error(&error);
        close_frame(&self.context, &inner.span);
        error
    }

    /// Bracket a closure with enter/exit, composing `around` hooks over it.
    ///
    /// This is the only path on which `around` definitions run, because it
    /// is the only path where the scope owns the call. A panic unwinding out
    /// of `f` still finishes the span via the frame guard before resuming.
    pub fn invoke<F>(
        &self,
        target: &CallTarget,
        args: CallArgs,
        f: F,
    ) -> Result<serde_json::Value, CallError>
    where
        F: FnOnce(&CallArgs) -> Result<serde_json::Value, CallError>,
    {
        let frame = self.enter(target, args);
        let Some(inner) = frame.inner.as_ref() else {
            return f(&frame.args);
        };
        let span = inner.span.clone();
        let arounds: Vec<Arc<HookDefinition>> = inner
            .hooks
            .iter()
            .filter(|definition| definition.around.is_some())
            .cloned()
            .collect();

        let mut slot = Some(f);
        let mut innermost = |call_args: &CallArgs| match slot.take() {
            Some(f) => f(call_args),
            None => Err(CallError::new(
                "lariat",
                "around hook invoked the wrapped call more than once",
            )),
        };
        let result = compose_around(&span, &frame.args, &arounds, &mut innermost);

        match result {
            Ok(value) => {
                self.exit_normal(frame, value.clone());
                Ok(value)
            }
            Err(error) => Err(self.exit_with_error(frame, error)),
        }
    }
}

/// Run `around` hooks outermost-first, each receiving the next layer as its
/// continuation; the innermost continuation is the wrapped call itself.
fn compose_around(
    span: &Span,
    args: &CallArgs,
    definitions: &[Arc<HookDefinition>],
    f: &mut dyn FnMut(&CallArgs) -> Result<serde_json::Value, CallError>,
) -> Result<serde_json::Value, CallError> {
    match definitions.split_first() {
        None => f(args),
        Some((head, rest)) => match head.around.as_ref() {
            Some(around) => {
                let mut next =
                    |next_args: &CallArgs| compose_around(span, next_args, rest, f);
                around(span, args, &mut next)
            }
            None => compose_around(span, args, rest, f),
        },
    }
}
