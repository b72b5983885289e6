//! ResourceSpanBinder - ties spans to OS resource handles.
//!
//! Code that opens a stream or spawns a child process is not in a position
//! to observe when that resource is later destroyed; teardown happens at an
//! arbitrary point, far from the creation site. The binder is the side
//! table bridging the two: bind at creation, and the runtime's teardown path
//! calls [`ResourceSpanBinder::on_resource_destroyed`], the one authorized
//! transition from bound to finished. For process handles the destroy step
//! also reaps the child (`waitpid`) and records its exit status on the span.
//!
//! Bindings hold only a weak back-reference to the span; the trace buffer
//! owns the lifetime. The whole table sits behind a single mutex so bind,
//! destroy and sweep never race over a reused identity.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

use crate::error::EngineError;
use crate::telemetry::buffer::TraceBuffer;
use crate::telemetry::span::{Span, WeakSpan};

use super::reaper::{ExitDisposition, ProcessReaper, SysReaper};

/// Error tag recorded when a child is killed by a signal, mirroring what the
/// status observer reports for `signaled` processes.
const SIGNAL_TERMINATION_MSG: &str = "The process was terminated by a signal";

/// Opaque identity of a resource handle.
///
/// This is a key derived from the handle's identity (its address or handle
/// number in the host runtime), never a copy of the handle itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Stream,
    Process,
}

/// A handle descriptor as the host runtime presents it at bind time.
#[derive(Debug, Clone, Copy)]
pub struct ResourceHandle {
    id: ResourceId,
    kind: ResourceKind,
    pid: Option<i32>,
}

impl ResourceHandle {
    pub fn stream(id: u64) -> Self {
        Self {
            id: ResourceId(id),
            kind: ResourceKind::Stream,
            pid: None,
        }
    }

    pub fn process(id: u64, pid: i32) -> Self {
        Self {
            id: ResourceId(id),
            kind: ResourceKind::Process,
            pid: Some(pid),
        }
    }

    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }
}

#[derive(Debug)]
struct ResourceBinding {
    kind: ResourceKind,
    span: WeakSpan,
    /// Captured at bind time for Process bindings.
    pid: Option<i32>,
    /// Terminal status observed before destruction, if any. When set, the
    /// destroy path must not wait again; the child is already collected.
    exit_status: Option<ExitDisposition>,
}

/// Side table binding live resource handles to spans.
pub struct ResourceSpanBinder {
    table: Mutex<HashMap<ResourceId, ResourceBinding>>,
    buffer: TraceBuffer,
    reaper: Box<dyn ProcessReaper + Send + Sync>,
}

impl std::fmt::Debug for ResourceSpanBinder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceSpanBinder")
            .field("bound", &self.len())
            .finish()
    }
}

impl ResourceSpanBinder {
    pub fn new(buffer: TraceBuffer, reaper: Box<dyn ProcessReaper + Send + Sync>) -> Self {
        Self {
            table: Mutex::new(HashMap::new()),
            buffer,
            reaper,
        }
    }

    /// Production binder using `waitpid(2)` for process teardown.
    pub fn with_sys_reaper(buffer: TraceBuffer) -> Self {
        Self::new(buffer, Box::new(SysReaper))
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ResourceId, ResourceBinding>> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of live bindings.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Bind a span to a stream handle's lifetime.
    ///
    /// Returns false (recording nothing) if the handle is not stream-kind.
    /// Only one span can be associated with a stream resource; a subsequent
    /// call replaces the first, and the replaced span is left as-is.
    pub fn register_stream(&self, handle: &ResourceHandle, span: &Span) -> bool {
        if handle.kind != ResourceKind::Stream {
            debug!(
                id = handle.id.0,
                error = %EngineError::InvalidResourceKind { expected: "stream" },
                "register_stream refused"
            );
            return false;
        }
        span.activate();
        let binding = ResourceBinding {
            kind: ResourceKind::Stream,
            span: span.downgrade(),
            pid: None,
            exit_status: None,
        };
        if self.lock().insert(handle.id, binding).is_some() {
            debug!(id = handle.id.0, "stream binding replaced");
        }
        true
    }

    /// Bind a span to a process handle's lifetime, capturing its pid.
    ///
    /// Returns false if the handle is not process-kind. The upstream
    /// contract leaves a second call for the same handle undefined; this
    /// implementation deterministically replaces the binding (like streams)
    /// and logs a warning, leaving the previous span untouched.
    pub fn proc_assoc_span(&self, handle: &ResourceHandle, span: &Span) -> bool {
        if handle.kind != ResourceKind::Process {
            debug!(
                id = handle.id.0,
                error = %EngineError::InvalidResourceKind { expected: "process" },
                "proc_assoc_span refused"
            );
            return false;
        }
        span.activate();
        let binding = ResourceBinding {
            kind: ResourceKind::Process,
            span: span.downgrade(),
            pid: handle.pid,
            exit_status: None,
        };
        if let Some(previous) = self.lock().insert(handle.id, binding) {
            warn!(
                id = handle.id.0,
                pid = previous.pid,
                "process handle bound twice; replacing the existing binding"
            );
        }
        true
    }

    /// Span currently bound to an identity, if the identity is bound and the
    /// span is still alive. Read-only.
    pub fn proc_get_span(&self, id: ResourceId) -> Option<Span> {
        self.lock().get(&id).and_then(|binding| binding.span.upgrade())
    }

    /// Pid captured at bind time for a process identity. Read-only.
    pub fn proc_get_pid(&self, id: ResourceId) -> Option<i32> {
        self.lock().get(&id).and_then(|binding| binding.pid)
    }

    /// Record a terminal status observed while the handle is still alive
    /// (the host's status-polling path saw the child exit). Finishes the
    /// span immediately; the later destroy only clears the table entry.
    ///
    /// Returns false if the identity is unbound, not a process, or its span
    /// has already finished.
    pub fn proc_capture_status(&self, id: ResourceId, status: ExitDisposition) -> bool {
        let span = {
            let mut table = self.lock();
            let Some(binding) = table.get_mut(&id) else {
                return false;
            };
            if binding.kind != ResourceKind::Process || binding.exit_status.is_some() {
                return false;
            }
            let Some(span) = binding.span.upgrade() else {
                return false;
            };
            if span.is_finished() {
                return false;
            }
            binding.exit_status = Some(status);
            span
        };
        apply_exit_status(&span, status);
        self.buffer.complete(&span);
        true
    }

    /// Teardown hook for one handle: the runtime's destructor path calls
    /// this for every handle. Unbound identities are a no-op; not every
    /// stream or process is traced.
    pub fn on_resource_destroyed(&self, id: ResourceId) {
        let Some(binding) = self.lock().remove(&id) else {
            return;
        };
        self.close_binding(id, binding);
    }

    /// Destroy-time logic for every still-bound resource, then clear the
    /// table. Runs at request/process shutdown, where nothing can receive an
    /// error: failures are logged and tagged, never thrown.
    pub fn sweep_all(&self) -> bool {
        let drained: Vec<(ResourceId, ResourceBinding)> =
            std::mem::take(&mut *self.lock()).into_iter().collect();
        let mut ok = true;
        for (id, binding) in drained {
            debug!(id = id.0, kind = ?binding.kind, "sweeping still-bound resource");
            ok &= self.close_binding(id, binding);
        }
        ok
    }

    /// Shared destroy-time logic. Streams finish immediately; processes are
    /// reaped first (unless a status was already captured) and the exit
    /// status lands in the span's tags.
    fn close_binding(&self, id: ResourceId, binding: ResourceBinding) -> bool {
        let span = binding.span.upgrade();
        let mut ok = true;

        if binding.kind == ResourceKind::Process && binding.exit_status.is_none() {
            // Reap even if the span is gone: the child must not be left a
            // zombie just because its span was evicted.
            if let Some(pid) = binding.pid {
                match self.reaper.reap(pid) {
                    Ok(status) => {
                        if let Some(span) = &span {
                            apply_exit_status(span, status);
                        }
                    }
                    Err(source) => {
                        let error = EngineError::Reap { pid, source };
                        warn!(id = id.0, %error, "process reap failed during teardown");
                        if let Some(span) = &span {
                            span.set_tag("error.message", error.to_string());
                        }
                        ok = false;
                    }
                }
            }
        }

        if let Some(span) = &span {
            self.buffer.complete(span);
        }
        ok
    }
}

/// Translate a terminal status into the span's exit tags.
fn apply_exit_status(span: &Span, status: ExitDisposition) {
    match status {
        ExitDisposition::Exited(code) => {
            span.set_tag("cmd.exit_code", code.to_string());
        }
        ExitDisposition::Signaled(signal) => {
            // The terminating signal doubles as the reported exit code.
            span.set_tag("cmd.exit_code", signal.to_string());
            span.record_error_message(SIGNAL_TERMINATION_MSG);
        }
    }
}
