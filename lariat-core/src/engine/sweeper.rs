//! ShutdownSweeper - end-of-request cleanup.
//!
//! Runs once when the owning request or process winds down: every span still
//! bound to a resource is closed (child processes reaped first), and any
//! call-scoped spans abandoned on the active stack are force-finished,
//! deepest first. After a sweep, no span and no traced child process
//! outlives its owner.

use std::sync::Arc;
use tracing::{info, warn};

use crate::telemetry::context::TraceContext;

use super::binder::ResourceSpanBinder;

pub struct ShutdownSweeper {
    context: TraceContext,
    binder: Arc<ResourceSpanBinder>,
}

impl ShutdownSweeper {
    pub fn new(context: TraceContext, binder: Arc<ResourceSpanBinder>) -> Self {
        Self { context, binder }
    }

    /// Force-close everything still open. Never panics; teardown has no
    /// receiver for errors, so failures are logged and reported as `false`.
    pub fn sweep(&self) -> bool {
        let resources_ok = self.binder.sweep_all();

        let abandoned = self.context.drain_stack();
        if !abandoned.is_empty() {
            warn!(
                count = abandoned.len(),
                "active call spans abandoned at shutdown; force-finishing"
            );
        }
        let buffer = self.context.buffer();
        for span in abandoned {
            buffer.complete(&span);
        }

        // Orphans: spans that lost both their call frame and their binding
        // (e.g. the replaced half of a rebound stream). Nothing else will
        // ever finish them.
        for span in buffer.take_open() {
            if !span.is_finished() {
                warn!(span_id = %span.span_id(), "open span with no owner at shutdown; force-finishing");
            }
            buffer.complete(&span);
        }

        info!(
            finished = self.context.buffer().finished_len(),
            ok = resources_ok,
            "shutdown sweep complete"
        );
        resources_ok
    }
}
