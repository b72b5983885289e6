//! The Lariat engine - span-lifecycle orchestration.
//!
//! Binds spans to two kinds of lifetimes and guarantees every span created
//! is finished exactly once:
//!
//! - the dynamic extent of an intercepted call ([`scope::CallScope`]), and
//! - the lifetime of an OS resource handle ([`binder::ResourceSpanBinder`]),
//!   with child processes reaped at teardown.
//!
//! [`Tracer`] is the per-request assembly of the pieces: an explicit
//! registry (no process-wide hook table), a trace context, and a binding
//! table, torn down by [`sweeper::ShutdownSweeper`] so nothing leaks past
//! the request.

use std::sync::{Arc, Mutex, PoisonError};
use tracing::info;

use crate::telemetry::context::TraceContext;
use crate::telemetry::span::SpanRecord;

pub mod binder;
pub mod reaper;
pub mod registry;
pub mod scope;
pub mod sweeper;

pub use binder::{ResourceHandle, ResourceId, ResourceKind, ResourceSpanBinder};
pub use reaper::{ExitDisposition, ProcessReaper, SysReaper};
pub use registry::{
    CallArgs, CallOutcome, CallTarget, HookDefinition, HookHandle, HookRegistry, HookTarget,
};
pub use scope::{CallFrame, CallScope};
pub use sweeper::ShutdownSweeper;

/// An integration declares which calls to intercept and which tags to
/// attach. It registers hooks and mutates span tags inside its callbacks;
/// all lifecycle logic stays in the engine.
pub trait Integration {
    fn name(&self) -> &'static str;

    /// Register this integration's hook definitions.
    fn install(&self, registry: &mut HookRegistry);
}

/// Per-request tracer: one registry, one trace context, one binding table.
pub struct Tracer {
    registry: Arc<Mutex<HookRegistry>>,
    context: TraceContext,
    scope: CallScope,
    binder: Arc<ResourceSpanBinder>,
}

impl Tracer {
    /// Build a tracer with the production `waitpid` reaper.
    pub fn new(service: impl Into<String>) -> Self {
        Self::with_reaper(service, Box::new(SysReaper))
    }

    /// Build a tracer with a custom process reaper (tests script exits).
    pub fn with_reaper(
        service: impl Into<String>,
        reaper: Box<dyn ProcessReaper + Send + Sync>,
    ) -> Self {
        let registry = Arc::new(Mutex::new(HookRegistry::new()));
        let context = TraceContext::new(service);
        let scope = CallScope::new(Arc::clone(&registry), context.clone());
        let binder = Arc::new(ResourceSpanBinder::new(context.buffer().clone(), reaper));
        Self {
            registry,
            context,
            scope,
            binder,
        }
    }

    /// Install an integration's hooks.
    pub fn install(&self, integration: &dyn Integration) {
        let mut registry = self
            .registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        integration.install(&mut registry);
        info!(integration = integration.name(), "integration installed");
    }

    /// Register a single hook definition directly.
    pub fn register_hook(
        &self,
        target: &HookTarget,
        definition: HookDefinition,
    ) -> HookHandle {
        self.registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .register(target, definition)
    }

    pub fn scope(&self) -> &CallScope {
        &self.scope
    }

    pub fn binder(&self) -> &ResourceSpanBinder {
        &self.binder
    }

    pub fn context(&self) -> &TraceContext {
        &self.context
    }

    /// End-of-request sweep; see [`ShutdownSweeper::sweep`].
    pub fn shutdown(&self) -> bool {
        ShutdownSweeper::new(self.context.clone(), Arc::clone(&self.binder)).sweep()
    }

    /// Take all finished span records collected so far.
    pub fn drain(&self) -> Vec<SpanRecord> {
        self.context.buffer().drain()
    }
}
