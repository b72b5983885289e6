//! HookRegistry - maps interception targets to hook definitions.
//!
//! Pure storage with O(1) lookup: targets normalize to string routing keys
//! and definitions are kept per key in registration order. The registry
//! performs no span logic; running hooks is the call scope's job.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::error::CallError;
use crate::telemetry::span::Span;

/// Arguments of an intercepted call, as loosely-typed values.
pub type CallArgs = Vec<serde_json::Value>;

/// What an intercepted call produced, handed to `after` callbacks.
#[derive(Debug)]
pub enum CallOutcome<'a> {
    Return(&'a serde_json::Value),
    Error(&'a CallError),
}

/// Callback run before the wrapped call, with the span already created.
pub type BeforeHook = Box<dyn Fn(&Span, &CallArgs) + Send + Sync>;

/// Callback run after the wrapped call, observing its outcome. Runs on the
/// error path too, before the error is re-propagated.
pub type AfterHook = Box<dyn Fn(&Span, &CallArgs, &CallOutcome<'_>) + Send + Sync>;

/// Callback wrapping the call itself. Receives a continuation that performs
/// the inner call (or the next `around` hook); only reachable through
/// `CallScope::invoke`, which owns the call. Manual `enter`/`exit_*` flows
/// skip `around` definitions.
pub type AroundHook = Box<
    dyn Fn(
            &Span,
            &CallArgs,
            &mut dyn FnMut(&CallArgs) -> Result<serde_json::Value, CallError>,
        ) -> Result<serde_json::Value, CallError>
        + Send
        + Sync,
>;

/// One registered set of callbacks for a target.
#[derive(Default)]
pub struct HookDefinition {
    pub before: Option<BeforeHook>,
    pub after: Option<AfterHook>,
    pub around: Option<AroundHook>,
}

impl HookDefinition {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_before(mut self, f: impl Fn(&Span, &CallArgs) + Send + Sync + 'static) -> Self {
        self.before = Some(Box::new(f));
        self
    }

    pub fn on_after(
        mut self,
        f: impl Fn(&Span, &CallArgs, &CallOutcome<'_>) + Send + Sync + 'static,
    ) -> Self {
        self.after = Some(Box::new(f));
        self
    }

    pub fn on_around(
        mut self,
        f: impl Fn(
                &Span,
                &CallArgs,
                &mut dyn FnMut(&CallArgs) -> Result<serde_json::Value, CallError>,
            ) -> Result<serde_json::Value, CallError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        self.around = Some(Box::new(f));
        self
    }
}

impl std::fmt::Debug for HookDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookDefinition")
            .field("before", &self.before.is_some())
            .field("after", &self.after.is_some())
            .field("around", &self.around.is_some())
            .finish()
    }
}

/// Where a hook definition attaches.
///
/// `Interface` targets cover any implementing type: one registration for
/// `("ClientInterface", "sendRequest")` intercepts the method on every
/// implementation that declares the interface at its call sites.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HookTarget {
    Function { name: String },
    Method { class: String, method: String },
    Interface { interface: String, method: String },
}

impl HookTarget {
    pub fn function(name: impl Into<String>) -> Self {
        Self::Function { name: name.into() }
    }

    pub fn method(class: impl Into<String>, method: impl Into<String>) -> Self {
        Self::Method {
            class: class.into(),
            method: method.into(),
        }
    }

    pub fn interface(interface: impl Into<String>, method: impl Into<String>) -> Self {
        Self::Interface {
            interface: interface.into(),
            method: method.into(),
        }
    }

    /// Create the routing key this target is indexed under.
    pub fn routing_key(&self) -> String {
        match self {
            HookTarget::Function { name } => format!("function:{name}"),
            HookTarget::Method { class, method } => format!("method:{class}::{method}"),
            HookTarget::Interface { interface, method } => {
                format!("interface:{interface}::{method}")
            }
        }
    }
}

/// An invocation as the call site describes it.
///
/// Method calls carry the interfaces the concrete class implements, so
/// `Interface` registrations match without knowing the class in advance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallTarget {
    Function {
        name: String,
    },
    Method {
        class: String,
        method: String,
        interfaces: Vec<String>,
    },
}

impl CallTarget {
    pub fn function(name: impl Into<String>) -> Self {
        Self::Function { name: name.into() }
    }

    pub fn method(class: impl Into<String>, method: impl Into<String>) -> Self {
        Self::Method {
            class: class.into(),
            method: method.into(),
            interfaces: Vec::new(),
        }
    }

    pub fn method_implementing(
        class: impl Into<String>,
        method: impl Into<String>,
        interfaces: impl IntoIterator<Item = String>,
    ) -> Self {
        Self::Method {
            class: class.into(),
            method: method.into(),
            interfaces: interfaces.into_iter().collect(),
        }
    }

    /// Default operation name for the span of this call.
    pub fn operation_name(&self) -> String {
        match self {
            CallTarget::Function { name } => name.clone(),
            CallTarget::Method { class, method, .. } => format!("{class}.{method}"),
        }
    }

    /// Every routing key this invocation can match, most specific first.
    fn routing_keys(&self) -> Vec<String> {
        match self {
            CallTarget::Function { name } => vec![format!("function:{name}")],
            CallTarget::Method {
                class,
                method,
                interfaces,
            } => {
                let mut keys = Vec::with_capacity(1 + interfaces.len());
                keys.push(format!("method:{class}::{method}"));
                for interface in interfaces {
                    keys.push(format!("interface:{interface}::{method}"));
                }
                keys
            }
        }
    }
}

/// Opaque handle to one registration, usable for removal. Handles order by
/// registration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HookHandle(u64);

#[derive(Debug)]
struct RegisteredHook {
    handle: HookHandle,
    definition: Arc<HookDefinition>,
}

/// Per-target hook storage.
///
/// Explicitly constructed and owned by the runtime context (no process-wide
/// mutable hook table); one instance per `Tracer`.
#[derive(Debug, Default)]
pub struct HookRegistry {
    hooks: HashMap<String, Vec<RegisteredHook>>,
    next_id: u64,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a definition for a target. Multiple definitions per target
    /// are allowed (several integrations may observe the same call) and run
    /// in registration order.
    pub fn register(&mut self, target: &HookTarget, definition: HookDefinition) -> HookHandle {
        let handle = HookHandle(self.next_id);
        self.next_id += 1;
        let key = target.routing_key();
        debug!(key = %key, handle = handle.0, "registering hook");
        self.hooks.entry(key).or_default().push(RegisteredHook {
            handle,
            definition: Arc::new(definition),
        });
        handle
    }

    /// Remove one registration. Unknown handles are a no-op returning false.
    pub fn unregister(&mut self, handle: HookHandle) -> bool {
        for registered in self.hooks.values_mut() {
            if let Some(position) = registered.iter().position(|r| r.handle == handle) {
                registered.remove(position);
                return true;
            }
        }
        debug!(handle = handle.0, "unregister: unknown hook handle");
        false
    }

    /// All definitions matching an invocation, in global registration order.
    ///
    /// Uninstrumented targets yield an empty (non-allocating) vector; callers
    /// use that as the skip-everything fast path.
    pub fn lookup(&self, target: &CallTarget) -> Vec<Arc<HookDefinition>> {
        let mut matched: Vec<(HookHandle, Arc<HookDefinition>)> = Vec::new();
        for key in target.routing_keys() {
            if let Some(registered) = self.hooks.get(&key) {
                matched.extend(
                    registered
                        .iter()
                        .map(|r| (r.handle, Arc::clone(&r.definition))),
                );
            }
        }
        if matched.is_empty() {
            return Vec::new();
        }
        matched.sort_by_key(|(handle, _)| *handle);
        matched.into_iter().map(|(_, definition)| definition).collect()
    }

    /// Whether any definition matches the invocation.
    pub fn is_instrumented(&self, target: &CallTarget) -> bool {
        target
            .routing_keys()
            .iter()
            .any(|key| self.hooks.get(key).is_some_and(|v| !v.is_empty()))
    }

    /// Total number of live registrations.
    pub fn len(&self) -> usize {
        self.hooks.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_on_uninstrumented_target_is_empty_not_an_error() {
        let registry = HookRegistry::new();
        assert!(registry.lookup(&CallTarget::function("strlen")).is_empty());
    }

    #[test]
    fn definitions_run_in_registration_order() {
        let mut registry = HookRegistry::new();
        let target = HookTarget::function("exec");
        let first = registry.register(&target, HookDefinition::new());
        let second = registry.register(&target, HookDefinition::new());
        assert!(first != second);

        let matched = registry.lookup(&CallTarget::function("exec"));
        assert_eq!(matched.len(), 2);
    }

    #[test]
    fn unregister_removes_only_the_given_handle() {
        let mut registry = HookRegistry::new();
        let target = HookTarget::function("popen");
        let first = registry.register(&target, HookDefinition::new());
        let _second = registry.register(&target, HookDefinition::new());

        assert!(registry.unregister(first));
        assert!(!registry.unregister(first));
        assert_eq!(registry.lookup(&CallTarget::function("popen")).len(), 1);
    }

    #[test]
    fn interface_registration_matches_any_implementation() {
        let mut registry = HookRegistry::new();
        registry.register(
            &HookTarget::interface("ClientInterface", "sendRequest"),
            HookDefinition::new(),
        );

        let guzzle = CallTarget::method_implementing(
            "GuzzleHttp\\Client",
            "sendRequest",
            vec!["ClientInterface".to_string()],
        );
        let curl = CallTarget::method_implementing(
            "CurlClient",
            "sendRequest",
            vec!["ClientInterface".to_string()],
        );
        assert_eq!(registry.lookup(&guzzle).len(), 1);
        assert_eq!(registry.lookup(&curl).len(), 1);

        // A class that does not declare the interface is not matched.
        let plain = CallTarget::method("PlainClient", "sendRequest");
        assert!(registry.lookup(&plain).is_empty());
    }

    #[test]
    fn class_and_interface_registrations_merge_in_global_order() {
        let mut registry = HookRegistry::new();
        registry.register(
            &HookTarget::interface("ClientInterface", "sendRequest"),
            HookDefinition::new(),
        );
        registry.register(
            &HookTarget::method("GuzzleHttp\\Client", "sendRequest"),
            HookDefinition::new(),
        );

        let call = CallTarget::method_implementing(
            "GuzzleHttp\\Client",
            "sendRequest",
            vec!["ClientInterface".to_string()],
        );
        assert_eq!(registry.lookup(&call).len(), 2);
    }

    #[test]
    fn routing_keys_distinguish_target_kinds() {
        assert_eq!(
            HookTarget::function("exec").routing_key(),
            "function:exec"
        );
        assert_eq!(
            HookTarget::method("PDO", "query").routing_key(),
            "method:PDO::query"
        );
        assert_eq!(
            HookTarget::interface("ClientInterface", "sendRequest").routing_key(),
            "interface:ClientInterface::sendRequest"
        );
    }
}
