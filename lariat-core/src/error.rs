//! Error types for the lifecycle engine.
//!
//! Two kinds of failure live here and they must never be confused:
//!
//! - [`CallError`] is the error of the *instrumented call itself*. The engine
//!   records it onto the span and hands it back unchanged; it is never
//!   swallowed or transformed.
//! - [`EngineError`] covers the engine's own bookkeeping. These stay inside
//!   the engine: the public binding surface reports them as `false` returns
//!   and a log line, never as a panic into the host.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Structured description of an error raised by an instrumented call.
///
/// This is the payload that crosses the engine boundary unchanged: the scope
/// tags the span with it and then returns it to the caller for propagation.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct CallError {
    /// Error class, e.g. "PDOException" or "io".
    pub kind: String,

    /// Human-readable message.
    pub message: String,

    /// Optional stack trace captured where the error was raised.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl CallError {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            stack: None,
        }
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }
}

/// Engine-internal errors.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A handle of the wrong kind was passed to a binding call.
    #[error("handle is not a {expected} resource")]
    InvalidResourceKind { expected: &'static str },

    /// Reaping a child process failed (e.g. it was already reaped elsewhere).
    #[error("failed to reap pid {pid}: {source}")]
    Reap {
        pid: i32,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;
