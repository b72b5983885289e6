//! Shared helpers for integration tests.

use std::collections::HashMap;
use std::io;
use std::sync::{Mutex, Once};

use lariat_core::{ExitDisposition, ProcessReaper, Tracer};

static INIT: Once = Once::new();

/// Initialize logging for tests (only once per test run).
#[allow(dead_code)]
pub fn init_test_logging() {
    INIT.call_once(|| {
        use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

        let _ = tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_test_writer()
                    .with_target(true)
                    .with_level(true),
            )
            .with(tracing_subscriber::filter::EnvFilter::from_default_env())
            .try_init();
    });
}

/// Reaper double: scripts one terminal status per pid. An unscripted pid
/// fails the way `waitpid` does when the child is already gone.
pub struct ScriptedReaper {
    plan: Mutex<HashMap<i32, ExitDisposition>>,
}

impl ScriptedReaper {
    pub fn new(plan: impl IntoIterator<Item = (i32, ExitDisposition)>) -> Self {
        Self {
            plan: Mutex::new(plan.into_iter().collect()),
        }
    }
}

impl ProcessReaper for ScriptedReaper {
    fn reap(&self, pid: i32) -> io::Result<ExitDisposition> {
        self.plan
            .lock()
            .unwrap()
            .remove(&pid)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no child process"))
    }
}

/// Tracer wired with a scripted reaper.
#[allow(dead_code)]
pub fn test_tracer(plan: impl IntoIterator<Item = (i32, ExitDisposition)>) -> Tracer {
    init_test_logging();
    Tracer::with_reaper("lariat-test", Box::new(ScriptedReaper::new(plan)))
}
