//! Deferred-work executor and clock seams.
//!
//! Dispatch models every suspension as continuation passing: resolution
//! callbacks, synthetic replies, and cancel retries are closures handed to
//! an [`Executor`]. The production implementation schedules them on a
//! tokio runtime; tests substitute a manually-pumped queue so scenarios
//! run deterministically.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::runtime::Handle;

/// A unit of deferred work.
pub type WorkItem = Box<dyn FnOnce() + Send>;

/// Schedules deferred work items on one or more worker threads.
///
/// Implementations must not run the work inline in the calling stack:
/// callers may hold locks that the work item re-acquires.
pub trait Executor: Send + Sync {
    /// Run `work` soon. `tag` names the call site for diagnostics.
    fn post(&self, work: WorkItem, tag: &'static str);

    /// Run `work` after at least `delay` has elapsed.
    fn execute_after(&self, delay: Duration, work: WorkItem);
}

/// Wall-clock source, in milliseconds since the Unix epoch.
pub trait Clock: Send + Sync {
    fn current_time_ms(&self) -> i64;
}

/// Executor backed by a tokio runtime.
#[derive(Clone)]
pub struct TokioExecutor {
    handle: Handle,
}

impl TokioExecutor {
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Capture the runtime of the calling context.
    ///
    /// Panics outside a tokio runtime, like [`Handle::current`].
    pub fn current() -> Self {
        Self {
            handle: Handle::current(),
        }
    }
}

impl Executor for TokioExecutor {
    fn post(&self, work: WorkItem, _tag: &'static str) {
        self.handle.spawn(async move {
            work();
        });
    }

    fn execute_after(&self, delay: Duration, work: WorkItem) {
        self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            work();
        });
    }
}

/// System wall clock.
#[derive(Debug, Default, Clone)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn current_time_ms(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0)
    }
}

/// Convenience constructor for the production pair.
pub fn system_executor() -> (Arc<dyn Executor>, Arc<dyn Clock>) {
    (Arc::new(TokioExecutor::current()), Arc::new(SystemClock))
}
