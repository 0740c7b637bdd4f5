//! Dependency resolver seam.

use crate::error::ResolveError;
use flux_types::{TaskId, TaskSpec};

/// Continuation invoked once dependency resolution finishes.
pub type ResolveCallback = Box<dyn FnOnce(Result<(), ResolveError>) + Send>;

/// Resolves a task's input references into values before it can be sent.
///
/// `resolve_dependencies` invokes the callback at most once, on any
/// thread, possibly synchronously in the calling stack. The callback must
/// tolerate the task it references having been dequeued in the meantime.
pub trait DependencyResolver: Send + Sync {
    fn resolve_dependencies(&self, spec: &TaskSpec, on_resolved: ResolveCallback);

    /// Abandon an in-progress resolution. A no-op if the task is unknown
    /// or already resolved.
    fn cancel_resolution(&self, task_id: TaskId);
}
