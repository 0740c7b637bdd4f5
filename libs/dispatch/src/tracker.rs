//! Task tracker seam.
//!
//! The tracker owns task lifecycle records: it materializes return
//! objects, applies retry budgets, and reports terminal states to the
//! language frontend. Dispatch calls it at every lifecycle edge and never
//! while holding its own lock, because tracker implementations may
//! synchronously re-enter a foreign language runtime.

use crate::error::TaskError;
use crate::rpc::PushTaskReply;
use flux_types::{NodeId, TaskId, TaskSpec, WorkerAddress, WorkerId};

pub trait TaskTracker: Send + Sync {
    /// The task's input references are all materialized.
    fn mark_dependencies_resolved(&self, task_id: TaskId);

    /// Record a cancellation request. Returns false when the task has
    /// already finished (or its cancellation has been fully processed), in
    /// which case the caller drops the request.
    fn mark_task_canceled(&self, task_id: TaskId) -> bool;

    /// The task was handed to the transport and is now expected to execute
    /// at the given location.
    fn mark_task_waiting_for_execution(&self, task_id: TaskId, node_id: NodeId, worker_id: WorkerId);

    /// The task ran; `is_application_error` distinguishes a raised
    /// application exception from a normal return.
    fn complete_pending_task(
        &self,
        task_id: TaskId,
        reply: &PushTaskReply,
        addr: &WorkerAddress,
        is_application_error: bool,
    );

    /// Fail the task, or schedule a retry if the task's budget allows one.
    /// Returns whether a retry was scheduled. `mark_task_object_failed`
    /// materializes the error into the task's return objects immediately;
    /// `fail_immediately` bypasses the retry budget.
    fn fail_or_retry_pending_task(
        &self,
        task_id: TaskId,
        error: &TaskError,
        mark_task_object_failed: bool,
        fail_immediately: bool,
    ) -> bool;

    /// Fail the task unconditionally.
    fn fail_pending_task(&self, task_id: TaskId, error: &TaskError);

    /// The spec of a task that has not finished yet, if the tracker still
    /// holds one.
    fn task_spec(&self, task_id: TaskId) -> Option<TaskSpec>;
}
