//! Transport seam.
//!
//! Dispatch never talks to the network directly; it hands fully-built
//! requests to an [`ActorClient`] obtained from the [`WorkerClientPool`]
//! and consumes replies through continuation callbacks. Connection
//! management, framing, and wire-level retries all live behind these
//! traits.

use flux_types::{ActorId, TaskId, TaskSpec, WorkerAddress, WorkerId};
use std::sync::Arc;
use thiserror::Error;

/// Transport-level failure for a single RPC.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The connection failed or the peer never answered.
    #[error("io error: {0}")]
    Io(String),
    /// The receiving scheduler dropped the task before it executed.
    #[error("scheduling cancelled: {0}")]
    SchedulingCancelled(String),
}

/// Request pushing one task to an actor.
#[derive(Debug, Clone)]
pub struct PushTaskRequest {
    pub spec: TaskSpec,
    /// The worker incarnation this request is valid for; a worker that
    /// does not match rejects the request.
    pub intended_worker_id: WorkerId,
    /// Transport-level sequence number assigned by the submit queue.
    pub sequence_number: u64,
}

/// Reply to a [`PushTaskRequest`].
#[derive(Debug, Clone, Default)]
pub struct PushTaskReply {
    /// The task ran and raised an application-level exception; the reply
    /// payload carries the serialized error value.
    pub is_application_error: bool,
}

/// Request to kill an actor process.
#[derive(Debug, Clone)]
pub struct KillActorRequest {
    pub intended_actor_id: ActorId,
    /// SIGKILL instead of a graceful stop.
    pub force_kill: bool,
    /// Prevent the cluster from restarting the actor afterwards.
    pub no_restart: bool,
}

/// Request to cancel one task on the actor side.
#[derive(Debug, Clone)]
pub struct CancelTaskRequest {
    pub intended_task_id: TaskId,
    pub force_kill: bool,
    pub recursive: bool,
}

/// Reply to a [`CancelTaskRequest`].
#[derive(Debug, Clone, Default)]
pub struct CancelTaskReply {
    /// Whether the executor acted on the cancellation this attempt. False
    /// means the caller should retry later.
    pub attempt_succeeded: bool,
}

/// Continuation invoked with the outcome of a push RPC.
pub type PushReplyCallback = Box<dyn FnOnce(Result<PushTaskReply, TransportError>) + Send>;

/// Continuation invoked with the outcome of a cancel RPC.
pub type CancelReplyCallback = Box<dyn FnOnce(Result<CancelTaskReply, TransportError>) + Send>;

/// Connection to one worker process.
///
/// Implementations own their send queue; `push_actor_task` and
/// `cancel_task` return immediately and deliver the outcome through the
/// supplied callback, which may run on any thread. `kill_actor` is
/// fire-and-forget: a kill that races actor death has nothing useful to
/// report.
pub trait ActorClient: Send + Sync {
    /// Address this client was opened against.
    fn addr(&self) -> WorkerAddress;

    /// Queue one task for delivery. `skip_queue` asks the transport to
    /// bypass its sequence gate, used when replaying after a reconnect.
    fn push_actor_task(
        &self,
        request: PushTaskRequest,
        skip_queue: bool,
        on_reply: PushReplyCallback,
    );

    /// Ask the worker to terminate its actor.
    fn kill_actor(&self, request: KillActorRequest);

    /// Ask the worker to cancel a task it may be holding or running.
    fn cancel_task(&self, request: CancelTaskRequest, on_reply: CancelReplyCallback);
}

/// Shared pool of worker connections.
///
/// Dispatch borrows clients from the pool and returns them on disconnect;
/// it never holds more than one client per actor.
pub trait WorkerClientPool: Send + Sync {
    /// Fetch the pooled client for `addr`, opening a connection if none
    /// exists yet.
    fn get_or_connect(&self, addr: &WorkerAddress) -> Arc<dyn ActorClient>;

    /// Return the pool entry for `worker_id`.
    fn disconnect(&self, worker_id: WorkerId);
}
