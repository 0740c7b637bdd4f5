//! # Flux Actor Task Dispatch
//!
//! Client-side dispatch of method invocations to long-lived remote actors.
//! This library owns the caller's view of every actor it talks to: a
//! per-actor state machine (PENDING/ALIVE/RESTARTING/DEAD), the submit
//! queue that preserves caller order across out-of-order dependency
//! resolution, reconnect reconciliation with skip-execution replay, the
//! death-information grace window, and advisory cancellation.
//!
//! It deliberately does not own the surrounding machinery: dependency
//! resolution, task lifecycle records, the worker connection pool, and
//! deferred-work scheduling are consumed through traits
//! ([`DependencyResolver`], [`TaskTracker`], [`WorkerClientPool`],
//! [`Executor`]) so hosts and tests supply their own.
//!
//! ## Threading
//!
//! Every public operation on [`ActorTaskSubmitter`] is thread-safe. One
//! mutex guards the registry; collaborator callbacks are never invoked
//! while it is held.

pub mod config;
pub mod error;
pub mod executor;
pub mod queue;
pub mod resolver;
pub mod rpc;
pub mod submit_queue;
pub mod submitter;
pub mod test_utils;
pub mod tracker;

pub use config::DispatchConfig;
pub use error::{DeathCause, ResolveError, TaskError, TaskErrorKind};
pub use executor::{Clock, Executor, SystemClock, TokioExecutor, WorkItem};
pub use queue::ActorState;
pub use resolver::{DependencyResolver, ResolveCallback};
pub use rpc::{
    ActorClient, CancelReplyCallback, CancelTaskReply, CancelTaskRequest, KillActorRequest,
    PushReplyCallback, PushTaskReply, PushTaskRequest, TransportError, WorkerClientPool,
};
pub use submit_queue::{create_submit_queue, OrderedSubmitQueue, SubmitQueue, UnorderedSubmitQueue};
pub use submitter::{ActorTaskSubmitter, QueueingWarningHook};
pub use tracker::TaskTracker;
