//! Actor task submitter.
//!
//! The dispatch core on the caller side: one registry of per-actor client
//! queues, driven concurrently by user submissions, dependency-resolution
//! callbacks, cluster-directory connect/disconnect notifications, and
//! transport reply callbacks.
//!
//! A single mutex protects the registry and everything inside it. The lock
//! is never held across calls into the dependency resolver, the task
//! tracker, the transport, or user-supplied hooks; any of those may call
//! back into this module (or into a foreign language runtime) and would
//! deadlock. The working pattern throughout is capture-under-lock,
//! release, then invoke: transport work is staged into a [`DispatchBatch`]
//! while locked and flushed afterwards, and drained reply callbacks are
//! moved into locals before they are failed.

use crate::config::DispatchConfig;
use crate::error::{DeathCause, ResolveError, TaskError, TaskErrorKind};
use crate::executor::{Clock, Executor};
use crate::queue::{ActorQueue, ActorState, DeathWatchEntry};
use crate::resolver::DependencyResolver;
use crate::rpc::{
    ActorClient, CancelTaskReply, CancelTaskRequest, KillActorRequest, PushReplyCallback,
    PushTaskReply, PushTaskRequest, TransportError, WorkerClientPool,
};
use crate::tracker::TaskTracker;
use flux_types::{ActorId, TaskId, TaskSpec, WorkerAddress};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Hook invoked when an actor accumulates an excessive number of in-flight
/// replies. Receives the actor and the current in-flight count.
pub type QueueingWarningHook = Box<dyn Fn(ActorId, usize) + Send + Sync>;

/// Client-side dispatcher for actor tasks.
///
/// Cheap to clone handles are not provided on purpose: collaborator
/// callbacks capture a weak reference and look their actor up again on
/// every entry, so they stay harmless after the submitter (or the actor's
/// interest in it) is gone.
pub struct ActorTaskSubmitter {
    core: Arc<SubmitterCore>,
}

impl ActorTaskSubmitter {
    pub fn new(
        resolver: Arc<dyn DependencyResolver>,
        tracker: Arc<dyn TaskTracker>,
        pool: Arc<dyn WorkerClientPool>,
        executor: Arc<dyn Executor>,
        clock: Arc<dyn Clock>,
        config: DispatchConfig,
        warn_excess_queueing: Option<QueueingWarningHook>,
    ) -> Self {
        let queueing_warn_threshold = config.queueing_warn_threshold;
        Self {
            core: Arc::new(SubmitterCore {
                state: Mutex::new(RegistryState {
                    queues: HashMap::new(),
                    queueing_warn_threshold,
                }),
                resolver,
                tracker,
                pool,
                executor,
                clock,
                config,
                warn_excess_queueing,
            }),
        }
    }

    /// Register an actor, creating a fresh PENDING queue if none exists.
    ///
    /// Re-registration is a no-op: a process may hold many handles to the
    /// same actor and the first registration wins.
    pub fn add_actor_queue_if_absent(
        &self,
        actor_id: ActorId,
        max_pending_calls: usize,
        execute_out_of_order: bool,
        fail_if_actor_unreachable: bool,
    ) {
        let mut state = self.core.state.lock();
        state.queues.entry(actor_id).or_insert_with(|| {
            info!(
                "Set max pending calls to {} for actor {}",
                max_pending_calls, actor_id
            );
            ActorQueue::new(
                max_pending_calls,
                execute_out_of_order,
                fail_if_actor_unreachable,
            )
        });
    }

    /// Queue a task for the actor named in its spec.
    ///
    /// Always accepts; submission failures surface asynchronously through
    /// the task tracker. The caller must have registered the actor and must
    /// assign strictly increasing `actor_counter` values.
    pub fn submit_task(&self, spec: TaskSpec) {
        self.core.submit_task(spec);
    }

    /// Request cancellation of a task submitted earlier. Advisory and
    /// asynchronous: terminal status is surfaced by the reply path.
    pub fn cancel_task(&self, spec: TaskSpec, recursive: bool) {
        self.core.cancel_task(spec, recursive);
    }

    /// Stage a kill request for the actor and flush it promptly.
    pub fn kill_actor(&self, actor_id: ActorId, force_kill: bool, no_restart: bool) {
        self.core.kill_actor(actor_id, force_kill, no_restart);
    }

    /// Directory notification: an incarnation of the actor is reachable.
    pub fn connect_actor(&self, actor_id: ActorId, addr: WorkerAddress, num_restarts: u64) {
        self.core.connect_actor(actor_id, addr, num_restarts);
    }

    /// Directory notification: the current incarnation failed, possibly
    /// permanently.
    pub fn disconnect_actor(
        &self,
        actor_id: ActorId,
        num_restarts: u64,
        dead: bool,
        cause: Option<DeathCause>,
    ) {
        self.core.disconnect_actor(actor_id, num_restarts, dead, cause);
    }

    /// Expire tasks whose death-information grace window has elapsed.
    /// Driven periodically by the owner; cadence is the owner's choice.
    pub fn check_timeout_tasks(&self) {
        self.core.check_timeout_tasks();
    }

    /// Whether the actor is registered and currently connected.
    pub fn is_actor_alive(&self, actor_id: ActorId) -> bool {
        let state = self.core.state.lock();
        state
            .queues
            .get(&actor_id)
            .map(|queue| queue.client.is_some())
            .unwrap_or(false)
    }

    pub fn check_actor_exists(&self, actor_id: ActorId) -> bool {
        self.core.state.lock().queues.contains_key(&actor_id)
    }

    /// Number of tasks submitted and not yet handed back to the tracker.
    pub fn num_pending_tasks(&self, actor_id: ActorId) -> usize {
        let state = self.core.state.lock();
        state
            .queues
            .get(&actor_id)
            .expect("actor not registered")
            .cur_pending_calls
    }

    /// Whether the actor's advisory admission limit is reached.
    pub fn pending_tasks_full(&self, actor_id: ActorId) -> bool {
        let state = self.core.state.lock();
        let queue = state.queues.get(&actor_id).expect("actor not registered");
        queue.max_pending_calls > 0 && queue.cur_pending_calls >= queue.max_pending_calls
    }

    pub fn debug_string(&self, actor_id: ActorId) -> String {
        let state = self.core.state.lock();
        let queue = state.queues.get(&actor_id).expect("actor not registered");
        format!(
            "Submitter debug string for actor {} {}",
            actor_id,
            queue.debug_string()
        )
    }
}

struct RegistryState {
    queues: HashMap<ActorId, ActorQueue>,
    /// Process-wide warning threshold; doubles after each warning.
    queueing_warn_threshold: usize,
}

struct SubmitterCore {
    state: Mutex<RegistryState>,
    resolver: Arc<dyn DependencyResolver>,
    tracker: Arc<dyn TaskTracker>,
    pool: Arc<dyn WorkerClientPool>,
    executor: Arc<dyn Executor>,
    clock: Arc<dyn Clock>,
    config: DispatchConfig,
    warn_excess_queueing: Option<QueueingWarningHook>,
}

/// Transport work captured under the lock, performed after release.
#[derive(Default)]
struct DispatchBatch {
    kill: Option<(Arc<dyn ActorClient>, KillActorRequest)>,
    pushes: Vec<StagedPush>,
}

struct StagedPush {
    client: Arc<dyn ActorClient>,
    request: PushTaskRequest,
    skip_queue: bool,
    on_reply: PushReplyCallback,
    addr: WorkerAddress,
    /// Fire the excess-queueing warning with this in-flight count.
    warn_at: Option<usize>,
}

impl SubmitterCore {
    // ------------------------------------------------------------------
    // Submission path
    // ------------------------------------------------------------------

    fn submit_task(self: &Arc<Self>, spec: TaskSpec) {
        let task_id = spec.task_id();
        let actor_id = spec.actor_id();
        let send_pos = spec.actor_counter();
        debug!("Submitting task {} to actor {}", task_id, actor_id);

        let task_queued = {
            let mut state = self.state.lock();
            let queue = state
                .queues
                .get_mut(&actor_id)
                .expect("actor not registered before submit");
            if queue.state == ActorState::Dead {
                false
            } else {
                // The send order is fixed here, before dependency
                // resolution, which completes out of order. The receiving
                // actor executes according to this sequence, so mutually
                // blocking tasks cannot deadlock on its backpressure.
                assert!(
                    queue.submit_queue.emplace(send_pos, spec.clone()),
                    "duplicate actor counter {} for actor {}",
                    send_pos,
                    actor_id
                );
                queue.cur_pending_calls += 1;
                true
            }
        };

        if task_queued {
            let core = Arc::downgrade(self);
            self.executor.post(
                Box::new(move || {
                    if let Some(core) = core.upgrade() {
                        core.resolve_dependencies(spec, send_pos);
                    }
                }),
                "actor_task_submitter.resolve",
            );
        } else {
            // The actor is already dead; fail the task with the recorded
            // cause. The pending-call counter is untouched.
            self.tracker.mark_task_canceled(task_id);
            let error = {
                let state = self.state.lock();
                let queue = state
                    .queues
                    .get(&actor_id)
                    .expect("actor not registered before submit");
                TaskError::from_death_cause(queue.death_cause.as_ref(), actor_id, false)
                    .with_detail("cancelling task of dead actor")
            };
            let fail_immediately = error.fail_immediately();
            self.tracker
                .fail_or_retry_pending_task(task_id, &error, true, fail_immediately);
        }
    }

    fn resolve_dependencies(self: &Arc<Self>, spec: TaskSpec, send_pos: u64) {
        let actor_id = spec.actor_id();
        let task_id = spec.task_id();
        let core = Arc::downgrade(self);
        self.resolver.resolve_dependencies(
            &spec,
            Box::new(move |result| {
                if let Some(core) = core.upgrade() {
                    core.on_dependencies_resolved(actor_id, task_id, send_pos, result);
                }
            }),
        );
    }

    fn on_dependencies_resolved(
        self: &Arc<Self>,
        actor_id: ActorId,
        task_id: TaskId,
        send_pos: u64,
        result: Result<(), ResolveError>,
    ) {
        self.tracker.mark_dependencies_resolved(task_id);
        let mut failed_task = None;
        let mut batch = DispatchBatch::default();
        {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let queue = state
                .queues
                .get_mut(&actor_id)
                .expect("actor not registered");
            // Only dispatch if the task is still queued; a concurrent death
            // or cancellation may have dequeued it.
            let mut dispatch = false;
            if queue.submit_queue.contains(send_pos) {
                match &result {
                    Ok(()) => {
                        queue.submit_queue.mark_dependency_resolved(send_pos);
                        dispatch = true;
                    }
                    Err(_) => {
                        failed_task = queue.submit_queue.task_id(send_pos);
                        queue.submit_queue.mark_dependency_failed(send_pos);
                        queue.cur_pending_calls -= 1;
                    }
                }
            }
            if dispatch {
                self.send_pending_tasks(state, actor_id, &mut batch);
            }
        }
        self.flush_dispatch(batch);

        if let Some(failed_id) = failed_task {
            let message = match result {
                Err(error) => error.to_string(),
                Ok(()) => unreachable!("dependency failure without an error"),
            };
            let error = TaskError::new(TaskErrorKind::DependencyResolutionFailed, message);
            self.tracker
                .fail_or_retry_pending_task(failed_id, &error, true, false);
        }
    }

    // ------------------------------------------------------------------
    // Connection events
    // ------------------------------------------------------------------

    fn connect_actor(self: &Arc<Self>, actor_id: ActorId, addr: WorkerAddress, num_restarts: u64) {
        debug!(
            "Connecting to actor {} at worker {}",
            actor_id, addr.worker_id
        );
        let mut stale_replies = HashMap::new();
        let mut batch = DispatchBatch::default();
        {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let queue = state
                .queues
                .get_mut(&actor_id)
                .expect("actor not registered");
            if num_restarts < queue.num_restarts {
                info!(
                    "Skipping connect to actor {}: incarnation {} was already superseded",
                    actor_id, num_restarts
                );
                return;
            }
            if queue.state == ActorState::Dead {
                return;
            }
            if let Some(client) = &queue.client {
                if client.addr().same_endpoint(&addr) {
                    debug!("Actor {} is already connected at {}", actor_id, addr);
                    return;
                }
            }

            queue.num_restarts = num_restarts;
            if queue.client.is_some() {
                // Drop the client of the previous incarnation; its
                // outstanding replies are failed once the lock is released.
                self.disconnect_rpc_client(queue);
                stale_replies = std::mem::take(&mut queue.inflight_replies);
            }

            queue.state = ActorState::Alive;
            queue.worker_id = Some(addr.worker_id);
            queue.client = Some(self.pool.get_or_connect(&addr));
            queue.submit_queue.on_client_connected();
            info!(
                "Connected to actor {} at worker {} ({})",
                actor_id, addr.worker_id, addr
            );

            // Skip-acks for previously completed tasks go out before any
            // fresh work.
            self.resend_out_of_order_tasks(state, actor_id, &mut batch);
            self.send_pending_tasks(state, actor_id, &mut batch);
        }
        self.fail_stale_replies(stale_replies);
        self.flush_dispatch(batch);
    }

    fn disconnect_actor(
        self: &Arc<Self>,
        actor_id: ActorId,
        num_restarts: u64,
        dead: bool,
        cause: Option<DeathCause>,
    ) {
        debug!("Disconnecting from actor {} (dead={})", actor_id, dead);
        let mut stale_replies = HashMap::new();
        let mut task_ids_to_fail = Vec::new();
        let mut death_watch = VecDeque::new();
        {
            let mut state = self.state.lock();
            let queue = state
                .queues
                .get_mut(&actor_id)
                .expect("actor not registered");
            if !dead {
                assert!(
                    num_restarts > 0,
                    "restart notification without a restart count"
                );
                if num_restarts <= queue.num_restarts {
                    info!(
                        "Skipping disconnect from actor {}: incarnation {} was already superseded",
                        actor_id, num_restarts
                    );
                    return;
                }
            }

            // Either the actor is permanently dead or a new client will be
            // installed once it restarts.
            self.disconnect_rpc_client(queue);
            stale_replies = std::mem::take(&mut queue.inflight_replies);

            if dead {
                queue.state = ActorState::Dead;
                queue.preempted = cause.as_ref().map(DeathCause::preempted).unwrap_or(false);
                queue.death_cause = cause.clone();
                task_ids_to_fail = queue.submit_queue.clear_all();
                queue.cur_pending_calls -= task_ids_to_fail.len();
                death_watch = std::mem::take(&mut queue.wait_for_death_info);
                if !task_ids_to_fail.is_empty() {
                    info!(
                        "Failing {} pending tasks of dead actor {}",
                        task_ids_to_fail.len(),
                        actor_id
                    );
                }
            } else if queue.state != ActorState::Dead {
                queue.state = ActorState::Restarting;
                queue.num_restarts = num_restarts;
            }
        }

        if !task_ids_to_fail.is_empty() || !death_watch.is_empty() {
            let error = TaskError::from_death_cause(cause.as_ref(), actor_id, false)
                .with_detail("cancelling all pending tasks of dead actor");
            let fail_immediately = error.fail_immediately();
            for task_id in task_ids_to_fail {
                self.tracker.mark_task_canceled(task_id);
                // The task may still be waiting on dependency resolution.
                self.resolver.cancel_resolution(task_id);
                self.tracker
                    .fail_or_retry_pending_task(task_id, &error, true, fail_immediately);
            }
            if !death_watch.is_empty() {
                debug!(
                    "Failing {} tasks waiting for death info of actor {}",
                    death_watch.len(),
                    actor_id
                );
            }
            for entry in death_watch {
                let parked_error = error.clone().with_detail(entry.last_error.to_string());
                self.tracker
                    .fail_pending_task(entry.spec.task_id(), &parked_error);
            }
        }
        self.fail_stale_replies(stale_replies);
    }

    /// Release the transport client and everything tied to the worker it
    /// pointed at. Lock held by the caller.
    fn disconnect_rpc_client(&self, queue: &mut ActorQueue) {
        queue.client = None;
        if let Some(worker_id) = queue.worker_id.take() {
            self.pool.disconnect(worker_id);
        }
        queue.pending_force_kill = None;
    }

    /// Fail reply continuations that were outstanding on a dropped
    /// connection. Must be called with the lock released: the callbacks
    /// re-enter the reply path.
    fn fail_stale_replies(&self, replies: HashMap<TaskId, PushReplyCallback>) {
        for (_, callback) in replies {
            // Behaves exactly like a network loss on the old connection.
            callback(Err(TransportError::Io(
                "failing in-flight task due to actor state change".to_string(),
            )));
        }
    }

    // ------------------------------------------------------------------
    // Dispatch engine
    // ------------------------------------------------------------------

    /// Drain the submit queue into the dispatch batch. Lock held by the
    /// caller; the batch is flushed after release.
    fn send_pending_tasks(
        self: &Arc<Self>,
        state: &mut RegistryState,
        actor_id: ActorId,
        batch: &mut DispatchBatch,
    ) {
        let queue = state
            .queues
            .get_mut(&actor_id)
            .expect("actor not registered");
        if queue.client.is_none() {
            if queue.state == ActorState::Restarting && queue.fail_if_actor_unreachable {
                // Tasks submitted during a restart fail with a synthesized
                // transport error instead of waiting for the new
                // incarnation.
                while let Some((spec, _)) = queue.submit_queue.pop_next_task_to_send() {
                    let core = Arc::downgrade(self);
                    self.executor.post(
                        Box::new(move || {
                            if let Some(core) = core.upgrade() {
                                core.handle_push_task_reply(
                                    Err(TransportError::Io(
                                        "the actor is temporarily unavailable".to_string(),
                                    )),
                                    WorkerAddress::default(),
                                    spec,
                                );
                            }
                        }),
                        "actor_task_submitter.force_fail",
                    );
                }
            }
            return;
        }

        if let Some(kill) = queue.pending_force_kill.take() {
            // A failure here means the worker is already dead, which is fine.
            info!("Sending kill request to actor {}", actor_id);
            let client = queue.client.clone().expect("client checked above");
            batch.kill = Some((client, kill));
        }

        loop {
            let queue = state
                .queues
                .get_mut(&actor_id)
                .expect("actor not registered");
            let Some((spec, skip_queue)) = queue.submit_queue.pop_next_task_to_send() else {
                break;
            };
            self.push_actor_task(state, actor_id, spec, skip_queue, batch);
        }
    }

    /// Replay completion acknowledgements for tasks that finished on the
    /// previous incarnation out of sequence, so the new incarnation
    /// advances its receive counter without re-executing them. Lock held
    /// by the caller, client connected.
    fn resend_out_of_order_tasks(
        self: &Arc<Self>,
        state: &mut RegistryState,
        actor_id: ActorId,
        batch: &mut DispatchBatch,
    ) {
        let queue = state
            .queues
            .get_mut(&actor_id)
            .expect("actor not registered");
        if queue.client.is_none() {
            return;
        }
        let completed = queue.submit_queue.pop_out_of_order_completed();
        for mut spec in completed {
            spec.set_skip_execution(true);
            self.push_actor_task(state, actor_id, spec, true, batch);
        }
    }

    /// Build the wire request for one task, register its reply
    /// continuation, and stage the transport hand-off. Lock held by the
    /// caller.
    fn push_actor_task(
        self: &Arc<Self>,
        state: &mut RegistryState,
        actor_id: ActorId,
        spec: TaskSpec,
        skip_queue: bool,
        batch: &mut DispatchBatch,
    ) {
        let task_id = spec.task_id();
        let queue = state
            .queues
            .get_mut(&actor_id)
            .expect("actor not registered");
        let client = queue
            .client
            .clone()
            .expect("pushing a task without a connected client");
        let worker_id = queue.worker_id.expect("pushing a task without a worker id");

        let request = PushTaskRequest {
            spec: spec.clone(),
            intended_worker_id: worker_id,
            sequence_number: queue.submit_queue.sequence_number(&spec),
        };

        let num_queued = queue.inflight_replies.len();
        debug!(
            "Pushing task {} to actor {} counter {} seq {} inflight {}",
            task_id,
            actor_id,
            spec.actor_counter(),
            request.sequence_number,
            num_queued
        );
        let mut warn_at = None;
        if num_queued >= state.queueing_warn_threshold {
            warn_at = Some(num_queued);
            state.queueing_warn_threshold *= 2;
        }

        let addr = client.addr();

        // Inner continuation: the reply state machine.
        let core = Arc::downgrade(self);
        let reply_addr = addr.clone();
        let on_reply: PushReplyCallback = Box::new(move |result| {
            if let Some(core) = core.upgrade() {
                core.handle_push_task_reply(result, reply_addr, spec);
            }
        });
        let queue = state
            .queues
            .get_mut(&actor_id)
            .expect("actor not registered");
        queue.inflight_replies.insert(task_id, on_reply);

        // Outer continuation handed to the transport: consumes the
        // in-flight slot, which a reconnect may have failed already.
        let core = Arc::downgrade(self);
        let wrapped: PushReplyCallback = Box::new(move |result| {
            let Some(core) = core.upgrade() else { return };
            let callback = {
                let mut state = core.state.lock();
                let Some(queue) = state.queues.get_mut(&actor_id) else {
                    return;
                };
                match queue.inflight_replies.remove(&task_id) {
                    Some(callback) => callback,
                    None => {
                        debug!("Task {} was already marked failed; ignoring reply", task_id);
                        return;
                    }
                }
            };
            callback(result);
        });

        batch.pushes.push(StagedPush {
            client,
            request,
            skip_queue,
            on_reply: wrapped,
            addr,
            warn_at,
        });
    }

    /// Perform the transport work captured under the lock. Must be called
    /// with the lock released; the tracker and the warning hook run here.
    fn flush_dispatch(&self, batch: DispatchBatch) {
        if let Some((client, request)) = batch.kill {
            client.kill_actor(request);
        }
        for push in batch.pushes {
            let task_id = push.request.spec.task_id();
            let actor_id = push.request.spec.actor_id();
            self.tracker.mark_task_waiting_for_execution(
                task_id,
                push.addr.node_id,
                push.addr.worker_id,
            );
            if let Some(num_queued) = push.warn_at {
                warn!(
                    "Actor {} has {} in-flight tasks queued on its connection",
                    actor_id, num_queued
                );
                if let Some(hook) = &self.warn_excess_queueing {
                    hook(actor_id, num_queued);
                }
            }
            push.client
                .push_actor_task(push.request, push.skip_queue, push.on_reply);
        }
    }

    // ------------------------------------------------------------------
    // Reply handling
    // ------------------------------------------------------------------

    fn handle_push_task_reply(
        self: &Arc<Self>,
        result: Result<PushTaskReply, TransportError>,
        addr: WorkerAddress,
        spec: TaskSpec,
    ) {
        let task_id = spec.task_id();
        let actor_id = spec.actor_id();
        let actor_counter = spec.actor_counter();
        let task_skipped = spec.skip_execution();
        let mut will_retry = false;

        if task_skipped {
            // Receiver-side acknowledgement of sequence advancement for a
            // task that already completed on a previous incarnation;
            // whatever the status, only the bookkeeping below applies.
        } else {
            match &result {
                Ok(reply) => {
                    self.tracker.complete_pending_task(
                        task_id,
                        reply,
                        &addr,
                        reply.is_application_error,
                    );
                }
                Err(TransportError::SchedulingCancelled(reason)) => {
                    debug!(
                        "Task {} was canceled by the actor scheduler: {}",
                        task_id, reason
                    );
                    let error = TaskError::cancelled(format!(
                        "task {task_id} was canceled before it executed on actor {actor_id}"
                    ));
                    self.tracker.fail_pending_task(task_id, &error);
                }
                Err(TransportError::Io(io_detail)) => {
                    // If the actor is already dead the return objects fail
                    // immediately; otherwise the grace window may apply.
                    let (is_actor_dead, error) = {
                        let state = self.state.lock();
                        let queue = state.queues.get(&actor_id).expect("actor not registered");
                        let restarting = queue.state == ActorState::Restarting;
                        (
                            queue.state == ActorState::Dead,
                            TaskError::from_death_cause(
                                queue.death_cause.as_ref(),
                                actor_id,
                                restarting,
                            ),
                        )
                    };
                    let fail_immediately = error.fail_immediately();
                    let error = error.with_detail(io_detail);

                    // A retry may still be resolving dependencies; stop that
                    // first.
                    self.resolver.cancel_resolution(task_id);

                    will_retry = self.tracker.fail_or_retry_pending_task(
                        task_id,
                        &error,
                        is_actor_dead,
                        fail_immediately,
                    );

                    if !is_actor_dead && !will_retry {
                        let grace_ms = self.config.wait_for_death_info_grace_ms;
                        if grace_ms != 0 {
                            let deadline_ms = self.clock.current_time_ms() + grace_ms as i64;
                            let mut state = self.state.lock();
                            let queue = state
                                .queues
                                .get_mut(&actor_id)
                                .expect("actor not registered");
                            queue.wait_for_death_info.push_back(DeathWatchEntry {
                                deadline_ms,
                                spec: spec.clone(),
                                last_error: TransportError::Io(io_detail.clone()),
                            });
                            info!(
                                "Task {} hit a network error; waiting up to {}ms for the death \
                                 cause of actor {} (parked={})",
                                task_id,
                                grace_ms,
                                actor_id,
                                queue.wait_for_death_info.len()
                            );
                        } else {
                            let error =
                                TaskError::new(TaskErrorKind::ActorDied, format!("actor {actor_id} died"))
                                    .with_detail(io_detail);
                            self.tracker.fail_pending_task(task_id, &error);
                        }
                    }
                }
            }
        }

        let mut state = self.state.lock();
        let queue = state
            .queues
            .get_mut(&actor_id)
            .expect("actor not registered");
        if !task_skipped {
            // Skip-acks never carried a pending call of their own.
            queue.cur_pending_calls -= 1;
        }
        if !will_retry {
            queue.submit_queue.mark_task_completed(actor_counter, spec);
        }
    }

    // ------------------------------------------------------------------
    // Kill, cancel, timeout sweep
    // ------------------------------------------------------------------

    fn kill_actor(self: &Arc<Self>, actor_id: ActorId, force_kill: bool, no_restart: bool) {
        let mut batch = DispatchBatch::default();
        {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let queue = state
                .queues
                .get_mut(&actor_id)
                .expect("kill for an unregistered actor");
            if let Some(staged) = queue.pending_force_kill.as_mut() {
                // A repeat request only supersedes the staged one when it
                // escalates.
                if force_kill {
                    staged.force_kill = true;
                    if no_restart {
                        staged.no_restart = true;
                    }
                }
            } else {
                queue.pending_force_kill = Some(KillActorRequest {
                    intended_actor_id: actor_id,
                    force_kill,
                    no_restart,
                });
            }
            self.send_pending_tasks(state, actor_id, &mut batch);
        }
        self.flush_dispatch(batch);
    }

    fn cancel_task(self: &Arc<Self>, spec: TaskSpec, recursive: bool) {
        // Force-kill never applies to actor tasks.
        let force_kill = false;
        let actor_id = spec.actor_id();
        let task_id = spec.task_id();
        let send_pos = spec.actor_counter();
        info!(
            "Cancelling task {} on actor {} (recursive={})",
            task_id, actor_id, recursive
        );

        if !self.tracker.mark_task_canceled(task_id) {
            debug!("Task {} is already finished or canceled", task_id);
            return;
        }

        let task_queued;
        let mut cancel_resolution = false;
        {
            let mut state = self.state.lock();
            let queue = state
                .queues
                .get_mut(&actor_id)
                .expect("actor not registered");
            if queue.state == ActorState::Dead {
                debug!(
                    "Actor {} is already dead; ignoring cancel of task {}",
                    actor_id, task_id
                );
                return;
            }
            task_queued = queue.submit_queue.contains(send_pos);
            if task_queued {
                cancel_resolution = !queue.submit_queue.dependency_resolved(send_pos);
                queue.submit_queue.mark_canceled(send_pos);
                queue.cur_pending_calls -= 1;
            }
        }

        if cancel_resolution {
            debug!(
                "Task {} was still resolving dependencies; cancelling resolution",
                task_id
            );
            self.resolver.cancel_resolution(task_id);
        }

        if task_queued {
            // The task never reached the transport; fail it right away.
            let error = TaskError::cancelled(format!(
                "task {task_id} was canceled before it executed on actor {actor_id}"
            ));
            self.tracker
                .fail_or_retry_pending_task(task_id, &error, true, false);
            return;
        }

        // The task was sent and has not finished. Delivery order against
        // the task itself is not guaranteed, so keep issuing cancel RPCs
        // until the tracker forgets the task or an executor acts on one.
        let staged = {
            let mut state = self.state.lock();
            let queue = state
                .queues
                .get_mut(&actor_id)
                .expect("actor not registered");
            match queue.client.clone() {
                None => {
                    // No client means the incarnation is gone or not up
                    // yet; try again once it reconnects.
                    self.retry_cancel_task(spec.clone(), recursive, Duration::from_secs(1));
                    None
                }
                Some(client) => Some((
                    client,
                    CancelTaskRequest {
                        intended_task_id: task_id,
                        force_kill,
                        recursive,
                    },
                )),
            }
        };

        if let Some((client, request)) = staged {
            debug!("Sending cancel RPC for task {}", task_id);
            let core = Arc::downgrade(self);
            client.cancel_task(
                request,
                Box::new(move |result| {
                    if let Some(core) = core.upgrade() {
                        core.on_cancel_reply(spec, recursive, result);
                    }
                }),
            );
        }
    }

    fn on_cancel_reply(
        self: &Arc<Self>,
        spec: TaskSpec,
        recursive: bool,
        result: Result<CancelTaskReply, TransportError>,
    ) {
        let task_id = spec.task_id();
        if self.tracker.task_spec(task_id).is_none() {
            debug!("Task {} is finished; stopping cancel retries", task_id);
            return;
        }
        let attempt_succeeded = result
            .map(|reply| reply.attempt_succeeded)
            .unwrap_or(false);
        if !attempt_succeeded {
            self.retry_cancel_task(spec, recursive, Duration::from_secs(2));
        }
    }

    fn retry_cancel_task(self: &Arc<Self>, spec: TaskSpec, recursive: bool, delay: Duration) {
        debug!(
            "Cancellation of task {} will be retried in {:?}",
            spec.task_id(),
            delay
        );
        let core = Arc::downgrade(self);
        self.executor.execute_after(
            delay,
            Box::new(move || {
                if let Some(core) = core.upgrade() {
                    core.cancel_task(spec, recursive);
                }
            }),
        );
    }

    fn check_timeout_tasks(&self) {
        let now_ms = self.clock.current_time_ms();
        let mut expired = Vec::new();
        {
            let mut state = self.state.lock();
            for (actor_id, queue) in state.queues.iter_mut() {
                while let Some(entry) = queue.wait_for_death_info.front() {
                    if entry.deadline_ms > now_ms {
                        break;
                    }
                    let entry = queue
                        .wait_for_death_info
                        .pop_front()
                        .expect("front entry disappeared");
                    expired.push((*actor_id, queue.preempted, entry));
                }
            }
        }

        // Failing a task can re-enter user code through the tracker (for
        // example a language runtime reacquiring its own global lock), so
        // this must run with the registry lock released.
        for (actor_id, preempted, entry) in expired {
            warn!(
                "Task {} timed out waiting for the death cause of actor {}",
                entry.spec.task_id(),
                actor_id
            );
            let cause = DeathCause::ActorDied { preempted };
            let error = TaskError::from_death_cause(Some(&cause), actor_id, false)
                .with_detail(entry.last_error.to_string());
            self.tracker.fail_pending_task(entry.spec.task_id(), &error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{
        ManualClock, ManualExecutor, RecordingTracker, ScriptedClientPool, ScriptedResolver,
    };

    fn submitter() -> ActorTaskSubmitter {
        let clock = ManualClock::new(0);
        ActorTaskSubmitter::new(
            ScriptedResolver::new(),
            RecordingTracker::new(),
            ScriptedClientPool::new(),
            ManualExecutor::new(clock.clone()),
            clock,
            DispatchConfig::default(),
            None,
        )
    }

    #[test]
    fn test_queries_on_fresh_registration() {
        let s = submitter();
        let actor = ActorId::new();
        assert!(!s.check_actor_exists(actor));
        s.add_actor_queue_if_absent(actor, 0, false, false);
        assert!(s.check_actor_exists(actor));
        assert!(!s.is_actor_alive(actor));
        assert_eq!(s.num_pending_tasks(actor), 0);
        // A zero limit means unlimited.
        assert!(!s.pending_tasks_full(actor));
    }

    #[test]
    #[should_panic(expected = "restart notification without a restart count")]
    fn test_non_dead_disconnect_requires_restart_count() {
        let s = submitter();
        let actor = ActorId::new();
        s.add_actor_queue_if_absent(actor, 0, false, false);
        s.disconnect_actor(actor, 0, false, None);
    }
}
