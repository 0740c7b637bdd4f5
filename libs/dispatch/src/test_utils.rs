//! Deterministic test doubles for the dispatch seams.
//!
//! Scenario tests drive the submitter with a manually pumped executor and
//! clock, a scripted resolver, a recording tracker, and a transport client
//! that holds replies until the test fires them. Nothing here spawns a
//! thread, so every interleaving in a test is explicit.

use crate::error::{ResolveError, TaskError, TaskErrorKind};
use crate::executor::{Clock, Executor, WorkItem};
use crate::resolver::{DependencyResolver, ResolveCallback};
use crate::rpc::{
    ActorClient, CancelReplyCallback, CancelTaskReply, CancelTaskRequest, KillActorRequest,
    PushReplyCallback, PushTaskReply, PushTaskRequest, TransportError, WorkerClientPool,
};
use crate::tracker::TaskTracker;
use flux_types::{NodeId, TaskId, TaskSpec, WorkerAddress, WorkerId};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

/// Manually advanced wall clock.
#[derive(Debug)]
pub struct ManualClock {
    now_ms: Mutex<i64>,
}

impl ManualClock {
    pub fn new(start_ms: i64) -> Arc<Self> {
        Arc::new(Self {
            now_ms: Mutex::new(start_ms),
        })
    }

    pub fn advance(&self, delta_ms: i64) {
        *self.now_ms.lock().unwrap() += delta_ms;
    }
}

impl Clock for ManualClock {
    fn current_time_ms(&self) -> i64 {
        *self.now_ms.lock().unwrap()
    }
}

/// Single-threaded executor pumped explicitly by the test.
///
/// Posted work queues up until [`ManualExecutor::run_until_idle`];
/// delayed work fires when [`ManualExecutor::advance`] moves the paired
/// clock past its deadline.
pub struct ManualExecutor {
    clock: Arc<ManualClock>,
    ready: Mutex<VecDeque<WorkItem>>,
    timers: Mutex<Vec<(i64, WorkItem)>>,
}

impl ManualExecutor {
    pub fn new(clock: Arc<ManualClock>) -> Arc<Self> {
        Arc::new(Self {
            clock,
            ready: Mutex::new(VecDeque::new()),
            timers: Mutex::new(Vec::new()),
        })
    }

    /// Run queued work until nothing is ready. Returns how many items ran.
    pub fn run_until_idle(&self) -> usize {
        let mut ran = 0;
        loop {
            let Some(work) = self.ready.lock().unwrap().pop_front() else {
                break;
            };
            work();
            ran += 1;
        }
        ran
    }

    /// Advance the clock, release timers that came due, and run everything.
    pub fn advance(&self, delta_ms: i64) -> usize {
        self.clock.advance(delta_ms);
        let now_ms = self.clock.current_time_ms();
        {
            let mut timers = self.timers.lock().unwrap();
            let mut still_pending = Vec::new();
            for (deadline_ms, work) in timers.drain(..) {
                if deadline_ms <= now_ms {
                    self.ready.lock().unwrap().push_back(work);
                } else {
                    still_pending.push((deadline_ms, work));
                }
            }
            *timers = still_pending;
        }
        self.run_until_idle()
    }

    /// Number of delayed items not yet due.
    pub fn pending_timers(&self) -> usize {
        self.timers.lock().unwrap().len()
    }
}

impl Executor for ManualExecutor {
    fn post(&self, work: WorkItem, _tag: &'static str) {
        self.ready.lock().unwrap().push_back(work);
    }

    fn execute_after(&self, delay: std::time::Duration, work: WorkItem) {
        let deadline_ms = self.clock.current_time_ms() + delay.as_millis() as i64;
        self.timers.lock().unwrap().push((deadline_ms, work));
    }
}

/// Resolver that parks every request until the test releases it.
#[derive(Default)]
pub struct ScriptedResolver {
    pending: Mutex<HashMap<TaskId, ResolveCallback>>,
    canceled: Mutex<Vec<TaskId>>,
}

impl ScriptedResolver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Complete resolution for `task_id` successfully. Returns false if no
    /// resolution was pending.
    pub fn resolve(&self, task_id: TaskId) -> bool {
        let callback = self.pending.lock().unwrap().remove(&task_id);
        match callback {
            Some(callback) => {
                callback(Ok(()));
                true
            }
            None => false,
        }
    }

    /// Fail resolution for `task_id`.
    pub fn fail(&self, task_id: TaskId, message: &str) -> bool {
        let callback = self.pending.lock().unwrap().remove(&task_id);
        match callback {
            Some(callback) => {
                callback(Err(ResolveError(message.to_string())));
                true
            }
            None => false,
        }
    }

    pub fn has_pending(&self, task_id: TaskId) -> bool {
        self.pending.lock().unwrap().contains_key(&task_id)
    }

    /// Steal the pending callback, simulating a resolution that was
    /// already in flight when something raced it.
    pub fn take_pending(&self, task_id: TaskId) -> Option<ResolveCallback> {
        self.pending.lock().unwrap().remove(&task_id)
    }

    pub fn canceled_ids(&self) -> Vec<TaskId> {
        self.canceled.lock().unwrap().clone()
    }
}

impl DependencyResolver for ScriptedResolver {
    fn resolve_dependencies(&self, spec: &TaskSpec, on_resolved: ResolveCallback) {
        self.pending
            .lock()
            .unwrap()
            .insert(spec.task_id(), on_resolved);
    }

    fn cancel_resolution(&self, task_id: TaskId) {
        self.pending.lock().unwrap().remove(&task_id);
        self.canceled.lock().unwrap().push(task_id);
    }
}

/// One observable tracker call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackerEvent {
    DependenciesResolved(TaskId),
    Canceled(TaskId),
    WaitingForExecution(TaskId, NodeId, WorkerId),
    Completed {
        task_id: TaskId,
        is_application_error: bool,
    },
    FailedOrRetried {
        task_id: TaskId,
        kind: TaskErrorKind,
        mark_task_object_failed: bool,
        fail_immediately: bool,
        retried: bool,
    },
    Failed {
        task_id: TaskId,
        kind: TaskErrorKind,
    },
}

/// Tracker that records every call and answers retry decisions from a
/// script.
#[derive(Default)]
pub struct RecordingTracker {
    events: Mutex<Vec<TrackerEvent>>,
    /// Specs of tasks the tracker still considers unfinished.
    specs: Mutex<HashMap<TaskId, TaskSpec>>,
    /// Tasks granted exactly one retry each.
    retry_grants: Mutex<HashSet<TaskId>>,
}

impl RecordingTracker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make the tracker aware of an unfinished task, so cancel retries
    /// keep going and `mark_task_canceled` reports a fresh transition.
    pub fn register_spec(&self, spec: &TaskSpec) {
        self.specs
            .lock()
            .unwrap()
            .insert(spec.task_id(), spec.clone());
    }

    /// Forget the task, as the tracker does once it finishes.
    pub fn mark_finished(&self, task_id: TaskId) {
        self.specs.lock().unwrap().remove(&task_id);
    }

    /// Allow the next `fail_or_retry_pending_task` for this task to
    /// schedule a retry.
    pub fn grant_retry(&self, task_id: TaskId) {
        self.retry_grants.lock().unwrap().insert(task_id);
    }

    pub fn events(&self) -> Vec<TrackerEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Terminal events (completions plus failures, retries excluded) for
    /// one task.
    pub fn terminal_events(&self, task_id: TaskId) -> Vec<TrackerEvent> {
        self.events()
            .into_iter()
            .filter(|event| match event {
                TrackerEvent::Completed { task_id: id, .. } => *id == task_id,
                TrackerEvent::Failed { task_id: id, .. } => *id == task_id,
                TrackerEvent::FailedOrRetried {
                    task_id: id,
                    mark_task_object_failed,
                    retried,
                    ..
                } => *id == task_id && !retried && *mark_task_object_failed,
                _ => false,
            })
            .collect()
    }

    pub fn was_canceled(&self, task_id: TaskId) -> bool {
        self.events()
            .iter()
            .any(|event| matches!(event, TrackerEvent::Canceled(id) if *id == task_id))
    }

    fn record(&self, event: TrackerEvent) {
        self.events.lock().unwrap().push(event);
    }
}

impl TaskTracker for RecordingTracker {
    fn mark_dependencies_resolved(&self, task_id: TaskId) {
        self.record(TrackerEvent::DependenciesResolved(task_id));
    }

    fn mark_task_canceled(&self, task_id: TaskId) -> bool {
        self.record(TrackerEvent::Canceled(task_id));
        self.specs.lock().unwrap().contains_key(&task_id)
    }

    fn mark_task_waiting_for_execution(
        &self,
        task_id: TaskId,
        node_id: NodeId,
        worker_id: WorkerId,
    ) {
        self.record(TrackerEvent::WaitingForExecution(task_id, node_id, worker_id));
    }

    fn complete_pending_task(
        &self,
        task_id: TaskId,
        _reply: &PushTaskReply,
        _addr: &WorkerAddress,
        is_application_error: bool,
    ) {
        self.specs.lock().unwrap().remove(&task_id);
        self.record(TrackerEvent::Completed {
            task_id,
            is_application_error,
        });
    }

    fn fail_or_retry_pending_task(
        &self,
        task_id: TaskId,
        error: &TaskError,
        mark_task_object_failed: bool,
        fail_immediately: bool,
    ) -> bool {
        let retried = !fail_immediately && self.retry_grants.lock().unwrap().remove(&task_id);
        if !retried && mark_task_object_failed {
            // Terminal: the tracker forgets the task.
            self.specs.lock().unwrap().remove(&task_id);
        }
        self.record(TrackerEvent::FailedOrRetried {
            task_id,
            kind: error.kind,
            mark_task_object_failed,
            fail_immediately,
            retried,
        });
        retried
    }

    fn fail_pending_task(&self, task_id: TaskId, error: &TaskError) {
        self.specs.lock().unwrap().remove(&task_id);
        self.record(TrackerEvent::Failed {
            task_id,
            kind: error.kind,
        });
    }

    fn task_spec(&self, task_id: TaskId) -> Option<TaskSpec> {
        self.specs.lock().unwrap().get(&task_id).cloned()
    }
}

/// One push observed by the scripted client.
#[derive(Debug, Clone)]
pub struct RecordedPush {
    pub task_id: TaskId,
    pub actor_counter: u64,
    pub sequence_number: u64,
    pub skip_queue: bool,
    pub skip_execution: bool,
}

/// Transport client that records requests and holds replies until the
/// test fires them.
pub struct ScriptedClient {
    addr: WorkerAddress,
    pushes: Mutex<Vec<RecordedPush>>,
    push_replies: Mutex<HashMap<TaskId, PushReplyCallback>>,
    kills: Mutex<Vec<KillActorRequest>>,
    cancels: Mutex<Vec<CancelTaskRequest>>,
    cancel_replies: Mutex<VecDeque<(TaskId, CancelReplyCallback)>>,
}

impl ScriptedClient {
    pub fn new(addr: WorkerAddress) -> Arc<Self> {
        Arc::new(Self {
            addr,
            pushes: Mutex::new(Vec::new()),
            push_replies: Mutex::new(HashMap::new()),
            kills: Mutex::new(Vec::new()),
            cancels: Mutex::new(Vec::new()),
            cancel_replies: Mutex::new(VecDeque::new()),
        })
    }

    pub fn pushes(&self) -> Vec<RecordedPush> {
        self.pushes.lock().unwrap().clone()
    }

    pub fn kills(&self) -> Vec<KillActorRequest> {
        self.kills.lock().unwrap().clone()
    }

    pub fn cancels(&self) -> Vec<CancelTaskRequest> {
        self.cancels.lock().unwrap().clone()
    }

    /// Replies not yet delivered.
    pub fn outstanding_replies(&self) -> usize {
        self.push_replies.lock().unwrap().len()
    }

    /// Deliver a successful reply for `task_id`. Returns false when no
    /// reply is outstanding for it.
    pub fn reply_ok(&self, task_id: TaskId) -> bool {
        self.reply(task_id, Ok(PushTaskReply::default()))
    }

    /// Deliver a transport failure for `task_id`.
    pub fn reply_error(&self, task_id: TaskId, error: TransportError) -> bool {
        self.reply(task_id, Err(error))
    }

    fn reply(&self, task_id: TaskId, result: Result<PushTaskReply, TransportError>) -> bool {
        let callback = self.push_replies.lock().unwrap().remove(&task_id);
        match callback {
            Some(callback) => {
                callback(result);
                true
            }
            None => false,
        }
    }

    /// Answer the oldest outstanding cancel RPC.
    pub fn reply_cancel(&self, attempt_succeeded: bool) -> Option<TaskId> {
        let front = self.cancel_replies.lock().unwrap().pop_front();
        let (task_id, callback) = front?;
        callback(Ok(CancelTaskReply { attempt_succeeded }));
        Some(task_id)
    }
}

impl ActorClient for ScriptedClient {
    fn addr(&self) -> WorkerAddress {
        self.addr.clone()
    }

    fn push_actor_task(
        &self,
        request: PushTaskRequest,
        skip_queue: bool,
        on_reply: PushReplyCallback,
    ) {
        let task_id = request.spec.task_id();
        self.pushes.lock().unwrap().push(RecordedPush {
            task_id,
            actor_counter: request.spec.actor_counter(),
            sequence_number: request.sequence_number,
            skip_queue,
            skip_execution: request.spec.skip_execution(),
        });
        self.push_replies.lock().unwrap().insert(task_id, on_reply);
    }

    fn kill_actor(&self, request: KillActorRequest) {
        self.kills.lock().unwrap().push(request);
    }

    fn cancel_task(&self, request: CancelTaskRequest, on_reply: CancelReplyCallback) {
        let task_id = request.intended_task_id;
        self.cancels.lock().unwrap().push(request);
        self.cancel_replies
            .lock()
            .unwrap()
            .push_back((task_id, on_reply));
    }
}

/// Pool handing out one [`ScriptedClient`] per endpoint.
#[derive(Default)]
pub struct ScriptedClientPool {
    clients: Mutex<HashMap<String, Arc<ScriptedClient>>>,
    disconnected: Mutex<Vec<WorkerId>>,
}

impl ScriptedClientPool {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The client opened against `addr`, if any connection was made.
    pub fn client_at(&self, addr: &WorkerAddress) -> Option<Arc<ScriptedClient>> {
        self.clients.lock().unwrap().get(&addr.to_string()).cloned()
    }

    pub fn disconnected_workers(&self) -> Vec<WorkerId> {
        self.disconnected.lock().unwrap().clone()
    }
}

impl WorkerClientPool for ScriptedClientPool {
    fn get_or_connect(&self, addr: &WorkerAddress) -> Arc<dyn ActorClient> {
        let mut clients = self.clients.lock().unwrap();
        let client = clients
            .entry(addr.to_string())
            .or_insert_with(|| ScriptedClient::new(addr.clone()));
        client.clone()
    }

    fn disconnect(&self, worker_id: WorkerId) {
        self.disconnected.lock().unwrap().push(worker_id);
    }
}
