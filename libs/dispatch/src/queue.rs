//! Per-actor client queue state.

use crate::error::DeathCause;
use crate::rpc::{ActorClient, KillActorRequest, PushReplyCallback, TransportError};
use crate::submit_queue::{create_submit_queue, SubmitQueue};
use flux_types::{TaskId, TaskSpec, WorkerId};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;

/// Lifecycle of an actor as observed by this caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorState {
    /// Registered; no address published yet.
    Pending,
    /// Connected to a live incarnation.
    Alive,
    /// The incarnation failed; the cluster may publish a replacement.
    Restarting,
    /// Permanently gone. Absorbing.
    Dead,
}

impl fmt::Display for ActorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ActorState::Pending => "PENDING",
            ActorState::Alive => "ALIVE",
            ActorState::Restarting => "RESTARTING",
            ActorState::Dead => "DEAD",
        };
        f.write_str(s)
    }
}

/// A task parked after a transport failure, waiting for an authoritative
/// cause of death before it is failed.
pub(crate) struct DeathWatchEntry {
    /// Absolute wall-clock deadline in milliseconds.
    pub deadline_ms: i64,
    pub spec: TaskSpec,
    /// The transport error that put the task here.
    pub last_error: TransportError,
}

/// Everything this caller knows about one actor.
///
/// Owned by the registry map and only ever touched under the registry
/// lock. The reply callbacks stored in `inflight_replies` are taken out of
/// the map before they are invoked, so no callback ever runs under the
/// lock.
pub(crate) struct ActorQueue {
    pub state: ActorState,
    /// Restart count of the incarnation this queue is tracking. Directory
    /// notifications about older incarnations are dropped.
    pub num_restarts: u64,
    pub death_cause: Option<DeathCause>,
    /// The hosting node was preempted; propagated into synthesized death
    /// causes when the grace window expires.
    pub preempted: bool,
    /// Open transport client. Present exactly while the actor is ALIVE.
    pub client: Option<Arc<dyn ActorClient>>,
    /// Worker incarnation the client points at; cleared on disconnect.
    pub worker_id: Option<WorkerId>,
    pub submit_queue: Box<dyn SubmitQueue>,
    /// Reply continuations for tasks handed to the transport.
    pub inflight_replies: HashMap<TaskId, PushReplyCallback>,
    /// At most one staged kill request, flushed by the next dispatch.
    pub pending_force_kill: Option<KillActorRequest>,
    /// Tasks awaiting an authoritative cause of death, in park order.
    pub wait_for_death_info: VecDeque<DeathWatchEntry>,
    /// Tasks submitted and not yet handed back to the tracker.
    pub cur_pending_calls: usize,
    /// Admission limit; zero means unlimited.
    pub max_pending_calls: usize,
    pub fail_if_actor_unreachable: bool,
}

impl ActorQueue {
    pub fn new(
        max_pending_calls: usize,
        execute_out_of_order: bool,
        fail_if_actor_unreachable: bool,
    ) -> Self {
        Self {
            state: ActorState::Pending,
            num_restarts: 0,
            death_cause: None,
            preempted: false,
            client: None,
            worker_id: None,
            submit_queue: create_submit_queue(execute_out_of_order),
            inflight_replies: HashMap::new(),
            pending_force_kill: None,
            wait_for_death_info: VecDeque::new(),
            cur_pending_calls: 0,
            max_pending_calls,
            fail_if_actor_unreachable,
        }
    }

    pub fn debug_string(&self) -> String {
        format!(
            "state={} num_restarts={} queued={} inflight={} parked={} pending_calls={} \
             pending_kill={} connected={}",
            self.state,
            self.num_restarts,
            self.submit_queue.num_queued(),
            self.inflight_replies.len(),
            self.wait_for_death_info.len(),
            self.cur_pending_calls,
            self.pending_force_kill.is_some(),
            self.client.is_some(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_queue_is_pending_and_empty() {
        let queue = ActorQueue::new(8, false, false);
        assert_eq!(queue.state, ActorState::Pending);
        assert!(queue.client.is_none());
        assert!(queue.worker_id.is_none());
        assert_eq!(queue.cur_pending_calls, 0);
        assert_eq!(queue.num_restarts, 0);
    }

    #[test]
    fn test_debug_string_mentions_state() {
        let queue = ActorQueue::new(0, false, true);
        let s = queue.debug_string();
        assert!(s.contains("state=PENDING"));
        assert!(s.contains("connected=false"));
    }
}
