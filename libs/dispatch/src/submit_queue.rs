//! Per-actor submit queues.
//!
//! Tasks are parked here between submission and transport hand-off, keyed
//! by their caller-assigned `actor_counter`. Two variants exist:
//!
//! - [`OrderedSubmitQueue`] delivers tasks in strict counter order and
//!   remembers which tasks completed ahead of an unfinished predecessor,
//!   so a reconnect can replay them as skip-execution acknowledgements.
//! - [`UnorderedSubmitQueue`] delivers tasks as soon as their dependencies
//!   resolve, for actors registered with out-of-order execution.
//!
//! Both are driven entirely under the dispatcher's lock and therefore do
//! no locking of their own.

use flux_types::{TaskId, TaskSpec};
use std::collections::BTreeMap;

/// Operations the dispatcher performs on a per-actor submit queue.
pub trait SubmitQueue: Send {
    /// Insert a task at `position`. Returns false if the position is
    /// already occupied.
    fn emplace(&mut self, position: u64, spec: TaskSpec) -> bool;

    /// Whether a live (not canceled) task is still queued at `position`.
    fn contains(&self, position: u64) -> bool;

    /// Whether the task at `position` has its dependencies resolved.
    fn dependency_resolved(&self, position: u64) -> bool;

    /// Task id of the entry at `position`, if present.
    fn task_id(&self, position: u64) -> Option<TaskId>;

    /// Mark the task at `position` ready to send.
    fn mark_dependency_resolved(&mut self, position: u64);

    /// Drop the task at `position` after its dependencies failed to
    /// resolve.
    fn mark_dependency_failed(&mut self, position: u64);

    /// Mark the task at `position` canceled; it will be discarded instead
    /// of sent.
    fn mark_canceled(&mut self, position: u64);

    /// Next task ready for the transport, with the `skip_queue` hint that
    /// tells the transport to bypass its sequence gate.
    fn pop_next_task_to_send(&mut self) -> Option<(TaskSpec, bool)>;

    /// Drain the set of tasks that completed on a previous incarnation
    /// ahead of an unfinished predecessor, in counter order.
    fn pop_out_of_order_completed(&mut self) -> Vec<TaskSpec>;

    /// A fresh client is connected; reset send bookkeeping accordingly.
    fn on_client_connected(&mut self);

    /// Transport-level sequence number for `spec`.
    fn sequence_number(&self, spec: &TaskSpec) -> u64;

    /// Record that the task at `position` finished (completed or failed
    /// without retry), advancing reply bookkeeping.
    fn mark_task_completed(&mut self, position: u64, spec: TaskSpec);

    /// Drop every queued task, returning the ids to fail. Entries already
    /// canceled (and therefore already failed) are not returned.
    fn clear_all(&mut self) -> Vec<TaskId>;

    /// Number of queued, not-yet-sent tasks.
    fn num_queued(&self) -> usize;
}

/// Select the queue variant for an actor registration.
pub fn create_submit_queue(execute_out_of_order: bool) -> Box<dyn SubmitQueue> {
    if execute_out_of_order {
        Box::new(UnorderedSubmitQueue::new())
    } else {
        Box::new(OrderedSubmitQueue::new())
    }
}

#[derive(Debug)]
struct QueuedTask {
    spec: TaskSpec,
    dependency_resolved: bool,
    canceled: bool,
}

impl QueuedTask {
    fn new(spec: TaskSpec) -> Self {
        Self {
            spec,
            dependency_resolved: false,
            canceled: false,
        }
    }
}

/// Strict caller-order queue.
///
/// `next_send_position` is the lowest counter that has never been sent on
/// the current incarnation; `next_reply_position` is the lowest counter
/// that has not finished. Tasks re-queued below `next_send_position` are
/// retries and carry the `skip_queue` hint so the transport does not hold
/// them behind newer sequence numbers.
#[derive(Debug, Default)]
pub struct OrderedSubmitQueue {
    entries: BTreeMap<u64, QueuedTask>,
    next_send_position: u64,
    next_reply_position: u64,
    out_of_order_completed: BTreeMap<u64, TaskSpec>,
}

impl OrderedSubmitQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SubmitQueue for OrderedSubmitQueue {
    fn emplace(&mut self, position: u64, spec: TaskSpec) -> bool {
        if self.entries.contains_key(&position) {
            return false;
        }
        self.entries.insert(position, QueuedTask::new(spec));
        true
    }

    fn contains(&self, position: u64) -> bool {
        self.entries
            .get(&position)
            .map(|entry| !entry.canceled)
            .unwrap_or(false)
    }

    fn dependency_resolved(&self, position: u64) -> bool {
        self.entries
            .get(&position)
            .map(|entry| entry.dependency_resolved)
            .unwrap_or(false)
    }

    fn task_id(&self, position: u64) -> Option<TaskId> {
        self.entries.get(&position).map(|entry| entry.spec.task_id())
    }

    fn mark_dependency_resolved(&mut self, position: u64) {
        if let Some(entry) = self.entries.get_mut(&position) {
            entry.dependency_resolved = true;
        }
    }

    fn mark_dependency_failed(&mut self, position: u64) {
        self.entries.remove(&position);
    }

    fn mark_canceled(&mut self, position: u64) {
        if let Some(entry) = self.entries.get_mut(&position) {
            entry.canceled = true;
        }
    }

    fn pop_next_task_to_send(&mut self) -> Option<(TaskSpec, bool)> {
        loop {
            let (&position, entry) = self.entries.iter().next()?;
            if entry.canceled {
                // Already failed by the cancel path; discard silently.
                self.entries.remove(&position);
                continue;
            }
            if !entry.dependency_resolved {
                return None;
            }
            let entry = self
                .entries
                .remove(&position)
                .expect("head entry disappeared");
            let skip_queue = position < self.next_send_position;
            if !skip_queue {
                self.next_send_position = position + 1;
            }
            return Some((entry.spec, skip_queue));
        }
    }

    fn pop_out_of_order_completed(&mut self) -> Vec<TaskSpec> {
        std::mem::take(&mut self.out_of_order_completed)
            .into_values()
            .collect()
    }

    fn on_client_connected(&mut self) {
        // Retried tasks re-queued at old positions must go out as fresh
        // sequence numbers on the new incarnation.
        self.next_send_position = self.next_reply_position;
    }

    fn sequence_number(&self, spec: &TaskSpec) -> u64 {
        spec.actor_counter()
    }

    fn mark_task_completed(&mut self, position: u64, spec: TaskSpec) {
        if position < self.next_reply_position {
            return;
        }
        self.out_of_order_completed.insert(position, spec);
        while let Some(entry) = self.out_of_order_completed.first_entry() {
            if *entry.key() != self.next_reply_position {
                break;
            }
            entry.remove();
            self.next_reply_position += 1;
        }
    }

    fn clear_all(&mut self) -> Vec<TaskId> {
        std::mem::take(&mut self.entries)
            .into_values()
            .filter(|entry| !entry.canceled)
            .map(|entry| entry.spec.task_id())
            .collect()
    }

    fn num_queued(&self) -> usize {
        self.entries.len()
    }
}

/// Resolution-order queue for actors that execute out of order.
///
/// Ready tasks always carry `skip_queue = true`: the transport's sequence
/// gate only matters for ordered delivery. There is nothing to replay on
/// reconnect because the actor never waits on a counter gap.
#[derive(Debug, Default)]
pub struct UnorderedSubmitQueue {
    waiting: BTreeMap<u64, QueuedTask>,
    ready: BTreeMap<u64, QueuedTask>,
}

impl UnorderedSubmitQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, position: u64) -> Option<&QueuedTask> {
        self.waiting
            .get(&position)
            .or_else(|| self.ready.get(&position))
    }
}

impl SubmitQueue for UnorderedSubmitQueue {
    fn emplace(&mut self, position: u64, spec: TaskSpec) -> bool {
        if self.waiting.contains_key(&position) || self.ready.contains_key(&position) {
            return false;
        }
        self.waiting.insert(position, QueuedTask::new(spec));
        true
    }

    fn contains(&self, position: u64) -> bool {
        self.entry(position)
            .map(|entry| !entry.canceled)
            .unwrap_or(false)
    }

    fn dependency_resolved(&self, position: u64) -> bool {
        self.entry(position)
            .map(|entry| entry.dependency_resolved)
            .unwrap_or(false)
    }

    fn task_id(&self, position: u64) -> Option<TaskId> {
        self.entry(position).map(|entry| entry.spec.task_id())
    }

    fn mark_dependency_resolved(&mut self, position: u64) {
        if let Some(mut entry) = self.waiting.remove(&position) {
            entry.dependency_resolved = true;
            self.ready.insert(position, entry);
        }
    }

    fn mark_dependency_failed(&mut self, position: u64) {
        self.waiting.remove(&position);
        self.ready.remove(&position);
    }

    fn mark_canceled(&mut self, position: u64) {
        if let Some(entry) = self.waiting.get_mut(&position) {
            entry.canceled = true;
        } else if let Some(entry) = self.ready.get_mut(&position) {
            entry.canceled = true;
        }
    }

    fn pop_next_task_to_send(&mut self) -> Option<(TaskSpec, bool)> {
        loop {
            let (_, entry) = self.ready.pop_first()?;
            if entry.canceled {
                continue;
            }
            return Some((entry.spec, true));
        }
    }

    fn pop_out_of_order_completed(&mut self) -> Vec<TaskSpec> {
        Vec::new()
    }

    fn on_client_connected(&mut self) {}

    fn sequence_number(&self, spec: &TaskSpec) -> u64 {
        spec.actor_counter()
    }

    fn mark_task_completed(&mut self, _position: u64, _spec: TaskSpec) {}

    fn clear_all(&mut self) -> Vec<TaskId> {
        let waiting = std::mem::take(&mut self.waiting);
        let ready = std::mem::take(&mut self.ready);
        waiting
            .into_values()
            .chain(ready.into_values())
            .filter(|entry| !entry.canceled)
            .map(|entry| entry.spec.task_id())
            .collect()
    }

    fn num_queued(&self) -> usize {
        self.waiting.len() + self.ready.len()
    }
}
