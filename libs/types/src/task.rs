//! Task descriptor.

use crate::ids::{ActorId, TaskId};
use serde::{Deserialize, Serialize};

/// Description of a single method invocation directed at an actor.
///
/// The payload is the serialized invocation (method, arguments, return
/// metadata) and is opaque to the dispatch layer; everything dispatch needs
/// is in the header fields. `actor_counter` is assigned by the caller at
/// submission time and is strictly increasing per actor, which is what lets
/// the receiving actor execute in caller order even when dependency
/// resolution completes out of order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSpec {
    task_id: TaskId,
    actor_id: ActorId,
    actor_counter: u64,
    skip_execution: bool,
    name: String,
    payload: Vec<u8>,
}

impl TaskSpec {
    pub fn new(task_id: TaskId, actor_id: ActorId, actor_counter: u64) -> Self {
        Self {
            task_id,
            actor_id,
            actor_counter,
            skip_execution: false,
            name: String::new(),
            payload: Vec::new(),
        }
    }

    /// Attach a human-readable name used in log lines.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Attach the serialized invocation payload.
    pub fn with_payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = payload;
        self
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    pub fn actor_id(&self) -> ActorId {
        self.actor_id
    }

    pub fn actor_counter(&self) -> u64 {
        self.actor_counter
    }

    /// Whether the receiving actor should advance its sequence counter
    /// without executing the task again (replay after reconnect).
    pub fn skip_execution(&self) -> bool {
        self.skip_execution
    }

    pub fn set_skip_execution(&mut self, skip: bool) {
        self.skip_execution = skip;
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }
}
