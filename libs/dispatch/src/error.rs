//! Failure classification for actor tasks.
//!
//! A task that does not complete normally is reported to the task tracker
//! with a [`TaskError`]: a coarse [`TaskErrorKind`] for routing, a message
//! for humans, and, when the actor's fate is known, the structured
//! [`DeathCause`] that explains it.

use flux_types::ActorId;
use thiserror::Error;

/// Coarse classification of a task failure, used by the task tracker to
/// pick retry and reporting policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskErrorKind {
    /// The dependency resolver reported failure for one of the task's
    /// input references.
    DependencyResolutionFailed,
    /// The task was canceled by the user before or during execution.
    TaskCancelled,
    /// The actor is confirmed or assumed dead.
    ActorDied,
    /// The actor is temporarily unreachable (restart in progress).
    ActorUnavailable,
    /// The actor was torn down by the cluster's out-of-memory handling.
    OutOfMemory,
}

/// Authoritative reason an actor died, as published by the cluster
/// directory alongside the dead-disconnect notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeathCause {
    /// The actor process exited or was killed.
    ActorDied {
        /// The hosting node was preempted (for example a reclaimed spot
        /// instance) rather than failing on its own.
        preempted: bool,
    },
    /// The actor was selected by the out-of-memory killer.
    OutOfMemory {
        /// When set, tasks failed by this cause must not be retried.
        fail_immediately: bool,
    },
    /// The actor never finished construction.
    CreationFailed { reason: String },
}

impl DeathCause {
    pub fn preempted(&self) -> bool {
        matches!(self, DeathCause::ActorDied { preempted: true })
    }
}

/// Structured error handed to the task tracker when a task fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskError {
    pub kind: TaskErrorKind,
    pub message: String,
    pub cause: Option<DeathCause>,
}

impl TaskError {
    pub fn new(kind: TaskErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            cause: None,
        }
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(TaskErrorKind::TaskCancelled, message)
    }

    /// Build the error for a task that failed while the actor's fate is
    /// described by `cause` (or still unknown).
    ///
    /// With no recorded cause the kind falls back to `ActorDied`, or to
    /// `ActorUnavailable` when the caller knows a restart is in progress.
    pub fn from_death_cause(
        cause: Option<&DeathCause>,
        actor_id: ActorId,
        restarting: bool,
    ) -> Self {
        match cause {
            Some(cause @ DeathCause::OutOfMemory { .. }) => Self {
                kind: TaskErrorKind::OutOfMemory,
                message: format!("actor {actor_id} was killed by the out-of-memory handler"),
                cause: Some(cause.clone()),
            },
            Some(cause @ DeathCause::CreationFailed { reason }) => Self {
                kind: TaskErrorKind::ActorDied,
                message: format!("actor {actor_id} failed to start: {reason}"),
                cause: Some(cause.clone()),
            },
            Some(cause @ DeathCause::ActorDied { .. }) => Self {
                kind: TaskErrorKind::ActorDied,
                message: format!("actor {actor_id} died"),
                cause: Some(cause.clone()),
            },
            None if restarting => Self {
                kind: TaskErrorKind::ActorUnavailable,
                message: format!("actor {actor_id} is temporarily unavailable"),
                cause: None,
            },
            None => Self {
                kind: TaskErrorKind::ActorDied,
                message: format!("actor {actor_id} died"),
                cause: None,
            },
        }
    }

    /// Append low-level transport detail to the message.
    pub fn with_detail(mut self, detail: impl AsRef<str>) -> Self {
        self.message = format!("{}: {}", self.message, detail.as_ref());
        self
    }

    /// Whether this failure must bypass the tracker's retry budget.
    pub fn fail_immediately(&self) -> bool {
        matches!(
            self.cause,
            Some(DeathCause::OutOfMemory {
                fail_immediately: true
            })
        )
    }
}

/// Failure reported by the dependency resolver.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("dependency resolution failed: {0}")]
pub struct ResolveError(pub String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_oom_cause_maps_to_oom_kind() {
        let error = TaskError::from_death_cause(
            Some(&DeathCause::OutOfMemory {
                fail_immediately: true,
            }),
            ActorId::new(),
            false,
        );
        assert_eq!(error.kind, TaskErrorKind::OutOfMemory);
        assert!(error.fail_immediately());
    }

    #[test]
    fn test_oom_without_flag_is_retryable() {
        let error = TaskError::from_death_cause(
            Some(&DeathCause::OutOfMemory {
                fail_immediately: false,
            }),
            ActorId::new(),
            false,
        );
        assert!(!error.fail_immediately());
    }

    #[test]
    fn test_unknown_cause_while_restarting_is_unavailable() {
        let error = TaskError::from_death_cause(None, ActorId::new(), true);
        assert_eq!(error.kind, TaskErrorKind::ActorUnavailable);
        assert!(error.cause.is_none());
    }

    #[test]
    fn test_unknown_cause_defaults_to_actor_died() {
        let error = TaskError::from_death_cause(None, ActorId::new(), false);
        assert_eq!(error.kind, TaskErrorKind::ActorDied);
    }

    #[test]
    fn test_detail_is_appended() {
        let error = TaskError::cancelled("task canceled").with_detail("io error: peer reset");
        assert!(error.message.contains("peer reset"));
    }

    #[test]
    fn test_preempted_flag() {
        assert!(DeathCause::ActorDied { preempted: true }.preempted());
        assert!(!DeathCause::OutOfMemory {
            fail_immediately: false
        }
        .preempted());
    }
}
