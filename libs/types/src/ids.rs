//! Typed identifier wrappers for the Flux runtime.
//!
//! Zero-cost newtypes over [`uuid::Uuid`]. Each identifier kind gets its own
//! type so a `TaskId` can never be passed where an `ActorId` is expected;
//! the `Display` prefix makes log lines self-describing.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Define a typed identifier wrapper over a random UUID.
macro_rules! define_uuid_id {
    (
        $(#[$meta:meta])*
        $name:ident, $prefix:literal
    ) => {
        $(#[$meta])*
        #[derive(
            Debug,
            Clone,
            Copy,
            PartialEq,
            Eq,
            PartialOrd,
            Ord,
            Hash,
            Serialize,
            Deserialize,
        )]
        #[repr(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Create a new random identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// The nil identifier, used as an explicit "unset" sentinel.
            pub const fn nil() -> Self {
                Self(Uuid::nil())
            }

            /// Create from an existing UUID.
            pub const fn from_uuid(id: Uuid) -> Self {
                Self(id)
            }

            /// Extract the inner UUID.
            pub const fn uuid(&self) -> Uuid {
                self.0
            }

            /// Whether this is the nil sentinel.
            pub fn is_nil(&self) -> bool {
                self.0.is_nil()
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::nil()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "-{}"), self.0.simple())
            }
        }
    };
}

define_uuid_id!(
    /// Identity of a long-lived remote actor.
    ActorId,
    "actor"
);

define_uuid_id!(
    /// Identity of a single task (one method invocation on an actor).
    TaskId,
    "task"
);

define_uuid_id!(
    /// Identity of a worker process hosting an actor incarnation.
    WorkerId,
    "worker"
);

define_uuid_id!(
    /// Identity of a cluster node.
    NodeId,
    "node"
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_distinct() {
        let a = ActorId::new();
        let b = ActorId::new();
        assert_ne!(a, b);
        assert_ne!(a.uuid(), b.uuid());
    }

    #[test]
    fn test_display_prefixes() {
        assert!(ActorId::new().to_string().starts_with("actor-"));
        assert!(TaskId::new().to_string().starts_with("task-"));
        assert!(WorkerId::new().to_string().starts_with("worker-"));
        assert!(NodeId::new().to_string().starts_with("node-"));
    }

    #[test]
    fn test_nil_sentinel() {
        assert!(ActorId::nil().is_nil());
        assert!(!ActorId::new().is_nil());
        assert_eq!(WorkerId::default(), WorkerId::nil());
    }

    #[test]
    fn test_serde_round_trip() {
        let id = TaskId::new();
        let json = serde_json::to_string(&id).unwrap();
        let back: TaskId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
    }
}
