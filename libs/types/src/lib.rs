//! # Flux Shared Types Library
//!
//! Common type definitions shared by the Flux runtime client libraries:
//! typed identifiers, worker addressing, and the task descriptor that
//! travels from the language frontend through dispatch to the transport.
//!
//! ## Design Philosophy
//!
//! - **Typed identifiers**: distinct wrapper types for actors, tasks,
//!   workers, and nodes prevent id confusion bugs at compile time
//! - **Opaque payloads**: the task descriptor carries its serialized
//!   arguments as bytes; nothing in this library interprets them
//! - **Serde throughout**: every type crosses process boundaries and is
//!   serializable without extra glue

pub mod address;
pub mod ids;
pub mod task;

pub use address::WorkerAddress;
pub use ids::{ActorId, NodeId, TaskId, WorkerId};
pub use task::TaskSpec;
