//! Worker addressing.

use crate::ids::{NodeId, WorkerId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};

/// Network location of a worker process hosting an actor incarnation.
///
/// Two addresses refer to the same endpoint when their `ip` and `port`
/// match; the worker and node identifiers describe which incarnation is
/// expected to be listening there.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerAddress {
    pub ip: IpAddr,
    pub port: u16,
    pub worker_id: WorkerId,
    pub node_id: NodeId,
}

impl WorkerAddress {
    pub fn new(ip: IpAddr, port: u16, worker_id: WorkerId, node_id: NodeId) -> Self {
        Self {
            ip,
            port,
            worker_id,
            node_id,
        }
    }

    /// Whether `other` points at the same network endpoint.
    ///
    /// Only the ip and port participate; a restarted worker on the same
    /// endpoint compares equal even though its worker id changed.
    pub fn same_endpoint(&self, other: &WorkerAddress) -> bool {
        self.ip == other.ip && self.port == other.port
    }
}

impl Default for WorkerAddress {
    /// The unspecified endpoint, used where a reply was synthesized locally
    /// and never touched a connection.
    fn default() -> Self {
        Self {
            ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 0,
            worker_id: WorkerId::nil(),
            node_id: NodeId::nil(),
        }
    }
}

impl fmt::Display for WorkerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}
