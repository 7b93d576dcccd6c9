use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Display;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::Address;

/// Liveness classification of a known address.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeStatus {
    /// Reporting node heard from within the timeout.
    Active,
    /// Silent address that some other reporting node still routes to.
    Relay,
    /// Timed out, or never reported and no longer referenced.
    Stale,
}

impl Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeStatus::Active => write!(f, "active"),
            NodeStatus::Relay => write!(f, "relay"),
            NodeStatus::Stale => write!(f, "stale"),
        }
    }
}

/// Undirected link between two addresses. `a <= b` always holds.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Edge {
    pub a: Address,
    pub b: Address,
}

impl Edge {
    pub fn new(x: Address, y: Address) -> Self {
        if x <= y { Edge { a: x, b: y } } else { Edge { a: y, b: x } }
    }

    pub fn contains(&self, addr: Address) -> bool {
        self.a == addr || self.b == addr
    }
}

/// Graph snapshot handed to the presentation layer once per sweep.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TopologySnapshot {
    /// Monotonic sequence so consumers can detect dropped snapshots.
    pub snapshot_seq: u64,

    /// Absolute wall-clock timestamp (microseconds since UNIX epoch).
    pub snapshot_timestamp_epoch_us: u64,

    /// Every known address and its classification.
    pub nodes: BTreeMap<Address, NodeSnapshot>,

    /// Links inferred from the current route tables.
    pub edges: BTreeSet<Edge>,
}

impl TopologySnapshot {
    pub fn count(&self, status: NodeStatus) -> usize {
        self.nodes.values().filter(|n| n.status == status).count()
    }

    /// Addresses advertised with every bit of `role`, ascending.
    pub fn with_role(&self, role: u8) -> Vec<Address> {
        self.nodes
            .iter()
            .filter(|(_, n)| n.has_role(role))
            .map(|(addr, _)| *addr)
            .collect()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct NodeSnapshot {
    pub status: NodeStatus,

    /// Time since the address was last observed, in milliseconds.
    pub last_seen_age_ms: u64,

    /// Whether this address has ever sent a route table.
    pub reporting: bool,

    /// Entries in the latest route table (0 for non-reporting nodes).
    pub route_count: usize,

    /// Union of the `ROLE_*` bits other nodes advertise for this address.
    pub roles: u8,

    pub traffic: TrafficStats,
}

impl NodeSnapshot {
    pub fn has_role(&self, role: u8) -> bool {
        crate::role_bits_match(self.roles, role)
    }
}

/// Per-source packet counters, derived from frames the node sent itself.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct TrafficStats {
    /// Total frames received from this source
    pub packets: u64,

    /// Total declared frame bytes received from this source
    pub bytes: u64,

    /// Current rate over the sliding window
    pub packets_per_second: f64,

    /// Current bandwidth over the sliding window
    pub bytes_per_second: f64,

    /// Raw type byte of the most recent frame
    pub last_packet_type: Option<u8>,

    /// Declared size of the most recent frame
    pub last_packet_size: Option<u8>,

    /// Highest test-data sequence number seen
    pub last_seq: Option<u32>,

    /// Test-data sequence numbers skipped so far
    pub missing_sequences: u64,

    pub out_of_order: u64,

    pub duplicates: u64,
}

#[derive(Error, Debug)]
pub enum SnapshotCodecError {
    #[error("snapshot codec: {0}")]
    Postcard(#[from] postcard::Error),
}

pub fn encode_snapshot(snapshot: &TopologySnapshot) -> Result<Vec<u8>, SnapshotCodecError> {
    Ok(postcard::to_stdvec(snapshot)?)
}

pub fn decode_snapshot(bytes: &[u8]) -> Result<TopologySnapshot, SnapshotCodecError> {
    Ok(postcard::from_bytes(bytes)?)
}
