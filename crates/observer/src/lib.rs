//! Passive observer for a wireless mesh: decoded frames feed a topology
//! state manager that classifies nodes and infers links.

pub mod config;
pub mod ingest;
pub mod sink;
pub mod state;
pub mod topology;
pub mod traffic;

pub use config::{ConfigError, ObserverConfig};
pub use ingest::{IngestStats, handle_datagram, receive_loop};
pub use sink::{LogSink, SnapshotSink, UdpSink, spawn_sweeper};
pub use state::Observer;
pub use topology::{DEFAULT_TIMEOUT, NodeState, TopologyManager};
