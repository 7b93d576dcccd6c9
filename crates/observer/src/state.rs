use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant, SystemTime};

use common::{Address, NodeStatus, Packet, Payload, RouteEntry, TopologySnapshot};
use tracing::{debug, info, warn};

use crate::config::ObserverConfig;
use crate::topology::TopologyManager;
use crate::traffic::{SeqArrival, TrafficMonitor};

/// Shared observer state. Every operation holds the one lock for its whole
/// duration, so they are linearizable with respect to each other.
pub struct Observer {
    inner: Mutex<ObserverState>,
}

struct ObserverState {
    topology: TopologyManager,
    traffic: TrafficMonitor,
    snapshot_seq: u64,
}

impl Observer {
    pub fn new(timeout: Duration, rate_window_secs: u32) -> Self {
        Observer {
            inner: Mutex::new(ObserverState {
                topology: TopologyManager::new(timeout),
                traffic: TrafficMonitor::new(rate_window_secs),
                snapshot_seq: 0,
            }),
        }
    }

    pub fn from_config(config: &ObserverConfig) -> Self {
        Self::new(config.timeout(), config.rate_window_secs)
    }

    // Every mutation is a replacement, so state behind a poisoned lock is
    // still consistent.
    fn lock(&self) -> MutexGuard<'_, ObserverState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Applies a decoded frame. Returns `false` if it was discarded because
    /// its source address is `0`.
    pub fn record(&self, packet: &Packet, now: Instant) -> bool {
        let src = packet.header.src;
        if src == 0 {
            warn!(
                via = packet.via,
                "discarding {} frame from address 0",
                packet.packet_type()
            );
            return false;
        }

        let mut state = self.lock();
        match &packet.payload {
            Payload::Data(_) => state.topology.on_data(src, now),
            Payload::RouteTable(entries) => {
                let valid: Vec<RouteEntry> =
                    entries.iter().filter(|e| e.address != 0).copied().collect();
                if valid.len() != entries.len() {
                    debug!(
                        src,
                        dropped = entries.len() - valid.len(),
                        "stripped route entries for address 0"
                    );
                }
                state.topology.on_route_table(src, valid, now);
            }
        }
        let arrival = state.traffic.record(packet, now);
        drop(state);

        match arrival {
            SeqArrival::InOrder => {}
            SeqArrival::Gap { missed } => debug!(src, missed, "test data sequence gap"),
            SeqArrival::Reordered => debug!(src, "test data out of order"),
            SeqArrival::Repeated => debug!(src, "duplicate test data"),
        }
        true
    }

    pub fn classify(&self, addr: Address, now: Instant) -> Option<(NodeStatus, bool)> {
        self.lock().topology.classify(addr, now)
    }

    /// Evicts every address that no longer has a reason to exist and drops
    /// its traffic counters with it.
    pub fn sweep(&self, now: Instant) -> Vec<Address> {
        let mut state = self.lock();
        let evicted = state.topology.sweep(now);
        for addr in &evicted {
            state.traffic.forget(*addr);
        }
        drop(state);

        if !evicted.is_empty() {
            info!(count = evicted.len(), addresses = ?evicted, "evicted nodes");
        }
        evicted
    }

    pub fn snapshot(&self, now: Instant) -> TopologySnapshot {
        let mut state = self.lock();
        let (mut nodes, edges) = state.topology.snapshot(now);
        for (addr, node) in nodes.iter_mut() {
            node.traffic = state.traffic.stats(*addr, now);
        }
        state.snapshot_seq += 1;

        TopologySnapshot {
            snapshot_seq: state.snapshot_seq,
            snapshot_timestamp_epoch_us: SystemTime::now()
                .duration_since(SystemTime::UNIX_EPOCH)
                .map(|d| d.as_micros() as u64)
                .unwrap_or(0),
            nodes,
            edges,
        }
    }

    /// One periodic round: sweep, then snapshot what is left.
    pub fn tick(&self, now: Instant) -> TopologySnapshot {
        self.sweep(now);
        self.snapshot(now)
    }

    pub fn len(&self) -> usize {
        self.lock().topology.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
