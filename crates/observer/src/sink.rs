use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use common::{NodeStatus, TopologySnapshot};
use tracing::{info, trace, warn};

use crate::state::Observer;

/// Receives every snapshot produced by the sweeper. Called outside the
/// observer lock.
pub trait SnapshotSink {
    fn publish(&mut self, snapshot: &TopologySnapshot) -> io::Result<()>;
}

/// Logs a one-line summary per snapshot, plus the full snapshot as JSON at
/// trace level.
#[derive(Default)]
pub struct LogSink {
    last_summary: Option<(usize, usize, usize, usize)>,
}

impl SnapshotSink for LogSink {
    fn publish(&mut self, snapshot: &TopologySnapshot) -> io::Result<()> {
        let summary = (
            snapshot.count(NodeStatus::Active),
            snapshot.count(NodeStatus::Relay),
            snapshot.count(NodeStatus::Stale),
            snapshot.edges.len(),
        );
        // only log topology changes at info
        if self.last_summary != Some(summary) {
            let (active, relay, stale, edges) = summary;
            info!(seq = snapshot.snapshot_seq, active, relay, stale, edges, "topology");
            self.last_summary = Some(summary);
        }
        if tracing::enabled!(tracing::Level::TRACE) {
            let json = serde_json::to_string(snapshot).map_err(io::Error::other)?;
            trace!(snapshot = %json, "snapshot");
        }
        Ok(())
    }
}

/// Largest UDP payload over IPv4.
pub const MAX_SNAPSHOT_DATAGRAM: usize = 65_507;

/// Ships postcard-encoded snapshots to an out-of-process presentation layer.
/// A snapshot that encodes past [`MAX_SNAPSHOT_DATAGRAM`] is rejected rather
/// than sent.
pub struct UdpSink {
    socket: UdpSocket,
    target: SocketAddr,
}

impl UdpSink {
    pub fn new(target: SocketAddr) -> io::Result<Self> {
        let bind: SocketAddr = if target.is_ipv4() {
            SocketAddr::from(([0, 0, 0, 0], 0))
        } else {
            SocketAddr::from(([0u16; 8], 0))
        };
        Ok(UdpSink {
            socket: UdpSocket::bind(bind)?,
            target,
        })
    }
}

impl SnapshotSink for UdpSink {
    fn publish(&mut self, snapshot: &TopologySnapshot) -> io::Result<()> {
        let bytes = common::encode_snapshot(snapshot).map_err(io::Error::other)?;
        if bytes.len() > MAX_SNAPSHOT_DATAGRAM {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "snapshot {} is {} bytes ({} nodes), over the {} byte datagram limit",
                    snapshot.snapshot_seq,
                    bytes.len(),
                    snapshot.nodes.len(),
                    MAX_SNAPSHOT_DATAGRAM
                ),
            ));
        }
        self.socket
            .send_to(&bytes, self.target)
            .map_err(|e| io::Error::new(e.kind(), format!("{} byte snapshot: {e}", bytes.len())))?;
        Ok(())
    }
}

/// Runs sweep + snapshot every `interval` and hands each snapshot to `sinks`
/// until `running` is cleared.
pub fn spawn_sweeper(
    observer: Arc<Observer>,
    interval: Duration,
    mut sinks: Vec<Box<dyn SnapshotSink + Send>>,
    running: Arc<AtomicBool>,
) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("sweeper".into())
        .spawn(move || {
            while running.load(Ordering::Relaxed) {
                thread::sleep(interval);
                let snapshot = observer.tick(Instant::now());
                for sink in sinks.iter_mut() {
                    if let Err(e) = sink.publish(&snapshot) {
                        warn!("snapshot publish failed: {e}");
                    }
                }
            }
        })
}
