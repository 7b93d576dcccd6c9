use std::io::{self, ErrorKind};
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

use common::{PacketHeader, PacketType, Payload, ROLE_GATEWAY};
use tracing::{debug, info, warn};

use crate::state::Observer;

/// Datagram counters kept by the receive loop.
#[derive(Debug, Default)]
pub struct IngestStats {
    pub received: AtomicU64,
    pub decoded: AtomicU64,
    pub rejected: AtomicU64,
}

/// Decodes one datagram and applies it to `observer`.
///
/// Decode failures are logged and the datagram dropped; the observer is only
/// touched by fully decoded frames.
pub fn handle_datagram(
    observer: &Observer,
    buf: &[u8],
    peer: SocketAddr,
    now: Instant,
) -> Option<PacketType> {
    let packet = match common::decode(buf) {
        Ok(packet) => packet,
        Err(err) => {
            let header = PacketHeader::peek(buf);
            warn!(
                %peer,
                len = buf.len(),
                src = ?header.map(|h| h.src),
                packet_type = ?header.map(|h| h.packet_type),
                "discarding datagram: {err}"
            );
            return None;
        }
    };

    match &packet.payload {
        Payload::Data(data) => debug!(
            %peer,
            src = packet.header.src,
            via = packet.via,
            seq = data.seq,
            test_type = data.test_type,
            size = packet.header.size,
            "test data"
        ),
        Payload::RouteTable(entries) => debug!(
            %peer,
            src = packet.header.src,
            via = packet.via,
            entries = entries.len(),
            gateways = entries.iter().filter(|e| e.has_role(ROLE_GATEWAY)).count(),
            "route table"
        ),
    }

    observer
        .record(&packet, now)
        .then(|| packet.packet_type())
}

/// Reads datagrams until `running` is cleared. The socket should carry a read
/// timeout so the flag is polled while the mesh is quiet.
pub fn receive_loop(
    socket: &UdpSocket,
    observer: &Observer,
    running: &AtomicBool,
    buffer_size: usize,
    stats: &IngestStats,
) -> io::Result<()> {
    let mut buf = vec![0u8; buffer_size];
    info!(addr = ?socket.local_addr().ok(), "listening for mesh datagrams");

    while running.load(Ordering::Relaxed) {
        let (amt, peer) = match socket.recv_from(&mut buf) {
            Ok(received) => received,
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => continue,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };

        stats.received.fetch_add(1, Ordering::Relaxed);
        match handle_datagram(observer, &buf[..amt], peer, Instant::now()) {
            Some(_) => stats.decoded.fetch_add(1, Ordering::Relaxed),
            None => stats.rejected.fetch_add(1, Ordering::Relaxed),
        };
    }

    info!(
        received = stats.received.load(Ordering::Relaxed),
        decoded = stats.decoded.load(Ordering::Relaxed),
        rejected = stats.rejected.load(Ordering::Relaxed),
        "receive loop stopped"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn peer() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 59090))
    }

    #[test]
    fn rejected_datagrams_leave_state_untouched() {
        let observer = Observer::new(Duration::from_secs(8), 5);
        let now = Instant::now();

        let mut malformed = common::pack_route_table_packet(0xFFFF, 0x0100, 0x0100, &[]).unwrap();
        malformed.extend_from_slice(&[1, 2, 3]);
        malformed[5] = 11;

        for buf in [&[0x01, 0x02, 0x03][..], &malformed[..], &[0u8; 7][..]] {
            assert_eq!(handle_datagram(&observer, buf, peer(), now), None);
        }
        assert!(observer.is_empty());
    }

    #[test]
    fn decoded_datagrams_are_recorded() {
        let observer = Observer::new(Duration::from_secs(8), 5);
        let now = Instant::now();
        let buf = common::pack_data_packet(0xFFFF, 0x0100, 0x0100, 1, 1, &[]).unwrap();

        assert_eq!(handle_datagram(&observer, &buf, peer(), now), Some(PacketType::Data));
        assert_eq!(observer.len(), 1);
    }

    #[test]
    fn receive_loop_exits_when_stopped() {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket.set_read_timeout(Some(Duration::from_millis(10))).unwrap();
        let observer = Observer::new(Duration::from_secs(8), 5);
        let running = AtomicBool::new(false);
        let stats = IngestStats::default();

        receive_loop(&socket, &observer, &running, 1024, &stats).unwrap();
        assert_eq!(stats.received.load(Ordering::Relaxed), 0);
    }
}
