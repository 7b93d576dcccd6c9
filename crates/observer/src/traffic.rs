use std::{
    collections::{HashMap, VecDeque},
    time::{Duration, Instant},
};

use common::{Address, Packet, Payload, TrafficStats};

/// Per-source counters for every frame a node sent itself
pub struct TrafficMonitor {
    nodes: HashMap<Address, NodeTraffic>,
    rate_window: Duration,
}

impl TrafficMonitor {
    pub fn new(rate_window_secs: u32) -> Self {
        TrafficMonitor {
            nodes: HashMap::new(),
            rate_window: Duration::from_secs(u64::from(rate_window_secs)),
        }
    }

    pub fn record(&mut self, packet: &Packet, now: Instant) -> SeqArrival {
        let span = self.rate_window;
        let node = self
            .nodes
            .entry(packet.header.src)
            .or_insert_with(|| NodeTraffic::new(span));

        let size = packet.header.size;
        node.packets += 1;
        node.bytes += size as u64;
        node.last_packet_type = Some(packet.header.packet_type);
        node.last_packet_size = Some(size);
        node.window.push(now, size);

        match &packet.payload {
            Payload::Data(data) => node.seq.observe(data.seq),
            Payload::RouteTable(_) => SeqArrival::InOrder,
        }
    }

    pub fn forget(&mut self, addr: Address) {
        self.nodes.remove(&addr);
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Counters for `addr`; all zero if it never sent anything itself.
    pub fn stats(&self, addr: Address, now: Instant) -> TrafficStats {
        let Some(node) = self.nodes.get(&addr) else {
            return TrafficStats::default();
        };
        let (packets_per_second, bytes_per_second) = node.window.rates(now);
        TrafficStats {
            packets: node.packets,
            bytes: node.bytes,
            packets_per_second,
            bytes_per_second,
            last_packet_type: node.last_packet_type,
            last_packet_size: node.last_packet_size,
            last_seq: node.seq.last,
            missing_sequences: node.seq.missed,
            out_of_order: node.seq.reordered,
            duplicates: node.seq.repeated,
        }
    }
}

struct NodeTraffic {
    packets: u64,
    bytes: u64,
    last_packet_type: Option<u8>,
    last_packet_size: Option<u8>,
    seq: SeqWindow,
    window: ArrivalWindow,
}

impl NodeTraffic {
    fn new(span: Duration) -> Self {
        NodeTraffic {
            packets: 0,
            bytes: 0,
            last_packet_type: None,
            last_packet_size: None,
            seq: SeqWindow::default(),
            window: ArrivalWindow::new(span),
        }
    }
}

/// Where a test-data sequence number landed relative to the last one seen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeqArrival {
    InOrder,
    Gap { missed: u64 },
    Reordered,
    Repeated,
}

/// Sequence bookkeeping for one source. Wrapping from `u32::MAX` to 0 is
/// in order.
#[derive(Default)]
struct SeqWindow {
    last: Option<u32>,
    missed: u64,
    reordered: u64,
    repeated: u64,
}

impl SeqWindow {
    fn observe(&mut self, seq: u32) -> SeqArrival {
        let Some(last) = self.last else {
            self.last = Some(seq);
            return SeqArrival::InOrder;
        };

        // forward distance on the ring; anything past half is treated as old
        let ahead = seq.wrapping_sub(last);
        match ahead {
            0 => {
                self.repeated += 1;
                SeqArrival::Repeated
            }
            1 => {
                self.last = Some(seq);
                SeqArrival::InOrder
            }
            n if n < u32::MAX / 2 => {
                let missed = u64::from(n - 1);
                self.missed += missed;
                self.last = Some(seq);
                SeqArrival::Gap { missed }
            }
            _ => {
                self.reordered += 1;
                SeqArrival::Reordered
            }
        }
    }
}

/// Arrivals less than this far apart share a bucket.
const BUCKET_SPAN: Duration = Duration::from_secs(1);

/// Sliding window of 1-second buckets used for per-second rates. Holds at
/// most one bucket per second of window, whatever the frame rate.
struct ArrivalWindow {
    span: Duration,
    buckets: VecDeque<ArrivalBucket>,
}

struct ArrivalBucket {
    opened: Instant,
    frames: u64,
    bytes: u64,
}

impl ArrivalWindow {
    fn new(span: Duration) -> Self {
        ArrivalWindow {
            span,
            buckets: VecDeque::new(),
        }
    }

    fn push(&mut self, now: Instant, size: u8) {
        self.expire(now);

        match self.buckets.back_mut() {
            Some(bucket) if now.saturating_duration_since(bucket.opened) < BUCKET_SPAN => {
                bucket.frames += 1;
                bucket.bytes += u64::from(size);
            }
            _ => self.buckets.push_back(ArrivalBucket {
                opened: now,
                frames: 1,
                bytes: u64::from(size),
            }),
        }
    }

    fn expire(&mut self, now: Instant) {
        while self
            .buckets
            .front()
            .is_some_and(|b| now.saturating_duration_since(b.opened) >= self.span)
        {
            self.buckets.pop_front();
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.buckets.len()
    }

    /// (frames/s, bytes/s) over the window ending at `now`.
    fn rates(&self, now: Instant) -> (f64, f64) {
        let secs = self.span.as_secs_f64();
        if secs == 0.0 {
            return (0.0, 0.0);
        }
        let (frames, bytes) = self
            .buckets
            .iter()
            .filter(|b| now.saturating_duration_since(b.opened) < self.span)
            .fold((0u64, 0u64), |(f, by), b| (f + b.frames, by + b.bytes));
        (frames as f64 / secs, bytes as f64 / secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data_frame(src: Address, seq: u32) -> Packet {
        let buf = common::pack_data_packet(0xFFFF, src, src, seq, 1, &[0u8; 32]).unwrap();
        common::decode(&buf).unwrap()
    }

    #[test]
    fn sequence_arrivals_are_classified() {
        let mut seq = SeqWindow::default();
        assert_eq!(seq.observe(10), SeqArrival::InOrder);
        assert_eq!(seq.observe(11), SeqArrival::InOrder);
        assert_eq!(seq.observe(14), SeqArrival::Gap { missed: 2 });
        assert_eq!(seq.observe(14), SeqArrival::Repeated);
        assert_eq!(seq.observe(12), SeqArrival::Reordered);
        assert_eq!(seq.last, Some(14));
        assert_eq!(seq.missed, 2);
    }

    #[test]
    fn sequence_wraps_without_loss() {
        let mut seq = SeqWindow::default();
        seq.observe(u32::MAX);
        assert_eq!(seq.observe(0), SeqArrival::InOrder);
    }

    #[test]
    fn rate_uses_sliding_window() {
        let mut window = ArrivalWindow::new(Duration::from_secs(5));
        let t0 = Instant::now();
        for i in 0..10 {
            window.push(t0 + Duration::from_millis(i * 100), 45);
        }
        let (fps, bps) = window.rates(t0 + Duration::from_secs(1));
        assert_eq!(fps, 2.0);
        assert_eq!(bps, 90.0);

        let (fps, _) = window.rates(t0 + Duration::from_secs(6));
        assert_eq!(fps, 0.0);
    }

    #[test]
    fn busy_source_keeps_bucket_count_bounded() {
        let mut window = ArrivalWindow::new(Duration::from_secs(5));
        let t0 = Instant::now();
        // 100k frames over 4s
        for i in 0..100_000u64 {
            window.push(t0 + Duration::from_micros(i * 40), 45);
            assert!(window.len() <= 5);
        }
        assert_eq!(window.len(), 4);

        let (fps, bps) = window.rates(t0 + Duration::from_secs(4));
        assert_eq!(fps, 20_000.0);
        assert_eq!(bps, 900_000.0);

        // a quiet stretch drops old buckets on the next push
        window.push(t0 + Duration::from_secs(12), 45);
        assert_eq!(window.len(), 1);
    }

    #[test]
    fn monitor_counts_declared_bytes_and_forgets() {
        let mut monitor = TrafficMonitor::new(5);
        let t0 = Instant::now();
        monitor.record(&data_frame(0x0101, 0), t0);
        let event = monitor.record(&data_frame(0x0101, 3), t0);
        assert_eq!(event, SeqArrival::Gap { missed: 2 });

        let stats = monitor.stats(0x0101, t0);
        assert_eq!(stats.packets, 2);
        assert_eq!(stats.bytes, 2 * 45);
        assert_eq!(stats.last_packet_type, Some(common::TYPE_DATA));
        assert_eq!(stats.last_packet_size, Some(45));
        assert_eq!(stats.last_seq, Some(3));
        assert_eq!(stats.missing_sequences, 2);

        monitor.forget(0x0101);
        assert!(monitor.is_empty());
        assert_eq!(monitor.stats(0x0101, t0), TrafficStats::default());
    }
}
