use std::fmt::Display;

use thiserror::Error;

pub mod topology;

pub use topology::{
    Edge, NodeSnapshot, NodeStatus, SnapshotCodecError, TopologySnapshot, TrafficStats,
    decode_snapshot, encode_snapshot,
};

/// 16-bit mesh node address. `0` is never a valid node.
pub type Address = u16;

pub const TYPE_DATA: u8 = 0b0000_0010;
pub const TYPE_ROUTE_TABLE: u8 = 0b0000_0110;

pub const HEADER_SIZE: usize = 6;
pub const VIA_SIZE: usize = 2;
/// Header plus via field; every frame starts with these bytes.
pub const FRAME_PREFIX_SIZE: usize = HEADER_SIZE + VIA_SIZE;
pub const ROUTE_ENTRY_SIZE: usize = 6;
/// Sequence number (u32) and test type (u8) in front of the trailing payload.
pub const TEST_DATA_FIXED_SIZE: usize = 5;
/// The declared size is carried in a single byte.
pub const MAX_FRAME_SIZE: usize = u8::MAX as usize;

pub const BROADCAST_ADDR: Address = 0xFFFF;

pub const ROLE_DEFAULT: u8 = 0b0000_0000;
pub const ROLE_CLIENT: u8 = 0b0000_0001;
pub const ROLE_GATEWAY: u8 = 0b0000_0010;
pub const ROLE_RELAY: u8 = 0b0000_0100;
pub const ROLE_TERMINAL: u8 = 0b0000_1000;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("insufficient data: needed {needed} bytes, {available} available")]
    InsufficientData { needed: usize, available: usize },
    #[error("declared packet size {declared} exceeds buffer length {actual}")]
    SizeMismatch { declared: usize, actual: usize },
    #[error("route table payload of {payload_len} bytes is not a multiple of 6")]
    MalformedRouteTable { payload_len: usize },
    #[error("unknown packet type {packet_type:#04x}")]
    UnknownPacketType { packet_type: u8 },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    #[error("frame of {len} bytes exceeds the 255 byte limit")]
    FrameTooLarge { len: usize },
}

#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PacketType {
    Data = TYPE_DATA,
    RouteTable = TYPE_ROUTE_TABLE,
}

impl TryFrom<u8> for PacketType {
    type Error = DecodeError;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            TYPE_DATA => Ok(PacketType::Data),
            TYPE_ROUTE_TABLE => Ok(PacketType::RouteTable),
            packet_type => Err(DecodeError::UnknownPacketType { packet_type }),
        }
    }
}

impl Display for PacketType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PacketType::Data => write!(f, "data"),
            PacketType::RouteTable => write!(f, "route-table"),
        }
    }
}

/// Fixed header at the start of every frame.
///
/// Layout (little-endian):
/// - dst: u16
/// - src: u16
/// - packet_type: u8
/// - size: u8 (total frame length, header included)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub dst: Address,
    pub src: Address,
    /// Raw type byte; validated when the payload is dispatched.
    pub packet_type: u8,
    pub size: u8,
}

impl PacketHeader {
    fn read(reader: &mut Reader<'_>) -> Result<Self, DecodeError> {
        reader.require(HEADER_SIZE)?;
        Ok(PacketHeader {
            dst: reader.u16()?,
            src: reader.u16()?,
            packet_type: reader.u8()?,
            size: reader.u8()?,
        })
    }

    /// Reads the header without validating the rest of the frame.
    /// Used for diagnostics when a full decode fails.
    pub fn peek(buf: &[u8]) -> Option<PacketHeader> {
        PacketHeader::read(&mut Reader::new(buf)).ok()
    }

    fn write(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.dst.to_le_bytes());
        buf.extend_from_slice(&self.src.to_le_bytes());
        buf.push(self.packet_type);
        buf.push(self.size);
    }
}

/// Test-traffic sample carried by a data frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestData {
    pub seq: u32,
    pub test_type: u8,
    pub payload: Vec<u8>,
}

impl TestData {
    fn read(reader: &mut Reader<'_>, payload_len: usize) -> Result<Self, DecodeError> {
        if payload_len < TEST_DATA_FIXED_SIZE {
            return Err(DecodeError::InsufficientData {
                needed: TEST_DATA_FIXED_SIZE,
                available: payload_len,
            });
        }
        let seq = reader.u32()?;
        let test_type = reader.u8()?;
        let payload = reader.take(payload_len - TEST_DATA_FIXED_SIZE)?.to_vec();
        Ok(TestData {
            seq,
            test_type,
            payload,
        })
    }
}

fn role_bits_match(bits: u8, role: u8) -> bool {
    role != ROLE_DEFAULT && bits & role == role
}

/// One row of a node's routing table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteEntry {
    pub address: Address,
    pub via: Address,
    pub metric: u8,
    pub role: u8,
}

impl RouteEntry {
    pub fn has_role(&self, role: u8) -> bool {
        role_bits_match(self.role, role)
    }

    /// A direct neighbour is reached through itself.
    pub fn is_direct(&self) -> bool {
        self.via == self.address
    }

    fn read(reader: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(RouteEntry {
            address: reader.u16()?,
            via: reader.u16()?,
            metric: reader.u8()?,
            role: reader.u8()?,
        })
    }

    fn write(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.address.to_le_bytes());
        buf.extend_from_slice(&self.via.to_le_bytes());
        buf.push(self.metric);
        buf.push(self.role);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Data(TestData),
    RouteTable(Vec<RouteEntry>),
}

/// A fully decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub header: PacketHeader,
    /// Immediate relay that forwarded this frame.
    pub via: Address,
    pub payload: Payload,
}

impl Packet {
    pub fn packet_type(&self) -> PacketType {
        match self.payload {
            Payload::Data(_) => PacketType::Data,
            Payload::RouteTable(_) => PacketType::RouteTable,
        }
    }
}

/// Decodes one datagram into a [`Packet`].
///
/// Bytes past the declared frame size are ignored. Either a complete packet or
/// exactly one error is returned; nothing is partially decoded.
pub fn decode(buf: &[u8]) -> Result<Packet, DecodeError> {
    let mut reader = Reader::new(buf);
    let header = PacketHeader::read(&mut reader)?;
    let via = reader.u16()?;

    let declared = header.size as usize;
    if declared < reader.position() {
        return Err(DecodeError::InsufficientData {
            needed: reader.position(),
            available: declared,
        });
    }
    if buf.len() < declared {
        return Err(DecodeError::SizeMismatch {
            declared,
            actual: buf.len(),
        });
    }
    let payload_len = declared - reader.position();
    let mut body = Reader::new(&buf[reader.position()..declared]);

    let payload = match PacketType::try_from(header.packet_type)? {
        PacketType::Data => Payload::Data(TestData::read(&mut body, payload_len)?),
        PacketType::RouteTable => {
            if payload_len % ROUTE_ENTRY_SIZE != 0 {
                return Err(DecodeError::MalformedRouteTable { payload_len });
            }
            let mut entries = Vec::with_capacity(payload_len / ROUTE_ENTRY_SIZE);
            for _ in 0..payload_len / ROUTE_ENTRY_SIZE {
                entries.push(RouteEntry::read(&mut body)?);
            }
            Payload::RouteTable(entries)
        }
    };

    Ok(Packet {
        header,
        via,
        payload,
    })
}

pub fn pack_data_packet(
    dst: Address,
    src: Address,
    via: Address,
    seq: u32,
    test_type: u8,
    payload: &[u8],
) -> Result<Vec<u8>, EncodeError> {
    let len = FRAME_PREFIX_SIZE + TEST_DATA_FIXED_SIZE + payload.len();
    let mut buf = pack_prefix(dst, src, TYPE_DATA, via, len)?;
    buf.extend_from_slice(&seq.to_le_bytes());
    buf.push(test_type);
    buf.extend_from_slice(payload);
    Ok(buf)
}

pub fn pack_route_table_packet(
    dst: Address,
    src: Address,
    via: Address,
    entries: &[RouteEntry],
) -> Result<Vec<u8>, EncodeError> {
    let len = FRAME_PREFIX_SIZE + entries.len() * ROUTE_ENTRY_SIZE;
    let mut buf = pack_prefix(dst, src, TYPE_ROUTE_TABLE, via, len)?;
    for entry in entries {
        entry.write(&mut buf);
    }
    Ok(buf)
}

fn pack_prefix(
    dst: Address,
    src: Address,
    packet_type: u8,
    via: Address,
    len: usize,
) -> Result<Vec<u8>, EncodeError> {
    let size = u8::try_from(len).map_err(|_| EncodeError::FrameTooLarge { len })?;
    let mut buf = Vec::with_capacity(len);
    PacketHeader {
        dst,
        src,
        packet_type,
        size,
    }
    .write(&mut buf);
    buf.extend_from_slice(&via.to_le_bytes());
    Ok(buf)
}

/// Little-endian cursor over a borrowed buffer.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Reader { buf, pos: 0 }
    }

    fn position(&self) -> usize {
        self.pos
    }

    fn require(&self, needed: usize) -> Result<(), DecodeError> {
        let available = self.buf.len() - self.pos;
        if available < needed {
            return Err(DecodeError::InsufficientData { needed, available });
        }
        Ok(())
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        self.require(n)?;
        let bytes = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(bytes)
    }

    fn u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, DecodeError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, DecodeError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(address: Address, via: Address, metric: u8, role: u8) -> RouteEntry {
        RouteEntry {
            address,
            via,
            metric,
            role,
        }
    }

    #[test]
    fn data_packet_round_trip() {
        let trailing: Vec<u8> = (0..32u8).collect();
        let buf = pack_data_packet(BROADCAST_ADDR, 0x1234, 0x0042, 77, 0x01, &trailing)
            .expect("frame fits");
        assert_eq!(buf.len(), FRAME_PREFIX_SIZE + TEST_DATA_FIXED_SIZE + 32);

        let packet = decode(&buf).expect("valid data frame");
        assert_eq!(packet.header.dst, BROADCAST_ADDR);
        assert_eq!(packet.header.src, 0x1234);
        assert_eq!(packet.header.packet_type, TYPE_DATA);
        assert_eq!(packet.header.size as usize, buf.len());
        assert_eq!(packet.via, 0x0042);
        assert_eq!(packet.packet_type(), PacketType::Data);
        match packet.payload {
            Payload::Data(data) => {
                assert_eq!(data.seq, 77);
                assert_eq!(data.test_type, 0x01);
                assert_eq!(data.payload, trailing);
            }
            other => panic!("expected data payload, got {other:?}"),
        }
    }

    #[test]
    fn data_packet_with_empty_trailing_payload() {
        let buf = pack_data_packet(1, 2, 2, 0, 9, &[]).unwrap();
        let packet = decode(&buf).unwrap();
        assert_eq!(
            packet.payload,
            Payload::Data(TestData {
                seq: 0,
                test_type: 9,
                payload: vec![],
            })
        );
    }

    #[test]
    fn data_payload_shorter_than_fixed_fields() {
        // seq present but no test type byte
        let mut buf = pack_data_packet(1, 2, 2, 5, 0, &[]).unwrap();
        buf.truncate(FRAME_PREFIX_SIZE + 4);
        let len = buf.len() as u8;
        buf[5] = len;
        assert_eq!(
            decode(&buf),
            Err(DecodeError::InsufficientData {
                needed: TEST_DATA_FIXED_SIZE,
                available: 4,
            })
        );
    }

    #[test]
    fn route_table_length_must_be_entry_multiple() {
        for payload_len in 0..=40usize {
            let mut buf = vec![0x01, 0x00, 0x03, 0x02, TYPE_ROUTE_TABLE, 0, 0x03, 0x02];
            buf.extend((0..payload_len).map(|i| (i + 1) as u8));
            let len = buf.len() as u8;
            buf[5] = len;

            match decode(&buf) {
                Ok(Packet {
                    payload: Payload::RouteTable(entries),
                    ..
                }) => {
                    assert_eq!(payload_len % ROUTE_ENTRY_SIZE, 0);
                    assert_eq!(entries.len(), payload_len / ROUTE_ENTRY_SIZE);
                    for (i, e) in entries.iter().enumerate() {
                        let base = (i * ROUTE_ENTRY_SIZE + 1) as u16;
                        assert_eq!(e.address, base | ((base + 1) << 8));
                        assert_eq!(e.metric, (base + 4) as u8);
                    }
                }
                Err(err) => {
                    assert_ne!(payload_len % ROUTE_ENTRY_SIZE, 0);
                    assert_eq!(err, DecodeError::MalformedRouteTable { payload_len });
                }
                Ok(other) => panic!("unexpected packet {other:?}"),
            }
        }
    }

    #[test]
    fn route_entries_keep_wire_order() {
        let entries = vec![
            entry(0x0300, 0x0300, 1, ROLE_GATEWAY),
            entry(0x0100, 0x0300, 2, ROLE_DEFAULT),
            entry(0x0200, 0x0200, 1, ROLE_CLIENT | ROLE_RELAY),
        ];
        let buf = pack_route_table_packet(BROADCAST_ADDR, 0x0400, 0x0400, &entries).unwrap();
        let packet = decode(&buf).unwrap();
        assert_eq!(packet.payload, Payload::RouteTable(entries));
    }

    #[test]
    fn concrete_route_table_frame() {
        let buf = [
            0xFF, 0xFF, // dst
            0x03, 0x02, // src 0x0203
            0x06, // route table
            0x0E, // 14 bytes
            0x03, 0x02, // via
            0x99, 0x36, // address 0x3699
            0x3C, 0x36, // via 0x363C
            0x01, // metric
            0x00, // role
        ];
        let packet = decode(&buf).unwrap();
        assert_eq!(packet.header.src, 0x0203);
        assert_eq!(packet.packet_type(), PacketType::RouteTable);
        assert_eq!(
            packet.payload,
            Payload::RouteTable(vec![entry(0x3699, 0x363C, 1, 0)])
        );
    }

    #[test]
    fn short_buffers_fail_with_insufficient_data() {
        let full = pack_data_packet(1, 2, 3, 4, 5, &[6, 7]).unwrap();
        for len in 0..HEADER_SIZE {
            assert_eq!(
                decode(&full[..len]),
                Err(DecodeError::InsufficientData {
                    needed: HEADER_SIZE,
                    available: len,
                })
            );
        }
        for len in HEADER_SIZE..FRAME_PREFIX_SIZE {
            assert!(matches!(
                decode(&full[..len]),
                Err(DecodeError::InsufficientData { needed: 2, .. })
            ));
        }
    }

    #[test]
    fn declared_size_larger_than_buffer() {
        let full = pack_data_packet(1, 2, 3, 4, 5, &[6, 7, 8]).unwrap();
        let truncated = &full[..full.len() - 1];
        assert_eq!(
            decode(truncated),
            Err(DecodeError::SizeMismatch {
                declared: full.len(),
                actual: full.len() - 1,
            })
        );
    }

    #[test]
    fn declared_size_smaller_than_prefix() {
        let mut buf = pack_route_table_packet(1, 2, 3, &[]).unwrap();
        buf[5] = 4;
        assert_eq!(
            decode(&buf),
            Err(DecodeError::InsufficientData {
                needed: FRAME_PREFIX_SIZE,
                available: 4,
            })
        );
    }

    #[test]
    fn bytes_past_declared_size_are_ignored() {
        let mut buf = pack_data_packet(1, 2, 3, 10, 1, &[0xAA]).unwrap();
        buf.extend_from_slice(&[0xDE, 0xAD]);
        match decode(&buf).unwrap().payload {
            Payload::Data(data) => assert_eq!(data.payload, vec![0xAA]),
            other => panic!("expected data payload, got {other:?}"),
        }
    }

    #[test]
    fn unknown_type_is_reported_with_raw_byte() {
        let mut buf = pack_data_packet(1, 2, 3, 10, 1, &[]).unwrap();
        buf[4] = 0b0000_0100;
        assert_eq!(
            decode(&buf),
            Err(DecodeError::UnknownPacketType {
                packet_type: 0b0000_0100
            })
        );
        let header = PacketHeader::peek(&buf).unwrap();
        assert_eq!(header.src, 2);
        assert_eq!(header.packet_type, 0b0000_0100);
    }

    #[test]
    fn oversized_frames_are_rejected_by_encoder() {
        let entries = vec![entry(1, 1, 1, 0); 41];
        assert!(pack_route_table_packet(0, 1, 1, &entries).is_ok());
        let entries = vec![entry(1, 1, 1, 0); 42];
        assert_eq!(
            pack_route_table_packet(0, 1, 1, &entries),
            Err(EncodeError::FrameTooLarge {
                len: FRAME_PREFIX_SIZE + 42 * ROUTE_ENTRY_SIZE
            })
        );
    }

    #[test]
    fn role_bits() {
        let e = entry(1, 1, 1, ROLE_GATEWAY | ROLE_RELAY);
        assert!(e.has_role(ROLE_GATEWAY));
        assert!(e.has_role(ROLE_RELAY));
        assert!(!e.has_role(ROLE_CLIENT));
        assert!(!e.has_role(ROLE_DEFAULT));
        assert!(e.is_direct());
    }
}
