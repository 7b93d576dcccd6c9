use common::{Address, BROADCAST_ADDR, EncodeError, ROLE_DEFAULT, ROLE_GATEWAY, RouteEntry};

pub const FIRST_ADDRESS: Address = 0x0101;
pub const TEST_TYPE: u8 = 0x01;
pub const TEST_PAYLOAD_LEN: usize = 32;

pub struct SimNode {
    pub address: Address,
    pub next_seq: u32,
    /// Silent nodes stop transmitting but stay in their neighbours' tables.
    pub silent: bool,
}

/// A chain of nodes where node 0 is the gateway feeding the observer.
pub struct SimulatedMesh {
    nodes: Vec<SimNode>,
}

impl SimulatedMesh {
    pub fn chain(count: u16) -> Self {
        let nodes = (0..count)
            .map(|i| SimNode {
                address: FIRST_ADDRESS + i,
                next_seq: 0,
                silent: false,
            })
            .collect();
        SimulatedMesh { nodes }
    }

    pub fn nodes(&self) -> &[SimNode] {
        &self.nodes
    }

    pub fn live_nodes(&self) -> Vec<usize> {
        (0..self.nodes.len())
            .filter(|&i| !self.nodes[i].silent)
            .collect()
    }

    /// Flips the silent flag, returning the new value.
    pub fn toggle_silent(&mut self, index: usize) -> Option<bool> {
        let node = self.nodes.get_mut(index)?;
        node.silent = !node.silent;
        Some(node.silent)
    }

    /// Neighbours are direct, everything further away goes through the
    /// neighbour on that side. Metric is the hop count.
    pub fn route_table(&self, index: usize) -> Vec<RouteEntry> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|&(j, _)| j != index)
            .map(|(j, other)| {
                let next = if j > index { index + 1 } else { index - 1 };
                RouteEntry {
                    address: other.address,
                    via: self.nodes[next].address,
                    metric: index.abs_diff(j) as u8,
                    role: if j == 0 { ROLE_GATEWAY } else { ROLE_DEFAULT },
                }
            })
            .collect()
    }

    pub fn route_frame(&self, index: usize) -> Result<Vec<u8>, EncodeError> {
        let src = self.nodes[index].address;
        let via = self.last_hop(index);
        common::pack_route_table_packet(BROADCAST_ADDR, src, via, &self.route_table(index))
    }

    /// Builds the next test-data frame for `index`, mirroring the firmware
    /// generator: every third frame is broadcast, the rest go to a peer.
    pub fn data_frame(&mut self, index: usize) -> Result<Vec<u8>, EncodeError> {
        let via = self.last_hop(index);
        let peer = self.nodes[(index + 1) % self.nodes.len()].address;
        let node = &mut self.nodes[index];

        let seq = node.next_seq;
        node.next_seq = node.next_seq.wrapping_add(1);
        let payload: Vec<u8> = (0..TEST_PAYLOAD_LEN)
            .map(|i| (seq.wrapping_add(i as u32) & 0xFF) as u8)
            .collect();
        let dst = if seq % 3 == 0 { BROADCAST_ADDR } else { peer };

        common::pack_data_packet(dst, node.address, via, seq, TEST_TYPE, &payload)
    }

    /// Relay that hands frames from `index` to the gateway.
    fn last_hop(&self, index: usize) -> Address {
        if index <= 1 {
            self.nodes[index].address
        } else {
            self.nodes[1].address
        }
    }
}
