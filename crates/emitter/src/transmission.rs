use std::{
    io::{Error, Result},
    net::{SocketAddr, UdpSocket},
    time::{Duration, Instant},
};

use common::EncodeError;
use rand::Rng;

use crate::mesh::SimulatedMesh;

pub struct EmitterState {
    pub mesh: SimulatedMesh,
    pub burst_count: u32,
    pub auto_interval: Duration,
    pub next_auto_at: Option<Instant>,
    pub data_sent: u64,
    pub routes_sent: u64,
}

impl EmitterState {
    pub fn new(mesh: SimulatedMesh, burst_count: u32, auto_interval: Duration) -> Self {
        Self {
            mesh,
            burst_count,
            auto_interval,
            next_auto_at: None,
            data_sent: 0,
            routes_sent: 0,
        }
    }
}

fn encoded(frame: std::result::Result<Vec<u8>, EncodeError>) -> Result<Vec<u8>> {
    frame.map_err(Error::other)
}

pub fn send_data(
    state: &mut EmitterState,
    socket: &UdpSocket,
    target: SocketAddr,
    index: usize,
) -> Result<()> {
    let frame = encoded(state.mesh.data_frame(index))?;
    socket.send_to(&frame, target)?;
    state.data_sent += 1;
    Ok(())
}

/// Sends one data frame from a random live node. Returns false if every
/// node is silent.
pub fn send_random_data(
    state: &mut EmitterState,
    socket: &UdpSocket,
    target: SocketAddr,
) -> Result<bool> {
    let live = state.mesh.live_nodes();
    if live.is_empty() {
        return Ok(false);
    }
    let index = live[rand::thread_rng().gen_range(0..live.len())];
    send_data(state, socket, target, index)?;
    Ok(true)
}

/// Every live node reports its route table once.
pub fn send_route_round(
    state: &mut EmitterState,
    socket: &UdpSocket,
    target: SocketAddr,
) -> Result<()> {
    for index in state.mesh.live_nodes() {
        let frame = encoded(state.mesh.route_frame(index))?;
        socket.send_to(&frame, target)?;
        state.routes_sent += 1;
    }
    Ok(())
}

pub fn send_burst(state: &mut EmitterState, socket: &UdpSocket, target: SocketAddr) -> Result<()> {
    for _ in 0..state.burst_count {
        if !send_random_data(state, socket, target)? {
            break;
        }
    }
    Ok(())
}

/// In automatic mode every live node sends a route table and a data frame
/// once per interval.
pub fn send_auto_traffic(
    state: &mut EmitterState,
    socket: &UdpSocket,
    target: SocketAddr,
    now: Instant,
) -> Result<()> {
    let Some(next_at) = state.next_auto_at else {
        return Ok(());
    };
    if now < next_at {
        return Ok(());
    }

    send_route_round(state, socket, target)?;
    for index in state.mesh.live_nodes() {
        send_data(state, socket, target, index)?;
    }
    state.next_auto_at = Some(now + state.auto_interval);
    Ok(())
}
