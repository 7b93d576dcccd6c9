use std::{
    io::Result,
    net::{SocketAddr, UdpSocket},
    time::Instant,
};

use crossterm::event::KeyCode;

use crate::transmission::{EmitterState, send_burst, send_random_data, send_route_round};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputCommand {
    SendData,
    SendRoutes,
    SendBurst,
    StartAuto,
    StopAuto,
    ToggleNode(usize),
}

pub fn handle_input(key: KeyCode) -> Option<InputCommand> {
    match key {
        KeyCode::Char(c) => match c {
            ' ' => Some(InputCommand::SendData),
            'r' => Some(InputCommand::SendRoutes),
            'b' => Some(InputCommand::SendBurst),
            'a' => Some(InputCommand::StartAuto),
            's' => Some(InputCommand::StopAuto),
            '1'..='9' => c
                .to_digit(10)
                .map(|n| InputCommand::ToggleNode(n as usize - 1)),
            _ => None,
        },
        _ => None,
    }
}

/// Runs `command` and returns a status line describing what happened.
pub fn execute_command(
    command: InputCommand,
    state: &mut EmitterState,
    socket: &UdpSocket,
    target: SocketAddr,
) -> Result<String> {
    let status = match command {
        InputCommand::SendData => {
            if send_random_data(state, socket, target)? {
                "Sent one data frame".to_string()
            } else {
                "Every node is silent".to_string()
            }
        }
        InputCommand::SendRoutes => {
            send_route_round(state, socket, target)?;
            "Sent route tables".to_string()
        }
        InputCommand::SendBurst => {
            send_burst(state, socket, target)?;
            format!("Sent burst of {}", state.burst_count)
        }
        InputCommand::StartAuto => {
            state.next_auto_at = Some(Instant::now());
            format!("Automatic traffic every {:?}", state.auto_interval)
        }
        InputCommand::StopAuto => {
            state.next_auto_at = None;
            "Automatic traffic stopped".to_string()
        }
        InputCommand::ToggleNode(index) => match state.mesh.toggle_silent(index) {
            Some(silent) => format!(
                "Node {:#06x} {}",
                state.mesh.nodes()[index].address,
                if silent { "silenced" } else { "transmitting" }
            ),
            None => format!("No node {}", index + 1),
        },
    };
    Ok(status)
}
