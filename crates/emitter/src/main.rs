use std::io::{Write, stdout};
use std::net::{SocketAddr, UdpSocket};
use std::time::{Duration, Instant};

use clap::Parser;
use crossterm::{
    cursor,
    event::{self, Event, KeyCode, KeyEventKind},
    execute, queue,
    terminal::{self, Clear, ClearType, EnterAlternateScreen, LeaveAlternateScreen},
};

use crate::cli::Args;
use crate::input::{execute_command, handle_input};
use crate::mesh::SimulatedMesh;
use crate::transmission::{EmitterState, send_auto_traffic};

mod cli;
mod input;
mod mesh;
mod transmission;

struct TerminalGuard;

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
        let _ = execute!(stdout(), LeaveAlternateScreen, cursor::Show);
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let socket = UdpSocket::bind("0.0.0.0:0")?;

    let mut state = EmitterState::new(
        SimulatedMesh::chain(args.nodes),
        args.burst,
        Duration::from_millis(args.interval_ms),
    );

    terminal::enable_raw_mode()?;
    execute!(stdout(), EnterAlternateScreen, cursor::Hide)?;
    let _guard = TerminalGuard;

    run_app(&mut state, &socket, args.target)?;
    Ok(())
}

fn run_app(state: &mut EmitterState, socket: &UdpSocket, target: SocketAddr) -> anyhow::Result<()> {
    let mut status = format!("Sending to {target}");

    loop {
        render(state, &status)?;

        if event::poll(Duration::from_millis(50))? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    match key.code {
                        KeyCode::Char('q') | KeyCode::Esc => break,
                        code => {
                            if let Some(command) = handle_input(code) {
                                status = execute_command(command, state, socket, target)?;
                            }
                        }
                    }
                }
            }
        }

        send_auto_traffic(state, socket, target, Instant::now())?;
    }

    Ok(())
}

fn render(state: &EmitterState, status: &str) -> std::io::Result<()> {
    let mut out = stdout();
    queue!(out, cursor::MoveTo(0, 0), Clear(ClearType::All))?;
    write!(out, "Mesh traffic emitter")?;
    queue!(out, cursor::MoveToNextLine(1))?;
    write!(
        out,
        "Commands: Space=data | R=routes | B=burst | A/S=auto on/off | 1-9=silence node | Q=quit"
    )?;
    queue!(out, cursor::MoveToNextLine(2))?;

    for (i, node) in state.mesh.nodes().iter().enumerate() {
        write!(
            out,
            "[{}] {:#06x}  seq={:<6} {}",
            i + 1,
            node.address,
            node.next_seq,
            if node.silent { "silent" } else { "live" }
        )?;
        queue!(out, cursor::MoveToNextLine(1))?;
    }

    queue!(out, cursor::MoveToNextLine(1))?;
    write!(
        out,
        "data={} routes={} auto={}",
        state.data_sent,
        state.routes_sent,
        if state.next_auto_at.is_some() { "on" } else { "off" }
    )?;
    queue!(out, cursor::MoveToNextLine(1))?;
    write!(out, "{status}")?;
    out.flush()
}
