use std::net::SocketAddr;

use clap::Parser;

/// Synthetic mesh traffic for exercising the observer
#[derive(Parser, Debug)]
#[command(name = "emitter", version, about, long_about = None)]
pub struct Args {
    /// Observer address
    #[arg(short, long, default_value = "127.0.0.1:8080")]
    pub target: SocketAddr,

    /// Number of simulated nodes in the chain
    #[arg(short, long, default_value_t = 4, value_parser = clap::value_parser!(u16).range(2..=9))]
    pub nodes: u16,

    /// Interval between automatic rounds in milliseconds
    #[arg(long, default_value_t = 1000)]
    pub interval_ms: u64,

    /// Data frames per burst
    #[arg(short, long, default_value_t = 20)]
    pub burst: u32,
}
