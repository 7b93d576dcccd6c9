use std::net::{SocketAddr, UdpSocket};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use observer::{
    IngestStats, LogSink, Observer, ObserverConfig, SnapshotSink, UdpSink, receive_loop,
    spawn_sweeper,
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// How often the receive loop wakes up to check for shutdown.
const RECV_POLL: Duration = Duration::from_millis(250);

/// Passive topology observer for a wireless mesh
#[derive(Parser, Debug)]
#[command(name = "observer", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Path to a TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// UDP address to listen on
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Seconds before a silent reporting node turns stale
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Send postcard-encoded snapshots to this UDP address
    #[arg(long)]
    snapshot_target: Option<SocketAddr>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the observer (default)
    Run,
    /// Validate the configuration and exit
    Validate,
}

impl Cli {
    fn load_config(&self) -> anyhow::Result<ObserverConfig> {
        let mut config = match &self.config {
            Some(path) => ObserverConfig::from_file(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => ObserverConfig::default(),
        };
        if let Some(listen) = self.listen {
            config.listen = listen;
        }
        if let Some(timeout_secs) = self.timeout_secs {
            config.timeout_secs = timeout_secs;
        }
        if let Some(target) = self.snapshot_target {
            config.snapshot_target = Some(target);
        }
        if let Some(level) = &self.log_level {
            config.log_level = level.clone();
        }
        Ok(config)
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = cli.load_config()?;

    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(config),
        Commands::Validate => validate(&config),
    }
}

fn validate(config: &ObserverConfig) -> anyhow::Result<()> {
    match config.validate() {
        Ok(()) => {
            info!("Configuration is valid.");
            info!(listen = %config.listen, timeout_secs = config.timeout_secs, "observer");
            Ok(())
        }
        Err(e) => {
            error!("Configuration is INVALID: {e}");
            Err(e.into())
        }
    }
}

fn run(config: ObserverConfig) -> anyhow::Result<()> {
    config.validate()?;

    let socket = UdpSocket::bind(config.listen)
        .with_context(|| format!("couldn't bind to {}", config.listen))?;
    socket.set_read_timeout(Some(RECV_POLL))?;

    let observer = Arc::new(Observer::from_config(&config));
    let running = Arc::new(AtomicBool::new(true));

    let r = Arc::clone(&running);
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })?;

    let mut sinks: Vec<Box<dyn SnapshotSink + Send>> = vec![Box::new(LogSink::default())];
    if let Some(target) = config.snapshot_target {
        sinks.push(Box::new(UdpSink::new(target)?));
        info!(%target, "publishing snapshots");
    }
    let sweeper = spawn_sweeper(
        Arc::clone(&observer),
        config.sweep_interval(),
        sinks,
        Arc::clone(&running),
    )?;

    info!(
        listen = %config.listen,
        timeout_secs = config.timeout_secs,
        "observer started, press Ctrl+C to stop"
    );

    let stats = IngestStats::default();
    let result = receive_loop(
        &socket,
        &observer,
        &running,
        config.recv_buffer_size,
        &stats,
    );

    running.store(false, Ordering::SeqCst);
    if sweeper.join().is_err() {
        warn!("sweeper thread panicked");
    }
    info!(nodes = observer.len(), "observer stopped");

    result.context("receive loop failed")
}
