//! umesh daemon binary
//!
//! Loads configuration, runs one mesh node over the UDP radio emulation,
//! and executes CLI commands read from stdin.

use clap::{Parser, ValueEnum};
use rand::Rng;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, EnvFilter};
use umesh::forwarder::{DeliveryFailure, Destination};
use umesh::{cli, Config, ExtAddr, IpAdapter, MeshNode, RouterKind, Sid, UdpHal};

/// Node tick period.
const TICK_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Clone, Copy, Debug, ValueEnum)]
enum RouterArg {
    Sid,
    Vector,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ModeArg {
    Super,
    Leader,
    Sleepy,
    Mobile,
}

/// umesh mesh network daemon
#[derive(Parser, Debug)]
#[command(name = "umesh", version, about)]
struct Args {
    /// Path to configuration file (overrides default search paths)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Routing strategy
    #[arg(long, value_enum)]
    router: Option<RouterArg>,

    /// Mode flags, comma separated
    #[arg(long, value_enum, value_delimiter = ',')]
    mode: Vec<ModeArg>,
}

/// Hands reassembled datagrams to the log.
struct LogIpAdapter;

impl IpAdapter for LogIpAdapter {
    fn forward_up(&mut self, src: Sid, datagram: Vec<u8>) {
        info!(src = %src, len = datagram.len(), data = %hex::encode(&datagram), "Datagram received");
    }

    fn delivery_failed(&mut self, dest: Destination, reason: DeliveryFailure) {
        warn!(dest = %dest, reason = %reason, "Datagram not delivered");
    }
}

fn load_config(args: &Args) -> Config {
    let (mut config, loaded_paths) = if let Some(config_path) = &args.config {
        match Config::load_file(config_path) {
            Ok(config) => (config, vec![config_path.clone()]),
            Err(e) => {
                error!("Failed to load configuration from {}: {}", config_path.display(), e);
                std::process::exit(1);
            }
        }
    } else {
        match Config::load() {
            Ok(result) => result,
            Err(e) => {
                error!("Failed to load configuration: {}", e);
                std::process::exit(1);
            }
        }
    };

    if loaded_paths.is_empty() {
        info!("No config files found, using defaults");
    } else {
        for path in &loaded_paths {
            info!(path = %path.display(), "Loaded config file");
        }
    }

    if let Some(router) = args.router {
        config.node.router.kind = match router {
            RouterArg::Sid => RouterKind::Sid,
            RouterArg::Vector => RouterKind::Vector,
        };
    }
    for flag in &args.mode {
        let mode = &mut config.node.mode;
        match flag {
            ModeArg::Super => mode.super_capable = true,
            ModeArg::Leader => mode.leader = true,
            ModeArg::Sleepy => mode.rx_on = false,
            ModeArg::Mobile => mode.mobile = true,
        }
    }
    config
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    info!("umesh starting");
    let config = load_config(&args);

    let ext = match config.node.identity.ext_addr {
        Some(ext) => ext,
        None => {
            let ext = ExtAddr::from_u64(rand::thread_rng().r#gen());
            warn!(ext = %ext, "No extended address configured, using a random one");
            ext
        }
    };

    let (hal, mut frames) = match UdpHal::bind(ext, &config.udp).await {
        Ok(result) => result,
        Err(e) => {
            error!("Failed to start UDP radio: {}", e);
            std::process::exit(1);
        }
    };

    let mut node = match MeshNode::new(config, Box::new(hal), Box::new(LogIpAdapter)) {
        Ok(node) => node,
        Err(e) => {
            error!("Failed to create node: {}", e);
            std::process::exit(1);
        }
    };

    let epoch = Instant::now();
    let now_ms = || epoch.elapsed().as_millis() as u64;

    if let Err(e) = node.start(now_ms()) {
        error!("Failed to start node: {}", e);
        std::process::exit(1);
    }
    info!(ext = %node.ext_addr(), mode = %node.mode(), "umesh running, press Ctrl+C to exit");

    let mut ticker = tokio::time::interval(TICK_INTERVAL);
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            _ = ticker.tick() => node.tick(now_ms()),
            Some(received) = frames.recv() => {
                node.receive(received.src, received.frame, None);
                node.tick(now_ms());
            }
            line = stdin.next_line(), if stdin_open => match line {
                Ok(Some(line)) => {
                    let response = cli::execute(&mut node, &line);
                    node.tick(now_ms());
                    if let Err(e) = stdout.write_all(response.as_bytes()).await {
                        warn!(error = %e, "Failed to write CLI response");
                    }
                    let _ = stdout.flush().await;
                }
                Ok(None) => stdin_open = false,
                Err(e) => {
                    warn!(error = %e, "Failed to read stdin");
                    stdin_open = false;
                }
            },
            signal = tokio::signal::ctrl_c() => {
                match signal {
                    Ok(()) => info!("Shutdown signal received"),
                    Err(e) => error!("Failed to listen for shutdown signal: {}", e),
                }
                break;
            }
        }
    }

    info!("umesh shutting down");
    if let Err(e) = node.stop() {
        warn!("Error during shutdown: {}", e);
    }
    info!("umesh shutdown complete");
}
