//! Warren server binary: parse flags, set up logging, run the forwarder.

use clap::Parser;
use std::net::Ipv4Addr;
use std::process::ExitCode;
use tracing::{error, info};
use warren::config::ServerConfig;
use warren::net::types::{
    DEFAULT_POOL_BASE, DEFAULT_POOL_SIZE, DEFAULT_PORT, DEFAULT_TUN_MTU, DEFAULT_TUN_NAME,
    HANDSHAKE_TIMEOUT_SECS,
};
use warren::net::Server;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "warren", version, about = "Minimal userspace UDP <-> TUN VPN server")]
struct Args {
    /// UDP listen port
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Tunnel device name
    #[arg(long, default_value = DEFAULT_TUN_NAME)]
    tun: String,

    /// Address to assign to the tunnel device (left unconfigured if absent)
    #[arg(long)]
    tun_ip: Option<Ipv4Addr>,

    /// Netmask used with --tun-ip
    #[arg(long, default_value = "255.255.255.0")]
    netmask: Ipv4Addr,

    /// Tunnel MTU
    #[arg(long, default_value_t = DEFAULT_TUN_MTU)]
    mtu: i32,

    /// First virtual address handed out to clients
    #[arg(long, default_value_t = DEFAULT_POOL_BASE)]
    pool_base: Ipv4Addr,

    /// Number of assignable virtual addresses
    #[arg(long, default_value_t = DEFAULT_POOL_SIZE)]
    pool_size: u32,

    /// Seconds a handshake may stay pending
    #[arg(long, default_value_t = HANDSHAKE_TIMEOUT_SECS)]
    handshake_timeout: u64,
}

/// Logs go to stderr, or to the file named by `VPN_LOG_FILE`.
fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive("warren=info".parse().unwrap());

    match std::env::var("VPN_LOG_FILE") {
        Ok(path) => {
            let file = match std::fs::File::create(&path) {
                Ok(file) => file,
                Err(e) => {
                    eprintln!("cannot open log file {}: {}", path, e);
                    std::process::exit(1);
                }
            };
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::sync::Mutex::new(file))
                .with_ansi(false)
                .init();
        }
        Err(_) => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    init_logging();
    let args = Args::parse();

    let config = ServerConfig {
        listen_port: args.port,
        tun_name: args.tun,
        tun_addr: args.tun_ip,
        tun_netmask: args.netmask,
        tun_mtu: args.mtu,
        pool_base: args.pool_base,
        pool_size: args.pool_size,
        handshake_timeout_secs: args.handshake_timeout,
    };

    info!("warren v{}", VERSION);
    info!(
        "tun {} | udp 0.0.0.0:{} | pool {} x{} | handshake timeout {}s",
        config.tun_name,
        config.listen_port,
        config.pool_base,
        config.pool_size,
        config.handshake_timeout_secs
    );

    let mut server = match Server::bind(&config).await {
        Ok(server) => server,
        Err(e) => {
            error!("init failed: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match server.run().await {
        Ok(()) => {
            info!("bye");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("forwarding loop failed: {}", e);
            ExitCode::FAILURE
        }
    }
}
