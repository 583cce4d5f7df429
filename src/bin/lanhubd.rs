//! CLI entry point: loads configuration, starts the server, and blocks
//! until interrupted.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use lanhub::{Server, ServerConfig};
use tracing_subscriber::EnvFilter;

/// LAN file-sharing and messaging server.
#[derive(Debug, Parser)]
#[command(name = "lanhubd", version, about)]
struct Args {
    /// Path to a TOML config file. When given, all other flags are
    /// ignored except as overrides are added later.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Address the TCP control listener binds to.
    #[arg(long, default_value = "0.0.0.0:2277")]
    bind: String,

    /// Root of the shared directory.
    #[arg(long)]
    share_dir: Option<PathBuf>,

    /// Path to the CSV-shaped user list.
    #[arg(long)]
    users: Option<PathBuf>,

    /// Display name advertised over UDP discovery.
    #[arg(long, default_value = "lanhub")]
    name: String,

    /// IPv4 address advertised in discovery responses.
    #[arg(long, default_value = "0.0.0.0")]
    advertise_ip: String,

    /// UDP port the discovery responder listens on.
    #[arg(long)]
    discovery_port: Option<u16>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let config = match build_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e}");
            std::process::exit(1);
        }
    };

    let mut server = match Server::start(&config) {
        Ok(server) => server,
        Err(e) => {
            eprintln!("failed to start server: {e}");
            std::process::exit(1);
        }
    };

    let master = Arc::clone(server.master());
    ctrlc_shutdown(master);

    server.run();
    server.stop();
}

fn build_config(args: &Args) -> lanhub::ServerResult<ServerConfig> {
    if let Some(path) = &args.config {
        return ServerConfig::from_toml_file(path);
    }

    let mut builder = lanhub::config::ConfigBuilder::new()
        .server_name(args.name.clone())
        .bind_address(args.bind.clone())
        .advertise_ip(args.advertise_ip.clone())
        .share_dir(args.share_dir.clone().unwrap_or_else(|| PathBuf::from(".")))
        .user_list_path(args.users.clone().unwrap_or_else(|| PathBuf::from("users.csv")));
    if let Some(port) = args.discovery_port {
        builder = builder.discovery_port(port);
    }
    builder.build()
}

/// Installs a Ctrl-C handler that stops Master, which in turn unblocks
/// `server.run()`'s tick loop.
fn ctrlc_shutdown(master: Arc<lanhub::master::Master>) {
    if let Err(e) = ctrlc::set_handler(move || master.stop()) {
        eprintln!("failed to install Ctrl-C handler: {e}");
    }
}
