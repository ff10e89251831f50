//! # Server Binary Entry Point
//!
//! Thin wrapper that loads the configuration and runs the conveyor hub
//! server until Ctrl+C.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --bin server -- --config config/server.toml
//! cargo run --bin server -- --address 0.0.0.0:12345 --data-dir data --no-discovery
//! ```

use clap::Parser;
use env_logger::{Builder, Env};
use log::info;
use std::io::Write;
use std::path::PathBuf;

use conveyor_hub::common::config::load_config;
use conveyor_hub::server::{ServerConfig, ServerMiddleware};

/// Command-line arguments for the server binary
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the server configuration file (TOML format)
    ///
    /// Example: config/server.toml
    #[arg(short, long)]
    config: Option<String>,

    /// Listen address, overrides `[server] address`
    #[arg(short, long)]
    address: Option<String>,

    /// Snapshot directory, overrides `[storage] data_dir`
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Do not answer UDP discovery broadcasts
    #[arg(long)]
    no_discovery: bool,
}

/// Format: `[HH:MM:SS] [LEVEL] message`, INFO unless `RUST_LOG` says otherwise.
fn init_logger() {
    Builder::from_env(Env::default().default_filter_or("info"))
        .format(|buf, record| {
            writeln!(
                buf,
                "[{}] [{}] {}",
                chrono::Local::now().format("%H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logger();

    let args = Args::parse();

    let mut config: ServerConfig = match &args.config {
        Some(path) => load_config(path)?,
        None => ServerConfig::default(),
    };
    if let Some(address) = args.address {
        config.server.address = address;
    }
    if let Some(data_dir) = args.data_dir {
        config.storage.data_dir = data_dir;
    }
    if args.no_discovery {
        config.discovery.enabled = false;
    }

    let middleware = ServerMiddleware::new(config).await?;

    tokio::select! {
        result = middleware.run() => result?,
        _ = tokio::signal::ctrl_c() => info!("🛑 Shutting down"),
    }

    Ok(())
}
