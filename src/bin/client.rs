//! # Client Binary Entry Point
//!
//! Headless operator console: finds the server, logs in, prints the task
//! list and then logs every pushed task until Ctrl+C or disconnect.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --bin client -- --config config/client.toml
//! cargo run --bin client -- --config config/client.toml --server 127.0.0.1:12345
//! ```

use clap::Parser;
use env_logger::{Builder, Env};
use log::info;
use std::io::Write;

use conveyor_hub::client::{ClientConfig, ClientMiddleware};
use conveyor_hub::common::config::load_config;

/// Command-line arguments for the client binary
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the client configuration file (TOML format)
    ///
    /// Example: config/client.toml
    #[arg(short, long)]
    config: String,

    /// Server address, skips discovery
    #[arg(short, long)]
    server: Option<String>,

    /// Overrides `[client] username`
    #[arg(short, long)]
    username: Option<String>,

    /// Overrides `[client] password`
    #[arg(short, long)]
    password: Option<String>,
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

    let mut config: ClientConfig = load_config(&args.config)?;
    if args.server.is_some() {
        config.client.server_address = args.server;
    }
    if let Some(username) = args.username {
        config.client.username = username;
    }
    if let Some(password) = args.password {
        config.client.password = password;
    }

    let mut middleware = ClientMiddleware::start(config).await?;

    for (conveyor, tasks) in middleware.view().tasks().iter().enumerate() {
        for task in tasks {
            let progress = task
                .progress_percent()
                .map(|percent| format!("{:.0}%", percent))
                .unwrap_or_else(|| "-".to_string());
            info!(
                "  [{}] {} {} {} {}/{} {} {} ({:?})",
                conveyor + 1,
                task.id,
                task.material,
                task.color,
                task.completed_quantity,
                task.planned_quantity,
                task.unit,
                progress,
                task.status
            );
        }
    }

    tokio::select! {
        result = middleware.run() => result?,
        _ = tokio::signal::ctrl_c() => info!("👋 Disconnecting"),
    }

    Ok(())
}
