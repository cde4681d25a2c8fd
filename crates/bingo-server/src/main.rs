//! BingoDB server binary.
//!
//! Loads a table configuration and serves the store over a Unix domain socket.

use std::path::PathBuf;
use std::sync::Arc;

use bingo_core::{Bingo, BingoConfig};
use bingo_server::BingoServer;
use tracing::info;

const USAGE: &str = "usage: bingo-server --config PATH [--socket PATH]";

fn parse_args() -> (PathBuf, Option<PathBuf>) {
    let args: Vec<String> = std::env::args().collect();
    let mut config_path: Option<PathBuf> = None;
    let mut socket_path: Option<PathBuf> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            flag @ ("--config" | "--socket") => {
                i += 1;
                let Some(value) = args.get(i) else {
                    eprintln!("missing value for {flag}");
                    eprintln!("{USAGE}");
                    std::process::exit(1);
                };
                if flag == "--config" {
                    config_path = Some(PathBuf::from(value));
                } else {
                    socket_path = Some(PathBuf::from(value));
                }
            }
            other => {
                eprintln!("unknown argument: {other}");
                eprintln!("{USAGE}");
                std::process::exit(1);
            }
        }
        i += 1;
    }

    let Some(config_path) = config_path else {
        eprintln!("{USAGE}");
        std::process::exit(1);
    };
    (config_path, socket_path)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let (config_path, socket_override) = parse_args();
    let config = BingoConfig::from_file(&config_path)?;

    let socket_path = socket_override
        .or_else(|| config.server.socket.clone())
        .unwrap_or_else(|| std::env::temp_dir().join("bingo.sock"));
    if let Some(parent) = socket_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    info!(config = %config_path.display(), socket = %socket_path.display(), "starting");

    let bingo = Arc::new(Bingo::from_config(&config)?);
    let server = BingoServer::new(bingo, socket_path).with_metrics_interval(config.server.metrics_interval());
    server.run().await?;

    Ok(())
}
