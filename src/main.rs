//! Trackwall daemon - entry point.
//!
//! Loads the configuration, assembles a daemon and runs it until a
//! shutdown signal arrives. All startup failures exit with code 1;
//! privilege-drop failures are reserved for code 2 by the supervisor.

use std::process::ExitCode;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use trackwall::{Config, Daemon};

const DEFAULT_CONFIG_PATH: &str = "/etc/trackwall/config";

fn init_tracing(color: bool) {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_ansi(color)
        .init();
}

async fn run() -> anyhow::Result<()> {
    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config =
        Config::load(&path).with_context(|| format!("failed to load configuration from {path}"))?;

    init_tracing(config.color);
    tracing::info!(config = %path, version = env!("CARGO_PKG_VERSION"), "trackwall starting");

    let daemon = Daemon::new(config).context("failed to assemble daemon")?;
    daemon.run().await.context("daemon failed")?;

    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("trackwall: {err:#}");
            ExitCode::from(1)
        }
    }
}
