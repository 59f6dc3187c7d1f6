//! pulseboard-server - HTTP API for the pulseboard dashboard
//!
//! Uses XDG Base Directory specification for file locations:
//! - Database: $XDG_DATA_HOME/pulseboard/pulseboard.db (~/.local/share/pulseboard/pulseboard.db)
//! - Logs: $XDG_STATE_HOME/pulseboard/pulseboard.log (~/.local/state/pulseboard/pulseboard.log)
//! - Config: $XDG_CONFIG_HOME/pulseboard/config.toml (~/.config/pulseboard/config.toml)

use anyhow::{bail, Context, Result};
use clap::Parser;
use pulseboard_core::{Config, DashboardContext};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "pulseboard-server")]
#[command(about = "Serve the pulseboard dashboard API")]
#[command(version)]
struct Args {
    /// Config file (defaults to the XDG config path)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bind address, overriding server.host
    #[arg(long)]
    host: Option<String>,

    /// Port, overriding server.port
    #[arg(short, long)]
    port: Option<u16>,
}

#[actix_web::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    Config::ensure_xdg_env();

    let config = match &args.config {
        Some(path) => Config::load_from(path)
            .with_context(|| format!("failed to load configuration from {}", path.display()))?,
        None => Config::load().context("failed to load configuration")?,
    };

    let problems = config.validate();
    if !problems.is_empty() {
        for problem in &problems {
            eprintln!("config: {}", problem);
        }
        bail!("invalid configuration ({} problem(s))", problems.len());
    }

    let _log_guard =
        pulseboard_core::logging::init(&config.logging).context("failed to initialize logging")?;

    let host = args.host.unwrap_or_else(|| config.server.host.clone());
    let port = args.port.unwrap_or(config.server.port);

    tracing::info!(
        database = %Config::database_path().display(),
        "pulseboard-server starting"
    );

    let ctx = DashboardContext::from_config(config).context("failed to build dashboard context")?;

    println!("Listening on http://{}:{}", host, port);
    pulseboard_server::run_server(ctx, &host, port)
        .await
        .with_context(|| format!("server failed on {}:{}", host, port))
}
