//! Fleet master.
//!
//! Usage: `wired-master [config.toml]`. Without a path the defaults are used,
//! with `WIRED_*` environment overrides.

use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

use wired::config::VERSION;
use wired::utils::logging::init_logging;
use wired::utils::metrics::init_metrics;
use wired::{Master, Result, WiredConfig};

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Master stopped");
            eprintln!("wired-master: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<()> {
    let mut config = match std::env::args().nth(1) {
        Some(path) => WiredConfig::from_file(path)?,
        None => WiredConfig::default(),
    };
    config.apply_env();

    init_logging(&config.logging)?;
    init_metrics();

    let problems = config.master.validate();
    if !problems.is_empty() {
        return Err(wired::ProtocolError::ConfigError(problems.join("; ")));
    }

    info!(version = VERSION, routes = config.master.routes.len(), "Starting wired master");
    let master = Arc::new(Master::from_config(config.master)?);
    master.run().await
}
