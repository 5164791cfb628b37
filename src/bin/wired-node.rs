//! Edge node: control plane client plus edge proxy.
//!
//! Usage: `wired-node [config.toml]`. A missing config file is created with
//! defaults, including a freshly generated node key, so the key survives
//! restarts. Exits non-zero once the master stays unreachable.

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};

use wired::config::VERSION;
use wired::utils::logging::init_logging;
use wired::utils::metrics::{global_metrics, init_metrics};
use wired::{EdgeProxy, MasterLink, NodeClient, PlayerRegistry, Result, RouteTable, WiredConfig};

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Node stopped");
            eprintln!("wired-node: {e}");
            ExitCode::FAILURE
        }
    }
}

fn load_config(path: Option<String>) -> Result<WiredConfig> {
    let Some(path) = path else {
        return Ok(WiredConfig::default());
    };
    if Path::new(&path).exists() {
        return WiredConfig::from_file(&path);
    }
    let config = WiredConfig::default();
    config.save_to_file(&path)?;
    eprintln!("wired-node: wrote default configuration to {path}");
    Ok(config)
}

async fn run() -> Result<()> {
    let mut config = load_config(std::env::args().nth(1))?;
    config.apply_env();

    init_logging(&config.logging)?;
    init_metrics();

    let mut problems = config.node.validate();
    problems.extend(config.proxy.validate());
    if !problems.is_empty() {
        return Err(wired::ProtocolError::ConfigError(problems.join("; ")));
    }

    info!(version = VERSION, node = %config.node.key, "Starting wired node");

    let routes = Arc::new(RouteTable::default());
    let players = Arc::new(PlayerRegistry::new());
    let link = Arc::new(MasterLink::new());

    let proxy = Arc::new(EdgeProxy::new(
        config.proxy.clone(),
        config.node.key.clone(),
        routes.clone(),
        players.clone(),
        link.clone(),
    ));
    let client = NodeClient::new(config.node, routes, players, link);

    let result = tokio::select! {
        result = proxy.run() => result,
        result = client.run() => result,
        signal = tokio::signal::ctrl_c() => match signal {
            Ok(()) => {
                info!("Received CTRL+C signal, shutting down");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for CTRL+C");
                Err(e.into())
            }
        }
    };
    global_metrics().log_metrics();
    result
}
