use std::sync::Arc;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use dropbridge::clock::TokioClock;
use dropbridge::config::Config;
use dropbridge::error::{DropBridgeError, Result};
use dropbridge::handlers;
use dropbridge::services::listener::Listener;
use dropbridge::services::routing::RequestRouter;

#[derive(Parser, Debug)]
#[command(name = "dropbridged")]
#[command(about = "Handler side of the dropbridge file-exchange bridge")]
struct Cli {
    #[arg(long, env = "DROPBRIDGE_CONFIG", default_value = "./dropbridge.json")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,dropbridge=info,suppaftp=warn"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    let cli = Cli::parse();

    let config = Config::from_file(&cli.config)?;
    let mut router = RequestRouter::new(Arc::new(TokioClock::new()));
    handlers::register_defaults(&mut router);
    for route in router.list_routes() {
        info!(route = %route, "route registered");
    }

    let listener = Listener::from_config(config.handler()?, Arc::new(router))?;
    listener.start().await;
    shutdown_signal().await?;
    info!("shutting down, draining in-flight requests");
    listener.stop().await;
    Ok(())
}

#[cfg(unix)]
async fn shutdown_signal() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate =
        signal(SignalKind::terminate()).map_err(|e| DropBridgeError::Runtime(e.to_string()))?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result.map_err(|e| DropBridgeError::Runtime(e.to_string())),
        _ = terminate.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() -> Result<()> {
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| DropBridgeError::Runtime(e.to_string()))
}
