use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use dropbridge::client::BridgeClient;
use dropbridge::config::Config;
use dropbridge::domains::envelope::Envelope;
use dropbridge::error::{DropBridgeError, Result};
use dropbridge::gateway;

#[derive(Parser, Debug)]
#[command(name = "dropbridge")]
#[command(about = "Caller side of the dropbridge file-exchange bridge")]
struct Cli {
    #[arg(long, env = "DROPBRIDGE_CONFIG", default_value = "./dropbridge.json")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Send one request and print the response envelope.
    Call {
        #[arg(long, default_value = "GET")]
        method: String,
        #[arg(long)]
        path: String,
        /// JSON request body.
        #[arg(long)]
        body: Option<String>,
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
    /// Serve the HTTP gateway until Ctrl-C.
    Gateway {
        #[arg(long)]
        listen: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,dropbridge=info,suppaftp=warn"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let config = Config::from_file(&cli.config)?;
    let mut caller = config.caller()?.clone();

    match cli.command {
        Commands::Call {
            method,
            path,
            body,
            timeout_ms,
        } => {
            if timeout_ms.is_some() {
                caller.timeout_ms = timeout_ms;
            }
            let client = BridgeClient::from_config(&caller)?;
            let mut envelope = Envelope::new(method, path);
            if let Some(body) = body {
                let body = serde_json::from_str(&body)
                    .map_err(|e| DropBridgeError::Protocol(format!("--body is not JSON: {e}")))?;
                envelope = envelope.with_body(body);
            }
            let response = client.call(envelope).await?;
            let rendered = serde_json::to_string_pretty(&response)
                .map_err(|e| DropBridgeError::Serialization(e.to_string()))?;
            println!("{rendered}");
        }
        Commands::Gateway { listen } => {
            let listen = listen.unwrap_or_else(|| config.gateway.clone().unwrap_or_default().listen());
            let client = Arc::new(BridgeClient::from_config(&caller)?);
            gateway::run_with_shutdown(&listen, client, async {
                let _ = tokio::signal::ctrl_c().await;
            })
            .await?;
        }
    }
    Ok(())
}
