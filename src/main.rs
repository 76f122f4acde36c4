//! credbind-controller - reconciles CredentialsBinding finalizers and markers

use clap::Parser;
use kube::Client;

use credbind::config::{ControllerConfig, LogFormat};
use credbind::controller::build_binding_controller;
use credbind::telemetry::init_tracing;

/// Keeps credential Secrets and Quotas marked while CredentialsBindings use them
#[derive(Parser, Debug)]
#[command(name = "credbind-controller", version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    controller: ControllerConfig,

    /// Log output format
    #[arg(long, env = "CREDBIND_LOG_FORMAT", value_enum, default_value_t = LogFormat::Json)]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.log_format)?;
    cli.controller.validate()?;

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    tracing::info!(config = ?cli.controller, "Starting CredentialsBinding controller");

    build_binding_controller(client, cli.controller).await;

    tracing::info!("Controller stopped");
    Ok(())
}
