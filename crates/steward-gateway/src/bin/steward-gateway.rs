//! Standalone gateway binary

use clap::Parser;
use steward_gateway::{Gateway, GatewayConfig, GatewayState};

#[derive(Parser)]
#[command(name = "steward-gateway", about = "Steward decision-engine gateway")]
struct Args {
    /// Path to a TOML configuration file
    #[arg(long)]
    config: Option<std::path::PathBuf>,

    /// Listen host override
    #[arg(long)]
    host: Option<String>,

    /// Listen port override
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "steward_gateway=info,steward_core=info".into()),
        )
        .init();

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => GatewayConfig::from_file(path)?,
        None => GatewayConfig::default(),
    };
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }

    let gateway = Gateway::new(GatewayState::from_config(config)?);
    gateway.start().await?;
    Ok(())
}
