//! Steward operator CLI
//!
//! Serves the gateway, runs one-shot heartbeat sweeps, and performs
//! knowledge-store maintenance (rule decay, learning-data cleanup).

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use steward_gateway::{Gateway, GatewayConfig, GatewayState};

#[derive(Parser)]
#[command(name = "steward", about = "Steward property-management decision engine")]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP gateway
    Serve {
        /// Listen host override
        #[arg(long)]
        host: Option<String>,

        /// Listen port override
        #[arg(long)]
        port: Option<u16>,
    },

    /// Run one heartbeat sweep and print the summary
    Heartbeat {
        /// Sweep a single user instead of the whole portfolio
        #[arg(long)]
        user_id: Option<String>,
    },

    /// Decay stale rule confidence for one user
    Decay {
        /// User whose rules to decay
        #[arg(long)]
        user_id: String,

        /// Days without reinforcement before a rule decays
        #[arg(long, default_value_t = 30)]
        days: i64,

        /// Confidence removed per pass
        #[arg(long, default_value_t = 0.05)]
        amount: f32,
    },

    /// Prune learning data past the retention window
    Cleanup {
        /// Retention window in days
        #[arg(long, default_value_t = 180)]
        retention_days: i64,
    },
}

fn load_config(path: &Option<PathBuf>) -> anyhow::Result<GatewayConfig> {
    match path {
        Some(path) => GatewayConfig::from_file(path)
            .with_context(|| format!("loading config from {}", path.display())),
        None => Ok(GatewayConfig::default()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "steward=info,steward_core=info,steward_gateway=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let mut config = load_config(&cli.config)?;

    match cli.command {
        Commands::Serve { host, port } => {
            if let Some(host) = host {
                config.host = host;
            }
            if let Some(port) = port {
                config.port = port;
            }
            let gateway = Gateway::new(GatewayState::from_config(config)?);
            gateway.start().await?;
        }

        Commands::Heartbeat { user_id } => {
            let state = GatewayState::from_config(config.clone())?;
            let sweep = state.scanner.run(user_id.as_deref()).await?;
            let outcomes = state
                .tracker
                .run(config.heartbeat.decay_days, config.heartbeat.decay_amount)
                .await?;
            state.engine.recorder().shutdown().await;

            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "sweep": sweep,
                    "outcomes": outcomes,
                }))?
            );
        }

        Commands::Decay {
            user_id,
            days,
            amount,
        } => {
            let state = GatewayState::from_config(config)?;
            let decayed = state.tracker.decay_stale_rules(&user_id, days, amount)?;
            println!("{decayed} rules decayed for {user_id}");
        }

        Commands::Cleanup { retention_days } => {
            let state = GatewayState::from_config(config)?;
            let removed = state.tracker.cleanup(retention_days)?;
            println!("{removed} rows pruned (retention {retention_days} days)");
        }
    }

    Ok(())
}
