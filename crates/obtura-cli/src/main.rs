//! `obtura`: operator CLI for the deployment core. Talks directly to the
//! same Postgres/Redis/Docker/router collaborators the `obtura-deployer`
//! consumer uses -- there is no HTTP API in front of this crate, by
//! design, since it's meant for local ops and exercising the orchestrator
//! outside of the message bus.

mod commands;
mod context;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use obtura_core::deployment::{Environment, Strategy};
use obtura_core::ResourceId;

#[derive(Parser)]
#[command(name = "obtura")]
#[command(about = "Obtura deployment core operator CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Trigger a deployment directly, bypassing the deploy exchange.
    Deploy {
        #[arg(long)]
        project: uuid::Uuid,
        #[arg(long)]
        environment: String,
        #[arg(long)]
        image: String,
        #[arg(long, default_value = "blue_green")]
        strategy: String,
        #[arg(long, default_value = "1")]
        replicas: u32,
        #[arg(long)]
        domain: Option<String>,
        #[arg(long)]
        subdomain: Option<String>,
    },
    /// Roll a deployment back to an earlier one.
    Rollback {
        deployment_id: uuid::Uuid,
        target_deployment_id: uuid::Uuid,
        #[arg(long, default_value = "manual rollback via CLI")]
        reason: String,
    },
    /// Show a deployment's current status, strategy phase, and containers.
    Status { deployment_id: uuid::Uuid },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Deploy {
            project,
            environment,
            image,
            strategy,
            replicas,
            domain,
            subdomain,
        } => {
            let environment: Environment = environment.parse().map_err(anyhow::Error::msg)?;
            let strategy: Strategy = strategy.parse().map_err(anyhow::Error::msg)?;
            commands::trigger(
                ResourceId::from(project),
                environment,
                &image,
                strategy,
                replicas,
                domain.as_deref(),
                subdomain.as_deref(),
            )
            .await?;
        }
        Commands::Rollback {
            deployment_id,
            target_deployment_id,
            reason,
        } => {
            commands::rollback(ResourceId::from(deployment_id), ResourceId::from(target_deployment_id), &reason).await?;
        }
        Commands::Status { deployment_id } => {
            commands::status(ResourceId::from(deployment_id)).await?;
        }
    }

    Ok(())
}
