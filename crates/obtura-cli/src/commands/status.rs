//! Print a deployment's current status, strategy phase, and containers.

use anyhow::Context;

use obtura_core::ResourceId;
use obtura_db::repo::{ContainerRepo, DeploymentRepo, StrategyRepo};

use crate::context::connect;

pub async fn status(deployment_id: ResourceId) -> anyhow::Result<()> {
    let ctx = connect().await.context("failed to connect to backing services")?;

    let deployment = ctx.deployments.get(deployment_id).await?;
    println!(
        "deployment {} [{}] strategy={} environment={} image={}",
        deployment.id, deployment.status, deployment.strategy, deployment.environment, deployment.image_tag
    );
    if let Some(err) = &deployment.error_message {
        println!("  error: {err}");
    }

    match ctx.strategy_state.get(deployment_id).await {
        Ok(state) => {
            println!(
                "  phase={} active_group={:?} standby_group={:?} healthy={}/{}",
                state.current_phase, state.active_group, state.standby_group, state.healthy_replicas, state.total_replicas
            );
        }
        Err(e) => println!("  no strategy state yet ({e})"),
    }

    let containers = ctx.containers.list_by_deployment(deployment_id).await?;
    println!("  containers ({}):", containers.len());
    for c in &containers {
        println!(
            "    {} group={} status={:?} health={:?} active={} primary={} port={}",
            c.name, c.group, c.status, c.health_status, c.is_active, c.is_primary, c.host_port
        );
    }

    Ok(())
}
