//! Manually roll a deployment back to an earlier one.

use anyhow::Context;

use obtura_core::ResourceId;

use crate::context::connect;

pub async fn rollback(deployment_id: ResourceId, target_deployment_id: ResourceId, reason: &str) -> anyhow::Result<()> {
    let ctx = connect().await.context("failed to connect to backing services")?;

    ctx.deployer
        .rollback(deployment_id, target_deployment_id, reason, None)
        .await?;

    println!("rolled {deployment_id} back to {target_deployment_id}");
    Ok(())
}
