//! Manually trigger a deployment, bypassing the bus -- useful for local
//! ops and for exercising the orchestrator directly in tests.

use std::collections::HashMap;

use anyhow::Context;

use obtura_core::deployment::{Environment, Strategy};
use obtura_core::job::Job;
use obtura_core::ResourceId;
use obtura_db::repo::DeploymentRepo;

use crate::context::connect;

#[allow(clippy::too_many_arguments)]
pub async fn trigger(
    project_id: ResourceId,
    environment: Environment,
    image_tag: &str,
    strategy: Strategy,
    replicas: u32,
    domain: Option<&str>,
    subdomain: Option<&str>,
) -> anyhow::Result<()> {
    let ctx = connect().await.context("failed to connect to backing services")?;

    let replica_count = obtura_core::deployment::Deployment::normalize_replica_count(replicas);
    let approval_required = environment.requires_approval();

    let deployment = ctx
        .deployments
        .create(
            project_id,
            environment,
            image_tag,
            strategy,
            replica_count,
            domain,
            subdomain,
            None,
            approval_required,
        )
        .await
        .context("failed to create deployment row")?;

    println!("created deployment {} ({environment}, {strategy})", deployment.id);

    let job = Job {
        project_id,
        build_id: ResourceId::new(),
        image_tag: image_tag.to_string(),
        deployment_id: deployment.id,
        environment,
        strategy,
        replica_count,
        domain: domain.map(str::to_string),
        subdomain: subdomain.map(str::to_string),
        config: HashMap::new(),
        build_metadata: serde_json::json!({}),
    };

    match ctx.deployer.deploy(job).await {
        Ok(()) => {
            println!("deployment {} is active", deployment.id);
            Ok(())
        }
        Err(e) => {
            println!("deployment {} failed: {e}", deployment.id);
            Err(e.into())
        }
    }
}
