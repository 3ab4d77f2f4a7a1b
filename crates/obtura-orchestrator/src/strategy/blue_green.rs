//! Blue/green deploy: stand up a full replacement group, health-check it,
//! atomically flip traffic, then drain the group it replaced.

use std::time::Duration;

use futures::future::join_all;

use obtura_core::ResourceId;
use obtura_core::container::ContainerStatus;
use obtura_core::deployment::DeploymentStatus;
use obtura_core::job::Job;
use obtura_core::runtime::RuntimeHandle;
use obtura_core::sandbox::SandboxProfile;
use obtura_core::strategy::{Group, Phase};
use obtura_core::Result;

use super::StrategyCtx;
use crate::cleanup::CleanupScope;
use crate::health::{cancellable_sleep, wait_until_healthy};
use crate::provision::build_route_rule;
use crate::replica::provision_replica;

const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(120);
const DRAIN_SLEEP: Duration = Duration::from_secs(5);

pub async fn run(ctx: &StrategyCtx<'_>, job: &Job, sandbox: &SandboxProfile, cleanup: &mut CleanupScope) -> Result<()> {
    if ctx.cancellation.is_cancelled() {
        return Err(obtura_core::Error::Cancelled);
    }
    let prior_deployment = ctx.deployments.list_prior_active(job.deployment_id).await?.into_iter().next();

    // When there is no prior deployment for this (project, environment)
    // there is no group to oppose -- the first deployment always lands on
    // `blue`. Otherwise the new group is whichever group the prior
    // deployment's active containers are *not* in.
    let (active_group, new_group) = match &prior_deployment {
        Some(p) => {
            let prior_containers = ctx.containers.list_by_deployment(p.id).await?;
            let active = prior_containers.iter().find(|c| c.is_active).map(|c| c.group).unwrap_or(Group::Blue);
            (active, active.opposite())
        }
        None => (Group::Green, Group::Blue),
    };

    ctx.strategy_state.transition_phase(job.deployment_id, Phase::DeployingNew).await?;
    ctx.strategy_state.set_groups(job.deployment_id, active_group, new_group).await?;

    let mut new_replicas = Vec::with_capacity(job.replica_count as usize);
    for i in 0..job.replica_count as i32 {
        let replica = provision_replica(ctx.runtime, ctx.containers, &ctx.config.ports, job, sandbox, new_group, i, cleanup).await?;
        new_replicas.push(replica);
    }

    ctx.strategy_state.transition_phase(job.deployment_id, Phase::HealthChecking).await?;
    let checks = new_replicas.iter().map(|(container, handle)| {
        wait_until_healthy(ctx.runtime, ctx.containers, container.id, handle, HEALTH_CHECK_TIMEOUT, &ctx.cancellation)
    });
    for result in join_all(checks).await {
        result?;
    }

    ctx.strategy_state.transition_phase(job.deployment_id, Phase::SwitchingTraffic).await?;
    ctx.routing.deactivate_all(job.deployment_id).await?;

    let old_containers = match &prior_deployment {
        Some(p) => ctx.containers.list_by_group(p.id, active_group).await?,
        None => Vec::new(),
    };
    for c in &old_containers {
        ctx.containers.mark_active(c.id, false).await?;
        ctx.containers.clear_primary(c.id).await?;
    }

    let new_ids: Vec<ResourceId> = new_replicas.iter().map(|(c, _)| c.id).collect();
    for (c, _) in &new_replicas {
        ctx.containers.mark_active(c.id, true).await?;
    }
    if let Some((primary, _)) = new_replicas.first() {
        ctx.containers.mark_primary(job.deployment_id, primary.id).await?;
    }
    ctx.routing.insert_row(job.deployment_id, new_group, 100, &new_ids).await?;
    ctx.strategy_state.set_groups(job.deployment_id, new_group, active_group).await?;

    for (c, _) in &new_replicas {
        ctx.router.program(&build_route_rule(&c.name, job, c.host_port)).map_err(|e| obtura_core::Error::Runtime(e.to_string()))?;
        cleanup.record_router_rule(c.name.clone());
    }
    for c in &old_containers {
        ctx.router.remove(&c.name).map_err(|e| obtura_core::Error::Runtime(e.to_string()))?;
    }

    if let Some(p) = &prior_deployment {
        ctx.strategy_state.transition_phase(job.deployment_id, Phase::DrainingOld).await?;
        cancellable_sleep(DRAIN_SLEEP, &ctx.cancellation).await?;

        for c in &old_containers {
            let handle = RuntimeHandle {
                runtime_id: c.runtime_id.clone(),
                name: c.name.clone(),
            };
            let _ = ctx.runtime.stop(&handle, Duration::from_secs(30)).await;
            let _ = ctx.runtime.remove(&handle, true).await;
            ctx.containers.update_status(c.id, ContainerStatus::Stopped).await?;
        }

        ctx.deployments.update_status(p.id, DeploymentStatus::Terminated, None).await?;
    }

    ctx.strategy_state.transition_phase(job.deployment_id, Phase::Completed).await?;
    ctx.deployments.mark_active(job.deployment_id).await?;

    Ok(())
}
