//! Rolling update: replaces the running group one batch at a time so a
//! fraction of capacity is always serving traffic. Falls back to a
//! blue/green cutover when there is no existing live group to roll against.

use std::time::Duration;

use futures::future::join_all;

use obtura_core::ResourceId;
use obtura_core::container::{Container, ContainerStatus};
use obtura_core::job::Job;
use obtura_core::runtime::RuntimeHandle;
use obtura_core::sandbox::SandboxProfile;
use obtura_core::strategy::{Group, Phase};
use obtura_core::Result;

use super::blue_green;
use super::StrategyCtx;
use crate::cleanup::CleanupScope;
use crate::health::{cancellable_sleep, wait_until_healthy};
use crate::provision::build_route_rule;
use crate::replica::provision_replica;

const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(60);
const DRAIN_SLEEP: Duration = Duration::from_secs(10);
const BATCH_SIZE: i32 = 1;

pub async fn run(ctx: &StrategyCtx<'_>, job: &Job, sandbox: &SandboxProfile, cleanup: &mut CleanupScope) -> Result<()> {
    let prior_deployment = ctx.deployments.list_prior_active(job.deployment_id).await?.into_iter().next();
    let Some(prior) = prior_deployment else {
        return blue_green::run(ctx, job, sandbox, cleanup).await;
    };

    let mut old_containers = ctx.containers.list_by_deployment(prior.id).await?;
    old_containers.retain(|c| c.is_active);
    if old_containers.is_empty() {
        return blue_green::run(ctx, job, sandbox, cleanup).await;
    }

    let total_batches = (job.replica_count as f64 / BATCH_SIZE as f64).ceil() as i32;
    ctx.strategy_state.transition_phase(job.deployment_id, Phase::DeployingNew).await?;

    let mut replica_index = 0i32;
    let mut retired: Vec<Container> = Vec::new();
    let mut cumulative_new_ids: Vec<ResourceId> = Vec::new();

    for batch in 0..total_batches {
        if ctx.cancellation.is_cancelled() {
            return Err(obtura_core::Error::Cancelled);
        }
        let batch_count = BATCH_SIZE.min(job.replica_count as i32 - replica_index);

        let mut new_batch = Vec::with_capacity(batch_count as usize);
        for _ in 0..batch_count {
            let replica = provision_replica(ctx.runtime, ctx.containers, &ctx.config.ports, job, sandbox, Group::Stable, replica_index, cleanup).await?;
            new_batch.push(replica);
            replica_index += 1;
        }

        ctx.strategy_state.transition_phase(job.deployment_id, Phase::HealthChecking).await?;
        let checks = new_batch.iter().map(|(container, handle)| {
            wait_until_healthy(ctx.runtime, ctx.containers, container.id, handle, HEALTH_CHECK_TIMEOUT, &ctx.cancellation)
        });
        for result in join_all(checks).await {
            result?;
        }

        for (c, _) in &new_batch {
            ctx.containers.mark_active(c.id, true).await?;
            ctx.router.program(&build_route_rule(&c.name, job, c.host_port)).map_err(|e| obtura_core::Error::Runtime(e.to_string()))?;
            cleanup.record_router_rule(c.name.clone());
        }

        let new_ids: Vec<ResourceId> = new_batch.iter().map(|(c, _)| c.id).collect();
        cumulative_new_ids.extend(new_ids.iter().copied());
        let traffic_percentage = ((100 * (batch + 1)) / total_batches) as u8;
        ctx.routing.deactivate_all(job.deployment_id).await?;
        ctx.routing.insert_row(job.deployment_id, Group::Stable, traffic_percentage, &cumulative_new_ids).await?;
        ctx.strategy_state.update_rolling_progress(job.deployment_id, batch + 1, new_ids.len() as i32, 0).await?;

        ctx.strategy_state.transition_phase(job.deployment_id, Phase::DrainingOld).await?;
        cancellable_sleep(DRAIN_SLEEP, &ctx.cancellation).await?;

        let to_retire: Vec<Container> = old_containers.drain(..batch_count.min(old_containers.len() as i32) as usize).collect();
        for c in &to_retire {
            let handle = RuntimeHandle {
                runtime_id: c.runtime_id.clone(),
                name: c.name.clone(),
            };
            let _ = ctx.runtime.stop(&handle, Duration::from_secs(30)).await;
            let _ = ctx.runtime.remove(&handle, true).await;
            ctx.containers.update_status(c.id, ContainerStatus::Stopped).await?;
            ctx.containers.mark_active(c.id, false).await?;
            ctx.router.remove(&c.name).map_err(|e| obtura_core::Error::Runtime(e.to_string()))?;
        }
        retired.extend(to_retire);

        ctx.strategy_state.transition_phase(job.deployment_id, Phase::HealthChecking).await?;
    }

    ctx.routing.deactivate_all(job.deployment_id).await?;
    let all_new: Vec<ResourceId> = ctx.containers.list_by_group(job.deployment_id, Group::Stable).await?.into_iter().map(|c| c.id).collect();
    ctx.routing.insert_row(job.deployment_id, Group::Stable, 100, &all_new).await?;
    ctx.strategy_state.set_groups(job.deployment_id, Group::Stable, Group::Stable).await?;

    ctx.strategy_state.transition_phase(job.deployment_id, Phase::Completed).await?;
    ctx.deployments.mark_active(job.deployment_id).await?;
    ctx.deployments.update_status(prior.id, obtura_core::deployment::DeploymentStatus::Terminated, None).await?;

    Ok(())
}
