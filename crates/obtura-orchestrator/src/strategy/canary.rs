//! Canary strategy engine: stands up a single canary replica, shifts a
//! small slice of traffic to it, watches its metrics for a monitoring
//! window, then promotes or rolls it back based on the analysis verdict.

use std::time::Duration;

use obtura_core::ResourceId;
use obtura_core::job::Job;
use obtura_core::runtime::RuntimeHandle;
use obtura_core::sandbox::SandboxProfile;
use obtura_core::strategy::{Group, Phase};
use obtura_core::{Error, Result};

use super::StrategyCtx;
use crate::canary::{analyze, CanaryDecision};
use crate::cleanup::CleanupScope;
use crate::health::{cancellable_sleep, wait_until_healthy};
use crate::provision::build_route_rule;
use crate::replica::provision_replica;

const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(60);
const CANARY_TRAFFIC_PERCENTAGE: i32 = 10;

pub async fn run(ctx: &StrategyCtx<'_>, job: &Job, sandbox: &SandboxProfile, cleanup: &mut CleanupScope) -> Result<()> {
    ctx.strategy_state.transition_phase(job.deployment_id, Phase::DeployingNew).await?;

    let (canary, handle) = provision_replica(ctx.runtime, ctx.containers, &ctx.config.ports, job, sandbox, Group::Canary, 0, cleanup).await?;

    ctx.strategy_state.transition_phase(job.deployment_id, Phase::HealthChecking).await?;
    wait_until_healthy(ctx.runtime, ctx.containers, canary.id, &handle, HEALTH_CHECK_TIMEOUT, &ctx.cancellation).await?;

    ctx.containers.mark_active(canary.id, true).await?;
    ctx.router.program(&build_route_rule(&canary.name, job, canary.host_port)).map_err(|e| Error::Runtime(e.to_string()))?;
    cleanup.record_router_rule(canary.name.clone());

    let canary_ids: Vec<ResourceId> = vec![canary.id];
    ctx.routing.insert_row(job.deployment_id, Group::Canary, CANARY_TRAFFIC_PERCENTAGE as u8, &canary_ids).await?;
    ctx.strategy_state
        .update_canary_progress(job.deployment_id, CANARY_TRAFFIC_PERCENTAGE, 1, 0)
        .await?;

    ctx.strategy_state.transition_phase(job.deployment_id, Phase::Monitoring).await?;
    let monitoring_started_at = chrono::Utc::now();
    let monitoring_duration = Duration::from_secs(60 * ctx.config.canary.monitoring_duration_minutes as u64);
    cancellable_sleep(monitoring_duration, &ctx.cancellation).await?;

    let verdict = analyze(ctx.metrics.as_ref(), canary.id, monitoring_started_at, &ctx.config.canary).await?;
    ctx.canary_analysis
        .record(
            job.deployment_id,
            verdict.metrics.error_rate_percent,
            verdict.metrics.avg_latency_ms,
            verdict.metrics.sample_count,
            verdict.decision == CanaryDecision::Promote,
        )
        .await?;

    match verdict.decision {
        CanaryDecision::Promote => {
            ctx.strategy_state.transition_phase(job.deployment_id, Phase::SwitchingTraffic).await?;
            ctx.containers.update_group(canary.id, Group::Stable).await?;
            ctx.routing.deactivate_all(job.deployment_id).await?;
            ctx.routing.insert_row(job.deployment_id, Group::Stable, 100, &canary_ids).await?;
            ctx.containers.mark_primary(job.deployment_id, canary.id).await?;
            ctx.strategy_state.set_groups(job.deployment_id, Group::Stable, Group::Stable).await?;

            ctx.strategy_state.transition_phase(job.deployment_id, Phase::Completed).await?;
            ctx.deployments.mark_active(job.deployment_id).await?;
            Ok(())
        }
        CanaryDecision::Rollback => {
            ctx.routing.deactivate_all(job.deployment_id).await?;
            ctx.router.remove(&canary.name).map_err(|e| Error::Runtime(e.to_string()))?;
            let handle = RuntimeHandle {
                runtime_id: canary.runtime_id.clone(),
                name: canary.name.clone(),
            };
            let _ = ctx.runtime.stop(&handle, Duration::from_secs(30)).await;
            let _ = ctx.runtime.remove(&handle, true).await;
            ctx.containers.update_status(canary.id, obtura_core::container::ContainerStatus::Failed).await?;

            ctx.strategy_state.transition_phase(job.deployment_id, Phase::Failed).await?;
            Err(Error::DeploymentFailed(format!(
                "canary did not meet thresholds: error_rate={:.2}% avg_latency={:.0}ms",
                verdict.metrics.error_rate_percent, verdict.metrics.avg_latency_ms
            )))
        }
    }
}
