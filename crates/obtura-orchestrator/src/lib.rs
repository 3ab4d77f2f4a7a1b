//! Deployment core: wires the rate limiter, quota store, sandbox policy,
//! container runtime, edge router, and the three strategy engines together
//! behind two operations, `deploy` and `rollback`.

pub mod canary;
pub mod cleanup;
mod health;
mod port;
mod provision;
mod replica;
pub mod strategy;

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use obtura_cache::limiter::RateLimiter;
use obtura_core::ResourceId;
use obtura_core::container::ContainerStatus;
use obtura_core::dependency::detect_dependencies;
use obtura_core::deployment::{DeploymentStatus, Strategy};
use obtura_core::events::Severity;
use obtura_core::job::Job;
use obtura_core::metrics::MetricsProvider;
use obtura_core::quota::Quota;
use obtura_core::runtime::{ContainerRuntime, RuntimeHandle};
use obtura_core::sandbox::resolve_sandbox_profile;
use obtura_core::strategy::Phase;
use obtura_core::{Error, Result};

use obtura_config::SystemConfig;
use obtura_db::repo::{
    CanaryAnalysisRepo, ContainerRepo, DeploymentRepo, EventsRepo, QuotaRepo, RollbackRepo,
    RoutingRepo, StrategyRepo, TenantRepo,
};
use obtura_router::{FileRouterProgrammer, RouteRule};

use cleanup::CleanupScope;
use strategy::StrategyCtx;

/// Overall wall-clock budget for one `deploy` call (§5). A background task
/// cancels the ambient token once this elapses; every suspension point
/// longer than a single collaborator RPC observes the token cooperatively,
/// so the existing failure path (scoped cleanup, `failed` transition,
/// counter release) runs exactly as it would for any other error.
const JOB_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Everything a running instance of the deployment core needs, bundled so
/// the consumer binary only constructs one of these.
pub struct Deployer {
    runtime: Arc<dyn ContainerRuntime>,
    router: Arc<FileRouterProgrammer>,
    metrics: Arc<dyn MetricsProvider>,
    rate_limiter: Arc<dyn RateLimiter>,
    deployments: Arc<dyn DeploymentRepo>,
    strategy_state: Arc<dyn StrategyRepo>,
    containers: Arc<dyn ContainerRepo>,
    routing: Arc<dyn RoutingRepo>,
    events: Arc<dyn EventsRepo>,
    canary_analysis: Arc<dyn CanaryAnalysisRepo>,
    quota: Arc<dyn QuotaRepo>,
    tenants: Arc<dyn TenantRepo>,
    rollback_repo: Arc<dyn RollbackRepo>,
    config: SystemConfig,
}

#[allow(clippy::too_many_arguments)]
impl Deployer {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        router: Arc<FileRouterProgrammer>,
        metrics: Arc<dyn MetricsProvider>,
        rate_limiter: Arc<dyn RateLimiter>,
        deployments: Arc<dyn DeploymentRepo>,
        strategy_state: Arc<dyn StrategyRepo>,
        containers: Arc<dyn ContainerRepo>,
        routing: Arc<dyn RoutingRepo>,
        events: Arc<dyn EventsRepo>,
        canary_analysis: Arc<dyn CanaryAnalysisRepo>,
        quota: Arc<dyn QuotaRepo>,
        tenants: Arc<dyn TenantRepo>,
        rollback_repo: Arc<dyn RollbackRepo>,
        config: SystemConfig,
    ) -> Self {
        Self {
            runtime,
            router,
            metrics,
            rate_limiter,
            deployments,
            strategy_state,
            containers,
            routing,
            events,
            canary_analysis,
            quota,
            tenants,
            rollback_repo,
            config,
        }
    }

    /// Admits a job past the quota/rate-limiter gate, then drives it through
    /// the strategy engine matching `job.strategy`. Any failure unwinds
    /// whatever the engine created and leaves the deployment in `failed`.
    ///
    /// Uses a fresh, process-local cancellation handle bounded by
    /// `JOB_TIMEOUT`; callers that need to cancel earlier (e.g. consumer
    /// shutdown) should use `deploy_cancellable`.
    pub async fn deploy(&self, job: Job) -> Result<()> {
        self.deploy_cancellable(job, CancellationToken::new()).await
    }

    /// Same as `deploy`, but honors an externally-owned cancellation token
    /// in addition to the `JOB_TIMEOUT` ceiling -- whichever fires first
    /// aborts the in-flight phase.
    pub async fn deploy_cancellable(&self, job: Job, cancellation: CancellationToken) -> Result<()> {
        let timeout_guard = {
            let token = cancellation.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = tokio::time::sleep(JOB_TIMEOUT) => token.cancel(),
                    _ = token.cancelled() => {}
                }
            })
        };

        let outcome = self.deploy_inner(job, cancellation).await;
        timeout_guard.abort();
        outcome
    }

    async fn deploy_inner(&self, job: Job, cancellation: CancellationToken) -> Result<()> {
        let tenant_id = self.tenants.owning_tenant_id(job.project_id).await?;
        let quota = self.quota.resolve(tenant_id).await?;

        let slot = self
            .rate_limiter
            .try_acquire_concurrent(tenant_id, quota.max_concurrent_deployments)
            .await?;

        if let Err(e) = self
            .rate_limiter
            .check_and_increment_monthly(tenant_id, quota.max_deployments_per_month)
            .await
        {
            if let Err(release_err) = self.rate_limiter.release_concurrent(slot).await {
                warn!(error = %release_err, "failed to release concurrent slot after monthly quota rejection");
            }
            return Err(e);
        }

        let outcome = self.run_deploy(&job, &quota, cancellation).await;

        if let Err(e) = self.rate_limiter.release_concurrent(slot).await {
            warn!(error = %e, "failed to release concurrent deployment slot");
        }

        outcome
    }

    async fn run_deploy(&self, job: &Job, quota: &Quota, cancellation: CancellationToken) -> Result<()> {
        if cancellation.is_cancelled() {
            return Err(Error::Cancelled);
        }

        self.strategy_state
            .init(job.deployment_id, job.strategy, job.replica_count as i32, None)
            .await?;

        let dependencies = detect_dependencies(&job.build_metadata);
        self.deployments
            .record_detected_dependencies(job.deployment_id, &dependencies)
            .await?;
        self.deployments.mark_deploying(job.deployment_id).await?;

        let sandbox = resolve_sandbox_profile(quota.tier, job.environment, &job.project_id.to_string(), &self.config.sandbox);
        let mut cleanup = CleanupScope::new();

        let ctx = StrategyCtx {
            runtime: &self.runtime,
            router: &self.router,
            metrics: &self.metrics,
            deployments: self.deployments.as_ref(),
            strategy_state: self.strategy_state.as_ref(),
            containers: self.containers.as_ref(),
            routing: self.routing.as_ref(),
            events: self.events.as_ref(),
            canary_analysis: self.canary_analysis.as_ref(),
            config: &self.config,
            cancellation,
        };

        let outcome = match job.strategy {
            Strategy::BlueGreen => strategy::blue_green::run(&ctx, job, &sandbox, &mut cleanup).await,
            Strategy::Rolling => strategy::rolling::run(&ctx, job, &sandbox, &mut cleanup).await,
            Strategy::Canary => strategy::canary::run(&ctx, job, &sandbox, &mut cleanup).await,
        };

        if let Err(e) = &outcome {
            error!(deployment_id = %job.deployment_id, error = %e, "deployment failed, unwinding side effects");
            cleanup.unwind(&self.runtime, &self.router, self.containers.as_ref()).await;

            if let Ok(state) = self.strategy_state.get(job.deployment_id).await {
                if !state.current_phase.is_terminal() {
                    let _ = self.strategy_state.transition_phase(job.deployment_id, Phase::Failed).await;
                }
            }

            self.deployments
                .update_status(job.deployment_id, DeploymentStatus::Failed, Some(&e.to_string()))
                .await?;
            self.events
                .append_event(job.deployment_id, "deployment_failed", &e.to_string(), Severity::Critical)
                .await?;
        }

        outcome
    }

    /// Reverts `deployment_id` to `target_deployment_id`: tears down the
    /// currently active containers, restarts the target's, and flips the
    /// active pointer back.
    pub async fn rollback(
        &self,
        deployment_id: ResourceId,
        target_deployment_id: ResourceId,
        reason: &str,
        initiated_by: Option<ResourceId>,
    ) -> Result<()> {
        let current = self.deployments.get(deployment_id).await?;
        if !current.status.can_transition_to(DeploymentStatus::RolledBack) {
            return Err(Error::InvalidInput(format!(
                "deployment {deployment_id} cannot transition from {:?} to rolled_back",
                current.status
            )));
        }
        let target = self.deployments.get(target_deployment_id).await?;

        self.rollback_repo
            .record(deployment_id, target_deployment_id, reason, initiated_by)
            .await?;

        self.routing.deactivate_all(deployment_id).await?;
        self.routing.deactivate_all(target_deployment_id).await?;

        let current_containers = self.containers.list_by_deployment(deployment_id).await?;
        for c in current_containers.iter().filter(|c| c.is_active) {
            let handle = RuntimeHandle {
                runtime_id: c.runtime_id.clone(),
                name: c.name.clone(),
            };
            let _ = self.runtime.stop(&handle, Duration::from_secs(30)).await;
            let _ = self.runtime.remove(&handle, true).await;
            self.containers.update_status(c.id, ContainerStatus::Stopped).await?;
            self.containers.mark_active(c.id, false).await?;
            if let Err(e) = self.router.remove(&c.name) {
                warn!(error = %e, container = %c.name, "failed to remove router rule during rollback");
            }
        }

        let fqdn = match (&target.subdomain, &target.domain) {
            (Some(sub), Some(domain)) => format!("{sub}.{domain}"),
            (None, Some(domain)) => domain.clone(),
            _ => format!("{}.obtura.internal", target.project_id),
        };

        let target_containers = self.containers.list_by_deployment(target_deployment_id).await?;
        for c in &target_containers {
            let handle = RuntimeHandle {
                runtime_id: c.runtime_id.clone(),
                name: c.name.clone(),
            };
            self.runtime.start(&handle).await?;
            self.containers.mark_active(c.id, true).await?;
            self.router
                .program(&RouteRule {
                    container_name: c.name.clone(),
                    fqdn: fqdn.clone(),
                    backend_host: "127.0.0.1".to_string(),
                    backend_port: c.host_port,
                    health_check_path: "/health".to_string(),
                })
                .map_err(|e| Error::Runtime(e.to_string()))?;
        }

        if let Some(primary) = target_containers.first() {
            self.containers.mark_primary(target_deployment_id, primary.id).await?;
        }
        let target_ids: Vec<ResourceId> = target_containers.iter().map(|c| c.id).collect();
        if let Some(first) = target_containers.first() {
            self.routing
                .insert_row(target_deployment_id, first.group, 100, &target_ids)
                .await?;
        }

        self.deployments
            .update_status(deployment_id, DeploymentStatus::RolledBack, Some(reason))
            .await?;
        self.deployments.mark_active(target_deployment_id).await?;
        self.deployments
            .record_rollback_target(deployment_id, target_deployment_id)
            .await?;

        self.events
            .append_event(
                deployment_id,
                "rollback",
                &format!("rolled back to {target_deployment_id}: {reason}"),
                Severity::Warning,
            )
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use uuid::Uuid;

    use obtura_cache::limiter::{ConcurrentSlot, RateLimiter};
    use obtura_core::dependency::DetectedDependency;
    use obtura_core::deployment::{Deployment, Environment};
    use obtura_core::quota::Quota;
    use obtura_core::routing::TrafficRoutingRow;
    use obtura_core::runtime::{ContainerConfig, Inspection, RuntimeHealth, RuntimeState};
    use obtura_core::strategy::{Group, PhaseTransition, StrategyState};
    use obtura_db::repo::{CanaryAnalysisResult, RollbackRecord};
    use obtura_db::{DbError, DbResult};

    /// Shared in-memory stand-in for every collaborator table `Deployer`
    /// talks to. The thin wrapper types below each borrow an `Arc<World>`
    /// and implement exactly one repo trait against it, the way the real
    /// `Pg*Repo` types each wrap the same connection pool.
    #[derive(Default)]
    struct World {
        deployments: Mutex<HashMap<Uuid, Deployment>>,
        strategy_states: Mutex<HashMap<Uuid, StrategyState>>,
        transitions: Mutex<HashMap<Uuid, Vec<PhaseTransition>>>,
        containers: Mutex<HashMap<Uuid, obtura_core::container::Container>>,
        routing: Mutex<HashMap<Uuid, TrafficRoutingRow>>,
        rollbacks: Mutex<Vec<RollbackRecord>>,
        next_runtime_id: Mutex<u64>,
    }

    struct FakeRuntime(Arc<World>);

    #[async_trait]
    impl ContainerRuntime for FakeRuntime {
        async fn ensure_image(&self, _tag: &str) -> Result<()> {
            Ok(())
        }

        async fn ensure_network(&self, _name: &str) -> Result<()> {
            Ok(())
        }

        async fn create(&self, config: ContainerConfig) -> Result<RuntimeHandle> {
            let mut next = self.0.next_runtime_id.lock().unwrap();
            *next += 1;
            Ok(RuntimeHandle {
                runtime_id: format!("fake-runtime-{next}"),
                name: config.name,
            })
        }

        async fn start(&self, _handle: &RuntimeHandle) -> Result<()> {
            Ok(())
        }

        async fn inspect(&self, _handle: &RuntimeHandle) -> Result<Inspection> {
            Ok(Inspection {
                state: RuntimeState::Running,
                health: RuntimeHealth::Healthy,
                exit_code: None,
            })
        }

        async fn stop(&self, _handle: &RuntimeHandle, _timeout: Duration) -> Result<()> {
            Ok(())
        }

        async fn remove(&self, _handle: &RuntimeHandle, _force: bool) -> Result<()> {
            Ok(())
        }
    }

    struct FakeMetrics;

    #[async_trait]
    impl MetricsProvider for FakeMetrics {
        async fn window_metrics(
            &self,
            _container_id: ResourceId,
            _since: chrono::DateTime<chrono::Utc>,
        ) -> Result<obtura_core::metrics::WindowMetrics> {
            unimplemented!("not exercised by the blue/green or rollback happy paths")
        }
    }

    struct FakeRateLimiter;

    #[async_trait]
    impl RateLimiter for FakeRateLimiter {
        async fn try_acquire_concurrent(&self, tenant_id: ResourceId, _max: i64) -> Result<ConcurrentSlot> {
            Ok(ConcurrentSlot::new(tenant_id))
        }

        async fn release_concurrent(&self, _slot: ConcurrentSlot) -> Result<()> {
            Ok(())
        }

        async fn check_and_increment_monthly(&self, _tenant_id: ResourceId, _max: i64) -> Result<()> {
            Ok(())
        }

        async fn reconcile_concurrent(&self, _tenant_id: ResourceId, _actual_in_flight: i64) -> Result<()> {
            unimplemented!("not exercised by the blue/green or rollback happy paths")
        }
    }

    struct FakeDeployments(Arc<World>);

    #[async_trait]
    impl DeploymentRepo for FakeDeployments {
        async fn create(
            &self,
            _project_id: ResourceId,
            _environment: Environment,
            _image_tag: &str,
            _strategy: Strategy,
            _replica_count: u32,
            _domain: Option<&str>,
            _subdomain: Option<&str>,
            _triggered_by: Option<ResourceId>,
            _approval_required: bool,
        ) -> DbResult<Deployment> {
            unimplemented!("tests seed deployment rows directly into World")
        }

        async fn get(&self, id: ResourceId) -> DbResult<Deployment> {
            self.0
                .deployments
                .lock()
                .unwrap()
                .get(id.as_uuid())
                .cloned()
                .ok_or_else(|| DbError::NotFound(id.to_string()))
        }

        async fn record_detected_dependencies(
            &self,
            id: ResourceId,
            dependencies: &[DetectedDependency],
        ) -> DbResult<()> {
            let mut g = self.0.deployments.lock().unwrap();
            let d = g.get_mut(id.as_uuid()).ok_or_else(|| DbError::NotFound(id.to_string()))?;
            d.detected_dependencies = dependencies.to_vec();
            Ok(())
        }

        async fn update_status(
            &self,
            id: ResourceId,
            status: DeploymentStatus,
            error_message: Option<&str>,
        ) -> DbResult<()> {
            let mut g = self.0.deployments.lock().unwrap();
            let d = g.get_mut(id.as_uuid()).ok_or_else(|| DbError::NotFound(id.to_string()))?;
            d.status = status;
            d.error_message = error_message.map(String::from);
            Ok(())
        }

        async fn mark_deploying(&self, id: ResourceId) -> DbResult<()> {
            self.update_status(id, DeploymentStatus::Deploying, None).await
        }

        async fn mark_active(&self, id: ResourceId) -> DbResult<()> {
            self.update_status(id, DeploymentStatus::Active, None).await
        }

        async fn record_rollback_target(&self, id: ResourceId, rolled_back_from: ResourceId) -> DbResult<()> {
            let mut g = self.0.deployments.lock().unwrap();
            let d = g.get_mut(id.as_uuid()).ok_or_else(|| DbError::NotFound(id.to_string()))?;
            d.rolled_back_from_deployment_id = Some(rolled_back_from);
            Ok(())
        }

        async fn list_prior_active(&self, id: ResourceId) -> DbResult<Vec<Deployment>> {
            let g = self.0.deployments.lock().unwrap();
            let Some(me) = g.get(id.as_uuid()) else {
                return Ok(Vec::new());
            };
            Ok(g.values()
                .filter(|d| {
                    d.id != id
                        && d.project_id == me.project_id
                        && d.environment == me.environment
                        && d.status == DeploymentStatus::Active
                })
                .cloned()
                .collect())
        }

        async fn count_in_flight_for_tenant(&self, _tenant_id: ResourceId) -> DbResult<i64> {
            unimplemented!("not exercised by the blue/green or rollback happy paths")
        }

        async fn count_since_for_tenant(
            &self,
            _tenant_id: ResourceId,
            _since: chrono::DateTime<chrono::Utc>,
        ) -> DbResult<i64> {
            unimplemented!("not exercised by the blue/green or rollback happy paths")
        }
    }

    struct FakeStrategyState(Arc<World>);

    #[async_trait]
    impl StrategyRepo for FakeStrategyState {
        async fn init(
            &self,
            deployment_id: ResourceId,
            strategy: Strategy,
            total_replicas: i32,
            standby_group: Option<Group>,
        ) -> DbResult<StrategyState> {
            let now = chrono::Utc::now();
            let state = StrategyState {
                deployment_id,
                strategy,
                current_phase: Phase::Preparing,
                active_group: None,
                standby_group,
                total_batches: None,
                current_batch: None,
                batch_size: None,
                canary_traffic_percentage: None,
                canary_duration_minutes: None,
                total_replicas,
                healthy_replicas: 0,
                unhealthy_replicas: 0,
                phase_started_at: now,
                phase_updated_at: now,
            };
            self.0.strategy_states.lock().unwrap().insert(*deployment_id.as_uuid(), state.clone());
            Ok(state)
        }

        async fn get(&self, deployment_id: ResourceId) -> DbResult<StrategyState> {
            self.0
                .strategy_states
                .lock()
                .unwrap()
                .get(deployment_id.as_uuid())
                .cloned()
                .ok_or_else(|| DbError::NotFound(deployment_id.to_string()))
        }

        async fn transition_phase(&self, deployment_id: ResourceId, to_phase: Phase) -> DbResult<()> {
            let from_phase = {
                let mut g = self.0.strategy_states.lock().unwrap();
                let state = g
                    .get_mut(deployment_id.as_uuid())
                    .ok_or_else(|| DbError::NotFound(deployment_id.to_string()))?;
                if !state.current_phase.is_monotone_advance_to(to_phase) {
                    return Err(DbError::InvalidTransition(format!(
                        "deployment {deployment_id} cannot advance from {} to {to_phase}",
                        state.current_phase
                    )));
                }
                let from = state.current_phase;
                state.current_phase = to_phase;
                state.phase_started_at = chrono::Utc::now();
                state.phase_updated_at = chrono::Utc::now();
                from
            };
            self.0
                .transitions
                .lock()
                .unwrap()
                .entry(*deployment_id.as_uuid())
                .or_default()
                .push(PhaseTransition {
                    deployment_id,
                    from_phase: Some(from_phase),
                    to_phase,
                    at: chrono::Utc::now(),
                });
            Ok(())
        }

        async fn set_groups(&self, deployment_id: ResourceId, active: Group, standby: Group) -> DbResult<()> {
            let mut g = self.0.strategy_states.lock().unwrap();
            let state = g
                .get_mut(deployment_id.as_uuid())
                .ok_or_else(|| DbError::NotFound(deployment_id.to_string()))?;
            state.active_group = Some(active);
            state.standby_group = Some(standby);
            Ok(())
        }

        async fn update_rolling_progress(
            &self,
            _deployment_id: ResourceId,
            _current_batch: i32,
            _healthy_replicas: i32,
            _unhealthy_replicas: i32,
        ) -> DbResult<()> {
            unimplemented!("not exercised by the blue/green or rollback happy paths")
        }

        async fn update_canary_progress(
            &self,
            _deployment_id: ResourceId,
            _traffic_percentage: i32,
            _healthy_replicas: i32,
            _unhealthy_replicas: i32,
        ) -> DbResult<()> {
            unimplemented!("not exercised by the blue/green or rollback happy paths")
        }

        async fn list_transitions(&self, deployment_id: ResourceId) -> DbResult<Vec<PhaseTransition>> {
            Ok(self
                .0
                .transitions
                .lock()
                .unwrap()
                .get(deployment_id.as_uuid())
                .cloned()
                .unwrap_or_default())
        }
    }

    struct FakeContainers(Arc<World>);

    #[async_trait]
    impl ContainerRepo for FakeContainers {
        async fn insert(
            &self,
            deployment_id: ResourceId,
            runtime_id: &str,
            name: &str,
            image: &str,
            host_port: u16,
            group: Group,
            replica_index: i32,
        ) -> DbResult<obtura_core::container::Container> {
            let id = ResourceId::new();
            let now = chrono::Utc::now();
            let container = obtura_core::container::Container {
                id,
                deployment_id,
                runtime_id: runtime_id.to_string(),
                name: name.to_string(),
                image: image.to_string(),
                host_port,
                group,
                replica_index,
                status: ContainerStatus::Starting,
                health_status: obtura_core::container::HealthStatus::Starting,
                is_active: false,
                is_primary: false,
                health_check_passes: 0,
                health_check_failures: 0,
                consecutive_failures: 0,
                created_at: now,
                updated_at: now,
            };
            self.0.containers.lock().unwrap().insert(*id.as_uuid(), container.clone());
            Ok(container)
        }

        async fn update_status(&self, id: ResourceId, status: ContainerStatus) -> DbResult<()> {
            let mut g = self.0.containers.lock().unwrap();
            let c = g.get_mut(id.as_uuid()).ok_or_else(|| DbError::NotFound(id.to_string()))?;
            c.status = status;
            Ok(())
        }

        async fn record_probe(&self, id: ResourceId, passed: bool) -> DbResult<obtura_core::container::Container> {
            let mut g = self.0.containers.lock().unwrap();
            let c = g.get_mut(id.as_uuid()).ok_or_else(|| DbError::NotFound(id.to_string()))?;
            c.record_probe(passed);
            Ok(c.clone())
        }

        async fn mark_active(&self, id: ResourceId, is_active: bool) -> DbResult<()> {
            let mut g = self.0.containers.lock().unwrap();
            let c = g.get_mut(id.as_uuid()).ok_or_else(|| DbError::NotFound(id.to_string()))?;
            c.is_active = is_active;
            Ok(())
        }

        async fn mark_primary(&self, deployment_id: ResourceId, id: ResourceId) -> DbResult<()> {
            let mut g = self.0.containers.lock().unwrap();
            for c in g.values_mut().filter(|c| c.deployment_id == deployment_id) {
                c.is_primary = c.id == id;
            }
            Ok(())
        }

        async fn clear_primary(&self, id: ResourceId) -> DbResult<()> {
            let mut g = self.0.containers.lock().unwrap();
            let c = g.get_mut(id.as_uuid()).ok_or_else(|| DbError::NotFound(id.to_string()))?;
            c.is_primary = false;
            Ok(())
        }

        async fn update_group(&self, id: ResourceId, group: Group) -> DbResult<()> {
            let mut g = self.0.containers.lock().unwrap();
            let c = g.get_mut(id.as_uuid()).ok_or_else(|| DbError::NotFound(id.to_string()))?;
            c.group = group;
            Ok(())
        }

        async fn set_runtime_id(&self, id: ResourceId, runtime_id: &str) -> DbResult<()> {
            let mut g = self.0.containers.lock().unwrap();
            let c = g.get_mut(id.as_uuid()).ok_or_else(|| DbError::NotFound(id.to_string()))?;
            c.runtime_id = runtime_id.to_string();
            Ok(())
        }

        async fn list_by_deployment(&self, deployment_id: ResourceId) -> DbResult<Vec<obtura_core::container::Container>> {
            Ok(self
                .0
                .containers
                .lock()
                .unwrap()
                .values()
                .filter(|c| c.deployment_id == deployment_id)
                .cloned()
                .collect())
        }

        async fn list_by_group(
            &self,
            deployment_id: ResourceId,
            group: Group,
        ) -> DbResult<Vec<obtura_core::container::Container>> {
            Ok(self
                .0
                .containers
                .lock()
                .unwrap()
                .values()
                .filter(|c| c.deployment_id == deployment_id && c.group == group)
                .cloned()
                .collect())
        }

        async fn max_claimed_port(&self) -> DbResult<Option<u16>> {
            Ok(self.0.containers.lock().unwrap().values().map(|c| c.host_port).max())
        }

        async fn is_port_claimed(&self, port: u16) -> DbResult<bool> {
            Ok(self
                .0
                .containers
                .lock()
                .unwrap()
                .values()
                .any(|c| c.host_port == port && !matches!(c.status, ContainerStatus::Stopped | ContainerStatus::Failed)))
        }
    }

    struct FakeRouting(Arc<World>);

    #[async_trait]
    impl RoutingRepo for FakeRouting {
        async fn insert_row(
            &self,
            deployment_id: ResourceId,
            group: Group,
            traffic_percentage: u8,
            container_ids: &[ResourceId],
        ) -> DbResult<TrafficRoutingRow> {
            let id = ResourceId::new();
            let row = TrafficRoutingRow {
                id,
                deployment_id,
                routing_group: group,
                traffic_percentage,
                container_ids: container_ids.to_vec(),
                is_active: true,
                deactivated_at: None,
            };
            self.0.routing.lock().unwrap().insert(*id.as_uuid(), row.clone());
            Ok(row)
        }

        async fn deactivate_all(&self, deployment_id: ResourceId) -> DbResult<()> {
            let mut g = self.0.routing.lock().unwrap();
            for r in g.values_mut().filter(|r| r.deployment_id == deployment_id && r.is_active) {
                r.is_active = false;
                r.deactivated_at = Some(chrono::Utc::now());
            }
            Ok(())
        }

        async fn active_rows(&self, deployment_id: ResourceId) -> DbResult<Vec<TrafficRoutingRow>> {
            Ok(self
                .0
                .routing
                .lock()
                .unwrap()
                .values()
                .filter(|r| r.deployment_id == deployment_id && r.is_active)
                .cloned()
                .collect())
        }
    }

    struct FakeEvents;

    #[async_trait]
    impl EventsRepo for FakeEvents {
        async fn append_event(
            &self,
            _deployment_id: ResourceId,
            _event_type: &str,
            _message: &str,
            _severity: Severity,
        ) -> DbResult<()> {
            Ok(())
        }

        async fn raise_alert(
            &self,
            _deployment_id: ResourceId,
            _alert_type: &str,
            _severity: Severity,
            _message: &str,
        ) -> DbResult<obtura_core::events::Alert> {
            unimplemented!("not exercised by the blue/green or rollback happy paths")
        }

        async fn acknowledge_alert(&self, _id: ResourceId, _user_id: ResourceId) -> DbResult<()> {
            unimplemented!("not exercised by the blue/green or rollback happy paths")
        }

        async fn resolve_alert(&self, _id: ResourceId) -> DbResult<()> {
            unimplemented!("not exercised by the blue/green or rollback happy paths")
        }
    }

    struct FakeCanaryAnalysis;

    #[async_trait]
    impl CanaryAnalysisRepo for FakeCanaryAnalysis {
        async fn record(
            &self,
            _deployment_id: ResourceId,
            _error_rate_percent: f64,
            _avg_latency_ms: f64,
            _sample_count: i64,
            _promoted: bool,
        ) -> DbResult<CanaryAnalysisResult> {
            unimplemented!("not exercised by the blue/green or rollback happy paths")
        }

        async fn list_for_deployment(&self, _deployment_id: ResourceId) -> DbResult<Vec<CanaryAnalysisResult>> {
            unimplemented!("not exercised by the blue/green or rollback happy paths")
        }
    }

    struct FakeQuota;

    #[async_trait]
    impl QuotaRepo for FakeQuota {
        async fn resolve(&self, _tenant_id: ResourceId) -> DbResult<Quota> {
            Ok(Quota {
                max_concurrent_deployments: 10,
                ..Quota::default()
            })
        }
    }

    struct FakeRollback(Arc<World>);

    #[async_trait]
    impl RollbackRepo for FakeRollback {
        async fn record(
            &self,
            deployment_id: ResourceId,
            target_deployment_id: ResourceId,
            reason: &str,
            initiated_by: Option<ResourceId>,
        ) -> DbResult<RollbackRecord> {
            let record = RollbackRecord {
                id: ResourceId::new().into(),
                deployment_id: *deployment_id.as_uuid(),
                target_deployment_id: *target_deployment_id.as_uuid(),
                reason: reason.to_string(),
                initiated_by: initiated_by.map(|id| *id.as_uuid()),
                created_at: chrono::Utc::now(),
            };
            self.0.rollbacks.lock().unwrap().push(record.clone());
            Ok(record)
        }

        async fn list_for_deployment(&self, deployment_id: ResourceId) -> DbResult<Vec<RollbackRecord>> {
            Ok(self
                .0
                .rollbacks
                .lock()
                .unwrap()
                .iter()
                .filter(|r| r.deployment_id == *deployment_id.as_uuid())
                .cloned()
                .collect())
        }
    }

    fn sample_deployment(id: ResourceId, project_id: ResourceId, status: DeploymentStatus) -> Deployment {
        let now = chrono::Utc::now();
        Deployment {
            id,
            project_id,
            environment: Environment::Production,
            image_tag: "acme/web:sha123".to_string(),
            strategy: Strategy::BlueGreen,
            replica_count: 1,
            domain: Some("acme.example.com".to_string()),
            subdomain: None,
            triggered_by: None,
            status,
            approval_required: false,
            preview_expires_at: None,
            error_message: None,
            rolled_back_from_deployment_id: None,
            detected_dependencies: Vec::new(),
            deployment_started_at: None,
            deployment_completed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Builds a `Deployer` wired entirely to in-memory fakes sharing `world`,
    /// plus a real `FileRouterProgrammer` over a throwaway temp directory.
    fn build_deployer(world: &Arc<World>, tenant_id: ResourceId, rules_dir: &std::path::Path) -> Deployer {
        Deployer::new(
            Arc::new(FakeRuntime(world.clone())),
            Arc::new(FileRouterProgrammer::new(rules_dir)),
            Arc::new(FakeMetrics),
            Arc::new(FakeRateLimiter),
            Arc::new(FakeDeployments(world.clone())),
            Arc::new(FakeStrategyState(world.clone())),
            Arc::new(FakeContainers(world.clone())),
            Arc::new(FakeRouting(world.clone())),
            Arc::new(FakeEvents),
            Arc::new(FakeCanaryAnalysis),
            Arc::new(FakeQuota),
            Arc::new(FakeTenantsFixed(tenant_id)),
            Arc::new(FakeRollback(world.clone())),
            SystemConfig::default(),
        )
    }

    struct FakeTenantsFixed(ResourceId);

    #[async_trait]
    impl TenantRepo for FakeTenantsFixed {
        async fn owning_tenant_id(&self, _project_id: ResourceId) -> DbResult<ResourceId> {
            Ok(self.0)
        }

        async fn list_tenant_ids(&self) -> DbResult<Vec<ResourceId>> {
            unimplemented!("not exercised by the blue/green or rollback happy paths")
        }
    }

    #[tokio::test]
    async fn blue_green_first_deployment_lands_on_blue() {
        let world = Arc::new(World::default());
        let tenant_id = ResourceId::new();
        let project_id = ResourceId::new();
        let deployment_id = ResourceId::new();

        world
            .deployments
            .lock()
            .unwrap()
            .insert(*deployment_id.as_uuid(), sample_deployment(deployment_id, project_id, DeploymentStatus::Pending));

        let rules_dir = tempfile::tempdir().unwrap();
        let deployer = build_deployer(&world, tenant_id, rules_dir.path());

        let job = Job {
            project_id,
            build_id: ResourceId::new(),
            image_tag: "acme/web:sha123".to_string(),
            deployment_id,
            environment: Environment::Production,
            strategy: Strategy::BlueGreen,
            replica_count: 1,
            domain: Some("acme.example.com".to_string()),
            subdomain: None,
            config: HashMap::new(),
            build_metadata: serde_json::json!({}),
        };

        deployer.deploy(job).await.unwrap();

        let deployment = world.deployments.lock().unwrap().get(deployment_id.as_uuid()).cloned().unwrap();
        assert_eq!(deployment.status, DeploymentStatus::Active);

        let state = world.strategy_states.lock().unwrap().get(deployment_id.as_uuid()).cloned().unwrap();
        assert_eq!(state.current_phase, Phase::Completed);
        assert_eq!(state.active_group, Some(Group::Blue));

        let containers: Vec<_> = world
            .containers
            .lock()
            .unwrap()
            .values()
            .filter(|c| c.deployment_id == deployment_id)
            .cloned()
            .collect();
        assert_eq!(containers.len(), 1);
        assert_eq!(containers[0].group, Group::Blue);
        assert!(containers[0].is_active);
        assert!(containers[0].is_primary);

        let routing: Vec<_> = world
            .routing
            .lock()
            .unwrap()
            .values()
            .filter(|r| r.deployment_id == deployment_id && r.is_active)
            .cloned()
            .collect();
        assert_eq!(routing.len(), 1);
        assert_eq!(routing[0].routing_group, Group::Blue);
        assert_eq!(routing[0].traffic_percentage, 100);
    }

    #[tokio::test]
    async fn rollback_restores_target_and_stamps_both_deployments() {
        let world = Arc::new(World::default());
        let tenant_id = ResourceId::new();
        let project_id = ResourceId::new();
        let d1 = ResourceId::new();
        let d2 = ResourceId::new();

        {
            let mut deployments = world.deployments.lock().unwrap();
            deployments.insert(*d1.as_uuid(), sample_deployment(d1, project_id, DeploymentStatus::Terminated));
            deployments.insert(*d2.as_uuid(), sample_deployment(d2, project_id, DeploymentStatus::Active));
        }

        let d1_container = ResourceId::new();
        let d2_container = ResourceId::new();
        let now = chrono::Utc::now();
        {
            let mut containers = world.containers.lock().unwrap();
            containers.insert(
                *d1_container.as_uuid(),
                obtura_core::container::Container {
                    id: d1_container,
                    deployment_id: d1,
                    runtime_id: "runtime-d1-0".to_string(),
                    name: "acme-production-blue-0".to_string(),
                    image: "acme/web:sha122".to_string(),
                    host_port: 9100,
                    group: Group::Blue,
                    replica_index: 0,
                    status: ContainerStatus::Stopped,
                    health_status: obtura_core::container::HealthStatus::Healthy,
                    is_active: false,
                    is_primary: false,
                    health_check_passes: 3,
                    health_check_failures: 0,
                    consecutive_failures: 0,
                    created_at: now,
                    updated_at: now,
                },
            );
            containers.insert(
                *d2_container.as_uuid(),
                obtura_core::container::Container {
                    id: d2_container,
                    deployment_id: d2,
                    runtime_id: "runtime-d2-0".to_string(),
                    name: "acme-production-green-0".to_string(),
                    image: "acme/web:sha123".to_string(),
                    host_port: 9101,
                    group: Group::Green,
                    replica_index: 0,
                    status: ContainerStatus::Running,
                    health_status: obtura_core::container::HealthStatus::Healthy,
                    is_active: true,
                    is_primary: true,
                    health_check_passes: 5,
                    health_check_failures: 0,
                    consecutive_failures: 0,
                    created_at: now,
                    updated_at: now,
                },
            );
        }

        let rules_dir = tempfile::tempdir().unwrap();
        let deployer = build_deployer(&world, tenant_id, rules_dir.path());
        let initiator = ResourceId::new();

        deployer
            .rollback(d2, d1, "elevated error rate after sha123", Some(initiator))
            .await
            .unwrap();

        let deployments = world.deployments.lock().unwrap();
        let rolled_back = deployments.get(d2.as_uuid()).unwrap();
        assert_eq!(rolled_back.status, DeploymentStatus::RolledBack);
        assert_eq!(rolled_back.rolled_back_from_deployment_id, Some(d1));
        assert_eq!(rolled_back.error_message.as_deref(), Some("elevated error rate after sha123"));

        let restored = deployments.get(d1.as_uuid()).unwrap();
        assert_eq!(restored.status, DeploymentStatus::Active);
        drop(deployments);

        let containers = world.containers.lock().unwrap();
        assert!(containers.get(d1_container.as_uuid()).unwrap().is_active);
        let d2_after = containers.get(d2_container.as_uuid()).unwrap();
        assert!(!d2_after.is_active);
        assert_eq!(d2_after.status, ContainerStatus::Stopped);
        drop(containers);

        let rollbacks = world.rollbacks.lock().unwrap();
        assert_eq!(rollbacks.len(), 1);
        assert_eq!(rollbacks[0].deployment_id, *d2.as_uuid());
        assert_eq!(rollbacks[0].target_deployment_id, *d1.as_uuid());
    }
}
