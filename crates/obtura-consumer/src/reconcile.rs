//! Periodic reconciliation of the concurrent-deployment counter against
//! the authoritative in-flight count in Postgres. Runs as a background
//! task in the consumer binary's main loop.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use obtura_cache::RateLimiter;
use obtura_db::repo::{DeploymentRepo, TenantRepo};

/// How often the sweep runs. Short enough to bound drift from a crashed
/// consumer that never released its slot, long enough not to hammer
/// Postgres with a `count(*)` per tenant on every tick.
pub const RECONCILE_INTERVAL: Duration = Duration::from_secs(300);

/// Spawns the reconciliation sweep as a detached background task. The
/// returned handle is dropped by callers that don't need to await it --
/// it runs for the lifetime of the process.
pub fn spawn_reconcile_task(
    rate_limiter: Arc<dyn RateLimiter>,
    tenants: Arc<dyn TenantRepo>,
    deployments: Arc<dyn DeploymentRepo>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(RECONCILE_INTERVAL);
        loop {
            ticker.tick().await;
            if let Err(e) = reconcile_once(&rate_limiter, &tenants, &deployments).await {
                error!(error = %e, "concurrent-counter reconciliation sweep failed");
            }
        }
    })
}

async fn reconcile_once(
    rate_limiter: &Arc<dyn RateLimiter>,
    tenants: &Arc<dyn TenantRepo>,
    deployments: &Arc<dyn DeploymentRepo>,
) -> anyhow::Result<()> {
    let tenant_ids = tenants.list_tenant_ids().await?;
    info!(tenants = tenant_ids.len(), "running concurrent-counter reconciliation sweep");

    for tenant_id in tenant_ids {
        let actual = match deployments.count_in_flight_for_tenant(tenant_id).await {
            Ok(n) => n,
            Err(e) => {
                warn!(tenant_id = %tenant_id, error = %e, "failed to count in-flight deployments");
                continue;
            }
        };

        if let Err(e) = rate_limiter.reconcile_concurrent(tenant_id, actual).await {
            warn!(tenant_id = %tenant_id, error = %e, "failed to reconcile concurrent counter");
        }
    }

    Ok(())
}
