//! Health-check polling shared by every strategy engine: a fixed
//! 3s-interval poll of the runtime's health state, bounded by a
//! strategy-specific timeout, recording each probe against the container row.

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use obtura_core::ResourceId;
use obtura_core::Result;
use obtura_core::runtime::{ContainerRuntime, RuntimeHandle, RuntimeHealth};
use obtura_db::repo::ContainerRepo;

const POLL_INTERVAL: Duration = Duration::from_secs(3);

/// Sleeps `dur` unless `token` is cancelled first, in which case it returns
/// `Err(Error::Cancelled)` instead of completing the sleep. Every suspension
/// point longer than a single RPC (drains, canary monitoring) goes through
/// this rather than a bare `tokio::time::sleep` so the worker's cancellation
/// handle is honored.
pub async fn cancellable_sleep(dur: Duration, token: &CancellationToken) -> Result<()> {
    tokio::select! {
        _ = tokio::time::sleep(dur) => Ok(()),
        _ = token.cancelled() => Err(obtura_core::Error::Cancelled),
    }
}

/// Polls `handle`'s runtime health every 3s until it reports `Healthy`,
/// `Unhealthy`, `timeout` elapses, or `token` is cancelled, recording a
/// probe row on each tick. Returns `Ok(())` on healthy,
/// `Err(Error::HealthCheckFailed)` on unhealthy/timeout, `Err(Error::Cancelled)`
/// if the worker's context is cancelled mid-poll.
pub async fn wait_until_healthy(
    runtime: &Arc<dyn ContainerRuntime>,
    containers: &dyn ContainerRepo,
    container_id: ResourceId,
    handle: &RuntimeHandle,
    timeout: Duration,
    token: &CancellationToken,
) -> Result<()> {
    let deadline = tokio::time::Instant::now() + timeout;

    loop {
        if token.is_cancelled() {
            return Err(obtura_core::Error::Cancelled);
        }

        let inspection = runtime.inspect(handle).await?;

        match inspection.health {
            RuntimeHealth::Healthy => {
                containers.record_probe(container_id, true).await?;
                return Ok(());
            }
            RuntimeHealth::Unhealthy => {
                containers.record_probe(container_id, false).await?;
                return Err(obtura_core::Error::HealthCheckFailed(format!(
                    "container {container_id} reported unhealthy"
                )));
            }
            RuntimeHealth::Starting | RuntimeHealth::None => {
                containers.record_probe(container_id, false).await?;
            }
        }

        if tokio::time::Instant::now() >= deadline {
            warn!(container_id = %container_id, ?timeout, "health check timed out");
            return Err(obtura_core::Error::HealthCheckFailed(format!(
                "container {container_id} did not become healthy within {timeout:?}"
            )));
        }

        cancellable_sleep(POLL_INTERVAL, token).await?;
    }
}

/// Container naming convention: `<project>-<environment>-<group>-<replica>`.
/// Stable and human-legible in `docker ps`, and unique per (deployment, group,
/// replica index) since the caller always supplies a fresh replica index.
pub fn container_name(project_id: ResourceId, environment: &str, group: impl std::fmt::Display, replica_index: i32) -> String {
    let short = project_id.to_string();
    let short = &short[..8.min(short.len())];
    format!("{short}-{environment}-{group}-{replica_index}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancellable_sleep_completes_when_not_cancelled() {
        let token = CancellationToken::new();
        assert!(cancellable_sleep(Duration::from_millis(1), &token).await.is_ok());
    }

    #[tokio::test]
    async fn cancellable_sleep_returns_cancelled_error_when_token_fires() {
        let token = CancellationToken::new();
        token.cancel();
        let err = cancellable_sleep(Duration::from_secs(60), &token).await.unwrap_err();
        assert!(matches!(err, obtura_core::Error::Cancelled));
    }

    #[test]
    fn container_name_is_stable_and_unique_per_replica() {
        let project = ResourceId::new();
        assert_ne!(
            container_name(project, "production", "blue", 0),
            container_name(project, "production", "blue", 1)
        );
    }
}
