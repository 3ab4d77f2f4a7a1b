//! Provisions one replica container: allocate a port, claim it by inserting
//! the container row, then create and start the runtime container.
//!
//! The claim against the shared port pool happens at the row insert, before
//! the runtime container exists. A losing insert (SQLSTATE 23505 on the
//! live-port unique index) means another deployment claimed the same
//! candidate first; since no runtime container was created for this attempt,
//! there is nothing to tear down and a fresh candidate is tried immediately.
//! The row starts with a placeholder `runtime_id` and is updated once the
//! runtime create call returns the real one.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::warn;

use obtura_config::PortPoolConfig;
use obtura_core::container::Container;
use obtura_core::job::Job;
use obtura_core::runtime::{ContainerRuntime, RuntimeHandle};
use obtura_core::sandbox::SandboxProfile;
use obtura_core::strategy::Group;
use obtura_core::{Error, Result};
use obtura_db::repo::ContainerRepo;

use crate::cleanup::CleanupScope;
use crate::health::container_name;
use crate::port::{MAX_CLAIM_ATTEMPTS, next_candidate};
use crate::provision::build_container_config;

pub async fn provision_replica(
    runtime: &Arc<dyn ContainerRuntime>,
    containers: &dyn ContainerRepo,
    pool: &PortPoolConfig,
    job: &Job,
    sandbox: &SandboxProfile,
    group: Group,
    replica_index: i32,
    cleanup: &mut CleanupScope,
) -> Result<(Container, RuntimeHandle)> {
    let name = container_name(job.project_id, &job.environment.to_string(), group, replica_index);
    const PENDING_RUNTIME_ID: &str = "";

    runtime.ensure_network(&sandbox.network.bridge_network).await?;
    runtime.ensure_image(&job.image_tag).await?;

    for attempt in 0..MAX_CLAIM_ATTEMPTS {
        let port = next_candidate(containers, pool)
            .await?
            .ok_or_else(|| Error::ResourceExhausted(format!("no host ports available in range {}-{}", pool.range_start, pool.range_end)))?;

        let row = match containers
            .insert(job.deployment_id, PENDING_RUNTIME_ID, &name, &job.image_tag, port, group, replica_index)
            .await
        {
            Ok(row) => row,
            Err(e) if e.is_unique_violation() && attempt + 1 < MAX_CLAIM_ATTEMPTS => {
                warn!(port, attempt, "lost port claim race, retrying with a fresh candidate");
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        let config = build_container_config(name.clone(), &job.image_tag, port, job.deployment_id, sandbox, &HashMap::new());
        let handle = match runtime.create(config).await {
            Ok(handle) => handle,
            Err(e) => {
                containers.update_status(row.id, obtura_core::container::ContainerStatus::Failed).await?;
                return Err(e);
            }
        };
        if let Err(e) = runtime.start(&handle).await {
            let _ = runtime.remove(&handle, true).await;
            containers.update_status(row.id, obtura_core::container::ContainerStatus::Failed).await?;
            return Err(e);
        }

        containers.set_runtime_id(row.id, &handle.runtime_id).await?;
        cleanup.record_container(row.id, handle.clone());
        let row = Container { runtime_id: handle.runtime_id.clone(), ..row };
        return Ok((row, handle));
    }

    Err(Error::ResourceExhausted(format!(
        "could not claim a host port for {name} after {MAX_CLAIM_ATTEMPTS} attempts"
    )))
}
