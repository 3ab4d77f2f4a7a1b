//! `DockerRuntime`: the only shipped `ContainerRuntime` implementation.
//!
//! Wraps `bollard` to run a long-lived service container with a health
//! probe, resource caps, and a locked-down security profile.

use std::collections::HashMap;

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, RemoveContainerOptions,
    StartContainerOptions, StopContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::image::CreateImageOptions;
use bollard::models::{HealthConfig, HealthStatusEnum, HostConfig, PortBinding};
use bollard::network::{CreateNetworkOptions, ListNetworksOptions};
use futures::StreamExt;
use tracing::{debug, info, warn};

use obtura_core::runtime::{
    ContainerConfig, ContainerRuntime, Inspection, RuntimeHandle, RuntimeHealth, RuntimeState,
};
use obtura_core::{Error, Result};

/// Label every container the orchestrator creates with this prefix so
/// `docker ps` / reconciliation sweeps can find them unambiguously.
pub const LABEL_PREFIX: &str = "obtura";

pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    pub fn connect() -> Result<Self> {
        let docker =
            Docker::connect_with_local_defaults().map_err(|e| Error::Internal(e.to_string()))?;
        Ok(Self { docker })
    }

    pub fn with_client(docker: Docker) -> Self {
        Self { docker }
    }
}

/// Coarse classification of a bollard error into the taxonomy C4 promises:
/// `transient` (network, rate), `not_found`, `invalid_config`, `denied`.
fn map_err(e: BollardError) -> Error {
    match &e {
        BollardError::DockerResponseServerError { status_code, message } => match *status_code {
            404 => Error::NotFound(message.clone()),
            400 => Error::InvalidInput(message.clone()),
            403 | 409 => Error::Denied(message.clone()),
            429 | 500..=599 => Error::Transient(message.clone()),
            _ => Error::Runtime(message.clone()),
        },
        BollardError::HyperResponseError(_) | BollardError::IOError { .. } => {
            Error::Transient(e.to_string())
        }
        _ => Error::Runtime(e.to_string()),
    }
}

fn is_not_found(e: &BollardError) -> bool {
    matches!(e, BollardError::DockerResponseServerError { status_code: 404, .. })
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn ensure_image(&self, tag: &str) -> Result<()> {
        match self.docker.inspect_image(tag).await {
            Ok(_) => {
                debug!(image = %tag, "image already present");
                return Ok(());
            }
            Err(e) if is_not_found(&e) => {}
            Err(e) => return Err(map_err(e)),
        }

        info!(image = %tag, "pulling image");
        let options = CreateImageOptions {
            from_image: tag.to_string(),
            ..Default::default()
        };
        let mut stream = self.docker.create_image(Some(options), None, None);
        while let Some(progress) = stream.next().await {
            match progress {
                Ok(info) => {
                    if let Some(status) = info.status {
                        debug!(image = %tag, status = %status, "pull progress");
                    }
                }
                Err(e) => return Err(map_err(e)),
            }
        }
        Ok(())
    }

    async fn ensure_network(&self, name: &str) -> Result<()> {
        let filters = HashMap::from([("name".to_string(), vec![name.to_string()])]);
        let existing = self
            .docker
            .list_networks(Some(ListNetworksOptions { filters }))
            .await
            .map_err(map_err)?;

        if existing.iter().any(|n| n.name.as_deref() == Some(name)) {
            debug!(network = %name, "bridge network already present");
            return Ok(());
        }

        info!(network = %name, "creating bridge network");
        let options = CreateNetworkOptions {
            name: name.to_string(),
            driver: "bridge".to_string(),
            ..Default::default()
        };
        match self.docker.create_network(options).await {
            Ok(_) => Ok(()),
            // A concurrent deployment may have won the race between our list
            // and create; a 409 here means the network now exists, which is
            // exactly the postcondition we wanted.
            Err(BollardError::DockerResponseServerError { status_code: 409, .. }) => Ok(()),
            Err(e) => Err(map_err(e)),
        }
    }

    async fn create(&self, config: ContainerConfig) -> Result<RuntimeHandle> {
        let port_key = format!("{}/tcp", config.container_port);
        let exposed_ports = HashMap::from([(port_key.clone(), HashMap::new())]);
        let port_bindings = HashMap::from([(
            port_key,
            Some(vec![PortBinding {
                host_ip: None,
                host_port: Some(config.host_port.to_string()),
            }]),
        )]);

        let tmpfs = config
            .sandbox
            .security
            .tmpfs_mounts
            .iter()
            .map(|path| (path.clone(), String::new()))
            .collect::<HashMap<_, _>>();

        let mut labels = config.labels.clone();
        labels
            .entry(format!("{LABEL_PREFIX}.managed"))
            .or_insert_with(|| "true".to_string());

        let host_config = HostConfig {
            cpu_period: Some(100_000),
            cpu_quota: Some((config.sandbox.resources.cpu_quota * 100_000.0) as i64),
            memory: Some(config.sandbox.resources.memory_limit_mb * 1024 * 1024),
            memory_swap: Some(config.sandbox.resources.memory_limit_mb * 1024 * 1024),
            pids_limit: Some(config.sandbox.resources.pids_limit),
            cap_drop: Some(vec!["ALL".to_string()]),
            cap_add: Some(config.sandbox.security.capabilities_add.clone()),
            security_opt: if config.sandbox.security.no_new_privileges {
                Some(vec!["no-new-privileges".to_string()])
            } else {
                None
            },
            readonly_rootfs: Some(config.sandbox.security.read_only_root),
            masked_paths: Some(config.sandbox.security.masked_paths.clone()),
            readonly_paths: Some(config.sandbox.security.read_only_paths.clone()),
            tmpfs: Some(tmpfs),
            dns: Some(config.sandbox.network.dns_servers.clone()),
            network_mode: Some(config.sandbox.network.bridge_network.clone()),
            port_bindings: if config.sandbox.network.publish_to_host {
                Some(port_bindings)
            } else {
                None
            },
            ..Default::default()
        };

        let healthcheck = HealthConfig {
            test: Some(vec![
                "CMD-SHELL".to_string(),
                format!(
                    "wget -q -O- http://127.0.0.1:{}{} || exit 1",
                    config.container_port, config.health_check.path
                ),
            ]),
            interval: Some(config.health_check.interval.as_nanos() as i64),
            timeout: Some(config.health_check.timeout.as_nanos() as i64),
            retries: Some(config.health_check.retries as i64),
            start_period: Some(config.health_check.start_period.as_nanos() as i64),
        };

        let env: Vec<String> = config
            .env
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();

        let create_config = Config {
            image: Some(config.image.clone()),
            env: Some(env),
            labels: Some(labels),
            exposed_ports: Some(exposed_ports),
            healthcheck: Some(healthcheck),
            host_config: Some(host_config),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: config.name.clone(),
            platform: None,
        };

        info!(container = %config.name, image = %config.image, "creating container");
        let created = self
            .docker
            .create_container(Some(options), create_config)
            .await
            .map_err(map_err)?;

        Ok(RuntimeHandle {
            runtime_id: created.id,
            name: config.name,
        })
    }

    async fn start(&self, handle: &RuntimeHandle) -> Result<()> {
        info!(container = %handle.name, "starting container");
        self.docker
            .start_container(&handle.name, None::<StartContainerOptions<String>>)
            .await
            .map_err(map_err)
    }

    async fn inspect(&self, handle: &RuntimeHandle) -> Result<Inspection> {
        let inspect = self
            .docker
            .inspect_container(&handle.name, None::<InspectContainerOptions>)
            .await
            .map_err(map_err)?;

        let state = inspect.state.unwrap_or_default();

        let runtime_state = if state.running.unwrap_or(false) {
            RuntimeState::Running
        } else if state.dead.unwrap_or(false) {
            RuntimeState::Dead
        } else if state.status.is_none() && state.exit_code.is_none() {
            RuntimeState::Created
        } else {
            RuntimeState::Exited
        };

        let health = match state.health.and_then(|h| h.status) {
            Some(HealthStatusEnum::HEALTHY) => RuntimeHealth::Healthy,
            Some(HealthStatusEnum::UNHEALTHY) => RuntimeHealth::Unhealthy,
            Some(HealthStatusEnum::STARTING) => RuntimeHealth::Starting,
            _ => RuntimeHealth::None,
        };

        Ok(Inspection {
            state: runtime_state,
            health,
            exit_code: state.exit_code,
        })
    }

    async fn stop(&self, handle: &RuntimeHandle, timeout: std::time::Duration) -> Result<()> {
        let options = StopContainerOptions {
            t: Some(timeout.as_secs() as i32),
            ..Default::default()
        };
        match self.docker.stop_container(&handle.name, Some(options)).await {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => {
                warn!(container = %handle.name, "stop: container already gone");
                Ok(())
            }
            Err(e) => Err(map_err(e)),
        }
    }

    async fn remove(&self, handle: &RuntimeHandle, force: bool) -> Result<()> {
        let options = RemoveContainerOptions {
            force,
            ..Default::default()
        };
        match self.docker.remove_container(&handle.name, Some(options)).await {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => {
                warn!(container = %handle.name, "remove: container already gone");
                Ok(())
            }
            Err(e) => Err(map_err(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_maps_to_error_not_found() {
        let e = BollardError::DockerResponseServerError {
            status_code: 404,
            message: "no such container".to_string(),
        };
        assert!(matches!(map_err(e), Error::NotFound(_)));
    }

    #[test]
    fn server_error_maps_to_transient() {
        let e = BollardError::DockerResponseServerError {
            status_code: 503,
            message: "overloaded".to_string(),
        };
        assert!(matches!(map_err(e), Error::Transient(_)));
    }

    #[test]
    fn conflict_maps_to_denied() {
        let e = BollardError::DockerResponseServerError {
            status_code: 409,
            message: "conflict".to_string(),
        };
        assert!(matches!(map_err(e), Error::Denied(_)));
    }
}
