//! Shared container/router wiring: turns a `Job` plus a sandbox profile and
//! an allocated port into the `ContainerConfig` the runtime adapter expects
//! and the `RouteRule` the edge router programmer expects.

use std::collections::HashMap;

use obtura_core::ResourceId;
use obtura_core::job::Job;
use obtura_core::runtime::{ContainerConfig, HealthProbeConfig};
use obtura_core::sandbox::SandboxProfile;
use obtura_router::RouteRule;

const CONTAINER_PORT: u16 = 8080;

pub fn fqdn_for(job: &Job) -> String {
    match (&job.subdomain, &job.domain) {
        (Some(sub), Some(domain)) => format!("{sub}.{domain}"),
        (None, Some(domain)) => domain.clone(),
        _ => format!("{}.obtura.internal", job.project_id),
    }
}

pub fn build_container_config(
    name: String,
    image: &str,
    host_port: u16,
    deployment_id: ResourceId,
    sandbox: &SandboxProfile,
    extra_env: &HashMap<String, String>,
) -> ContainerConfig {
    let mut labels = HashMap::new();
    labels.insert("obtura.managed".to_string(), "true".to_string());
    labels.insert("obtura.deployment_id".to_string(), deployment_id.to_string());

    ContainerConfig {
        name,
        image: image.to_string(),
        env: extra_env.clone(),
        host_port,
        container_port: CONTAINER_PORT,
        labels,
        sandbox: sandbox.clone(),
        health_check: HealthProbeConfig::default(),
    }
}

pub fn build_route_rule(container_name: &str, job: &Job, host_port: u16) -> RouteRule {
    RouteRule {
        container_name: container_name.to_string(),
        fqdn: fqdn_for(job),
        backend_host: "127.0.0.1".to_string(),
        backend_port: host_port,
        health_check_path: "/health".to_string(),
    }
}
