//! Container runtime adapter trait.
//!
//! A thin, language-neutral wrapper around the host container engine. The
//! only implementation shipped is `obtura-runtime`'s Docker adapter, but the
//! trait keeps the orchestrator decoupled from `bollard` so tests can supply
//! a fake.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::Result;
use crate::sandbox::SandboxProfile;

/// Parameters for creating a single container.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerConfig {
    pub name: String,
    pub image: String,
    pub env: HashMap<String, String>,
    pub host_port: u16,
    pub container_port: u16,
    pub labels: HashMap<String, String>,
    pub sandbox: SandboxProfile,
    pub health_check: HealthProbeConfig,
}

/// Container-local HTTP health probe configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthProbeConfig {
    pub path: String,
    pub interval: std::time::Duration,
    pub timeout: std::time::Duration,
    pub retries: u32,
    pub start_period: std::time::Duration,
}

impl Default for HealthProbeConfig {
    fn default() -> Self {
        Self {
            path: "/health".to_string(),
            interval: std::time::Duration::from_secs(10),
            timeout: std::time::Duration::from_secs(5),
            retries: 3,
            start_period: std::time::Duration::from_secs(30),
        }
    }
}

/// An opaque handle identifying a container in the runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeHandle {
    pub runtime_id: String,
    pub name: String,
}

/// Runtime-observed health state (distinct from the DB's `HealthStatus`,
/// which additionally tracks consecutive-failure bookkeeping).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuntimeHealth {
    Starting,
    Healthy,
    Unhealthy,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuntimeState {
    Created,
    Running,
    Exited,
    Dead,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Inspection {
    pub state: RuntimeState,
    pub health: RuntimeHealth,
    pub exit_code: Option<i64>,
}

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Idempotent: inspect first, pull only on absence.
    async fn ensure_image(&self, tag: &str) -> Result<()>;

    /// Idempotent: list and create only if missing.
    async fn ensure_network(&self, name: &str) -> Result<()>;

    async fn create(&self, config: ContainerConfig) -> Result<RuntimeHandle>;

    async fn start(&self, handle: &RuntimeHandle) -> Result<()>;

    async fn inspect(&self, handle: &RuntimeHandle) -> Result<Inspection>;

    async fn stop(&self, handle: &RuntimeHandle, timeout: std::time::Duration) -> Result<()>;

    async fn remove(&self, handle: &RuntimeHandle, force: bool) -> Result<()>;
}
