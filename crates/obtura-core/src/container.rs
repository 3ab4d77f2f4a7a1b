//! Container records: one row per running replica of a deployment.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ResourceId;
use crate::strategy::Group;

/// Runtime-observed lifecycle status of a container row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    Starting,
    Running,
    Stopped,
    Failed,
    Unhealthy,
}

impl std::fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ContainerStatus::Starting => "starting",
            ContainerStatus::Running => "running",
            ContainerStatus::Stopped => "stopped",
            ContainerStatus::Failed => "failed",
            ContainerStatus::Unhealthy => "unhealthy",
        };
        write!(f, "{s}")
    }
}

/// Health-probe-observed status, distinct from lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Starting,
    Healthy,
    Unhealthy,
    Failed,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            HealthStatus::Starting => "starting",
            HealthStatus::Healthy => "healthy",
            HealthStatus::Unhealthy => "unhealthy",
            HealthStatus::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// A single container belonging to a deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Container {
    pub id: ResourceId,
    pub deployment_id: ResourceId,
    pub runtime_id: String,
    pub name: String,
    pub image: String,
    pub host_port: u16,
    pub group: Group,
    pub replica_index: i32,
    pub status: ContainerStatus,
    pub health_status: HealthStatus,
    pub is_active: bool,
    pub is_primary: bool,
    pub health_check_passes: i32,
    pub health_check_failures: i32,
    pub consecutive_failures: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Container {
    /// Record the result of one health probe, updating consecutive-failure
    /// tracking used to decide when a container should be marked unhealthy.
    pub fn record_probe(&mut self, passed: bool) {
        if passed {
            self.health_check_passes += 1;
            self.consecutive_failures = 0;
            self.health_status = HealthStatus::Healthy;
        } else {
            self.health_check_failures += 1;
            self.consecutive_failures += 1;
            self.health_status = HealthStatus::Unhealthy;
        }
    }
}

/// A single health-check probe result (`container_health_checks` table).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub container_id: ResourceId,
    pub passed: bool,
    pub checked_at: DateTime<Utc>,
    pub detail: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Container {
        Container {
            id: ResourceId::new(),
            deployment_id: ResourceId::new(),
            runtime_id: "abc123".into(),
            name: "svc-blue-0".into(),
            image: "img:1".into(),
            host_port: 9100,
            group: Group::Blue,
            replica_index: 0,
            status: ContainerStatus::Starting,
            health_status: HealthStatus::Starting,
            is_active: false,
            is_primary: false,
            health_check_passes: 0,
            health_check_failures: 0,
            consecutive_failures: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn passing_probe_resets_consecutive_failures() {
        let mut c = sample();
        c.record_probe(false);
        c.record_probe(false);
        assert_eq!(c.consecutive_failures, 2);
        c.record_probe(true);
        assert_eq!(c.consecutive_failures, 0);
        assert_eq!(c.health_status, HealthStatus::Healthy);
    }
}
