//! The `Deployment` aggregate root.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ResourceId;
use crate::dependency::DetectedDependency;

/// Environment a deployment targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Production,
    Staging,
    Preview,
}

impl Environment {
    pub fn requires_approval(self) -> bool {
        matches!(self, Environment::Production)
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Environment::Production => "production",
            Environment::Staging => "staging",
            Environment::Preview => "preview",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for Environment {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "production" => Ok(Environment::Production),
            "staging" => Ok(Environment::Staging),
            "preview" => Ok(Environment::Preview),
            other => Err(crate::Error::InvalidInput(format!(
                "unknown environment: {other}"
            ))),
        }
    }
}

/// Deployment strategy selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    BlueGreen,
    Rolling,
    Canary,
}

impl Default for Strategy {
    fn default() -> Self {
        Strategy::BlueGreen
    }
}

impl std::str::FromStr for Strategy {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" => Ok(Strategy::BlueGreen),
            "blue_green" => Ok(Strategy::BlueGreen),
            "rolling" => Ok(Strategy::Rolling),
            "canary" => Ok(Strategy::Canary),
            other => Err(crate::Error::InvalidInput(format!(
                "unknown strategy: {other}"
            ))),
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Strategy::BlueGreen => "blue_green",
            Strategy::Rolling => "rolling",
            Strategy::Canary => "canary",
        };
        write!(f, "{s}")
    }
}

/// Closed lifecycle status set. No row ever returns to `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    Pending,
    Deploying,
    Active,
    Failed,
    RolledBack,
    Terminated,
}

impl DeploymentStatus {
    /// Status transitions are monotonic except `active -> rolled_back` and
    /// `active -> terminated`.
    pub fn can_transition_to(self, next: DeploymentStatus) -> bool {
        use DeploymentStatus::*;
        match (self, next) {
            (Pending, Deploying) => true,
            (Deploying, Active | Failed) => true,
            (Active, RolledBack | Terminated) => true,
            (a, b) if a == b => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DeploymentStatus::Pending => "pending",
            DeploymentStatus::Deploying => "deploying",
            DeploymentStatus::Active => "active",
            DeploymentStatus::Failed => "failed",
            DeploymentStatus::RolledBack => "rolled_back",
            DeploymentStatus::Terminated => "terminated",
        };
        write!(f, "{s}")
    }
}

/// A persistent record of the intent to run a specific image for a
/// (project, environment) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deployment {
    pub id: ResourceId,
    pub project_id: ResourceId,
    pub environment: Environment,
    pub image_tag: String,
    pub strategy: Strategy,
    pub replica_count: u32,
    pub domain: Option<String>,
    pub subdomain: Option<String>,
    pub triggered_by: Option<ResourceId>,
    pub status: DeploymentStatus,
    pub approval_required: bool,
    pub preview_expires_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub rolled_back_from_deployment_id: Option<ResourceId>,
    pub detected_dependencies: Vec<DetectedDependency>,
    pub deployment_started_at: Option<DateTime<Utc>>,
    pub deployment_completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Deployment {
    /// Empty strategy is already handled by `Strategy::default()`/`FromStr`;
    /// zero replicas become 1.
    pub fn normalize_replica_count(replica_count: u32) -> u32 {
        if replica_count == 0 { 1 } else { replica_count }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn production_requires_approval() {
        assert!(Environment::Production.requires_approval());
        assert!(!Environment::Staging.requires_approval());
        assert!(!Environment::Preview.requires_approval());
    }

    #[test]
    fn status_is_monotonic_except_active_exits() {
        assert!(DeploymentStatus::Pending.can_transition_to(DeploymentStatus::Deploying));
        assert!(DeploymentStatus::Deploying.can_transition_to(DeploymentStatus::Active));
        assert!(DeploymentStatus::Active.can_transition_to(DeploymentStatus::Terminated));
        assert!(DeploymentStatus::Active.can_transition_to(DeploymentStatus::RolledBack));
        assert!(!DeploymentStatus::Active.can_transition_to(DeploymentStatus::Pending));
        assert!(!DeploymentStatus::Terminated.can_transition_to(DeploymentStatus::Active));
    }

    #[test]
    fn zero_replicas_normalizes_to_one() {
        assert_eq!(Deployment::normalize_replica_count(0), 1);
        assert_eq!(Deployment::normalize_replica_count(3), 3);
    }
}
