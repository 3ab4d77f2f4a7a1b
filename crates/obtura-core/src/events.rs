//! Deployment events and operator-facing alerts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ResourceId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentEvent {
    pub deployment_id: ResourceId,
    pub event_type: String,
    pub message: String,
    pub severity: Severity,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: ResourceId,
    pub deployment_id: ResourceId,
    pub alert_type: String,
    pub severity: Severity,
    pub message: String,
    pub resolved: bool,
    pub acknowledged: bool,
    pub resolver_user: Option<ResourceId>,
    pub created_at: DateTime<Utc>,
}

/// Outbound terminal event published to the bus on completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompleteEvent {
    #[serde(rename = "deploymentId")]
    pub deployment_id: ResourceId,
    pub status: String,
    pub phase: String,
    #[serde(rename = "duration")]
    pub duration_secs: f64,
    pub error: Option<String>,
}
