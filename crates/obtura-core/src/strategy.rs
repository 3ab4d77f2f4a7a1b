//! Strategy state machine types: phases, groups, and the per-deployment
//! progress row they describe.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ResourceId;
use crate::deployment::Strategy;

/// A deployment group label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Group {
    Blue,
    Green,
    Stable,
    Canary,
}

impl Group {
    /// The successor deployment always uses the opposite group.
    pub fn opposite(self) -> Group {
        match self {
            Group::Blue => Group::Green,
            Group::Green => Group::Blue,
            // Rolling/canary never flip; calling opposite() on them is a
            // logic error in the caller, but default to themselves rather
            // than panic.
            other => other,
        }
    }
}

impl std::fmt::Display for Group {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Group::Blue => "blue",
            Group::Green => "green",
            Group::Stable => "stable",
            Group::Canary => "canary",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for Group {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "blue" => Ok(Group::Blue),
            "green" => Ok(Group::Green),
            "stable" => Ok(Group::Stable),
            "canary" => Ok(Group::Canary),
            other => Err(crate::Error::InvalidInput(format!("unknown group: {other}"))),
        }
    }
}

/// One step of a strategy's state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Preparing,
    DeployingNew,
    HealthChecking,
    SwitchingTraffic,
    DrainingOld,
    Monitoring,
    Completed,
    Failed,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Completed | Phase::Failed)
    }

    /// Rank enforcing the partial order:
    /// {preparing} < {deploying_new, ..., monitoring} < {completed, failed}.
    fn rank(self) -> u8 {
        match self {
            Phase::Preparing => 0,
            Phase::DeployingNew
            | Phase::HealthChecking
            | Phase::SwitchingTraffic
            | Phase::DrainingOld
            | Phase::Monitoring => 1,
            Phase::Completed | Phase::Failed => 2,
        }
    }

    /// Whether advancing from `self` to `next` is monotone. Terminal phases
    /// never advance further; same-phase "advances" are not monotone moves
    /// (the caller should only call this across a genuine transition).
    pub fn is_monotone_advance_to(self, next: Phase) -> bool {
        if self.is_terminal() {
            return false;
        }
        next.rank() >= self.rank()
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Phase::Preparing => "preparing",
            Phase::DeployingNew => "deploying_new",
            Phase::HealthChecking => "health_checking",
            Phase::SwitchingTraffic => "switching_traffic",
            Phase::DrainingOld => "draining_old",
            Phase::Monitoring => "monitoring",
            Phase::Completed => "completed",
            Phase::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for Phase {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "preparing" => Phase::Preparing,
            "deploying_new" => Phase::DeployingNew,
            "health_checking" => Phase::HealthChecking,
            "switching_traffic" => Phase::SwitchingTraffic,
            "draining_old" => Phase::DrainingOld,
            "monitoring" => Phase::Monitoring,
            "completed" => Phase::Completed,
            "failed" => Phase::Failed,
            other => {
                return Err(crate::Error::InvalidInput(format!(
                    "unknown phase: {other}"
                )));
            }
        })
    }
}

/// One row per deployment tracking strategy rollout progress.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyState {
    pub deployment_id: ResourceId,
    pub strategy: Strategy,
    pub current_phase: Phase,
    pub active_group: Option<Group>,
    pub standby_group: Option<Group>,
    pub total_batches: Option<i32>,
    pub current_batch: Option<i32>,
    pub batch_size: Option<i32>,
    pub canary_traffic_percentage: Option<i32>,
    pub canary_duration_minutes: Option<i32>,
    pub total_replicas: i32,
    pub healthy_replicas: i32,
    pub unhealthy_replicas: i32,
    pub phase_started_at: DateTime<Utc>,
    pub phase_updated_at: DateTime<Utc>,
}

/// Append-only phase transition audit row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseTransition {
    pub deployment_id: ResourceId,
    pub from_phase: Option<Phase>,
    pub to_phase: Phase,
    pub at: DateTime<Utc>,
}
