//! Plan-scoped quota limits.

use serde::{Deserialize, Serialize};

/// Plan tier, used by both the quota store and the sandbox policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanTier {
    Starter,
    Team,
    Business,
    Enterprise,
}

impl Default for PlanTier {
    fn default() -> Self {
        PlanTier::Starter
    }
}

impl std::str::FromStr for PlanTier {
    type Err = std::convert::Infallible;

    /// Unknown tiers default to `starter`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "team" => PlanTier::Team,
            "business" => PlanTier::Business,
            "enterprise" => PlanTier::Enterprise,
            _ => PlanTier::Starter,
        })
    }
}

impl std::fmt::Display for PlanTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PlanTier::Starter => "starter",
            PlanTier::Team => "team",
            PlanTier::Business => "business",
            PlanTier::Enterprise => "enterprise",
        };
        write!(f, "{s}")
    }
}

/// Sentinel for "no monthly cap".
pub const UNLIMITED: i64 = -1;

/// Resolved, fully-populated quota for a tenant. Defaults are applied for
/// nullable columns rather than leaving them absent.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Quota {
    pub tier: PlanTier,
    pub max_concurrent_deployments: i64,
    pub max_deployments_per_month: i64,
    pub cpu_cores_per_container: f64,
    pub memory_mb_per_container: i64,
    pub max_environments: i64,
    pub max_preview_environments: i64,
    pub rollback_retention_days: i64,
}

impl Default for Quota {
    /// concurrent=1, monthly=unlimited, CPU=2 cores, memory=1GiB.
    fn default() -> Self {
        Self {
            tier: PlanTier::Starter,
            max_concurrent_deployments: 1,
            max_deployments_per_month: UNLIMITED,
            cpu_cores_per_container: 2.0,
            memory_mb_per_container: 1024,
            max_environments: 1,
            max_preview_environments: 0,
            rollback_retention_days: 7,
        }
    }
}

impl Quota {
    pub fn monthly_is_unlimited(&self) -> bool {
        self.max_deployments_per_month == UNLIMITED
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_tier_defaults_to_starter() {
        let tier: PlanTier = "platinum".parse().unwrap();
        assert_eq!(tier, PlanTier::Starter);
    }

    #[test]
    fn default_quota_uses_starter_limits() {
        let q = Quota::default();
        assert_eq!(q.max_concurrent_deployments, 1);
        assert!(q.monthly_is_unlimited());
        assert_eq!(q.cpu_cores_per_container, 2.0);
        assert_eq!(q.memory_mb_per_container, 1024);
    }
}
