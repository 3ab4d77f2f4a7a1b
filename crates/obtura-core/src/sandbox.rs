//! Sandbox policy: a deterministic `(plan tier, environment) ->
//! SandboxProfile` mapping. Pure, no I/O, no async, easy to unit test
//! exhaustively.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::deployment::Environment;
use crate::quota::PlanTier;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceCaps {
    pub cpu_quota: f64,
    pub memory_limit_mb: i64,
    pub pids_limit: i64,
    pub storage_limit_mb: i64,
    pub allowed_ports: Vec<u16>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkPolicy {
    pub bridge_network: String,
    pub dns_servers: Vec<String>,
    pub publish_to_host: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityPolicy {
    pub no_new_privileges: bool,
    pub read_only_root: bool,
    pub capabilities_drop_all: bool,
    pub capabilities_add: Vec<String>,
    pub masked_paths: Vec<String>,
    pub read_only_paths: Vec<String>,
    pub tmpfs_mounts: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxProfile {
    pub resources: ResourceCaps,
    pub network: NetworkPolicy,
    pub security: SecurityPolicy,
    pub startup_timeout: Duration,
}

/// Cap multiplier per tier; monotonically increasing with tier.
fn tier_multiplier(tier: PlanTier) -> f64 {
    match tier {
        PlanTier::Starter => 1.0,
        PlanTier::Team => 2.0,
        PlanTier::Business => 4.0,
        PlanTier::Enterprise => 8.0,
    }
}

const BASE_CPU_QUOTA: f64 = 0.5;
const BASE_MEMORY_MB: i64 = 256;
const BASE_PIDS_LIMIT: i64 = 128;
const BASE_STORAGE_MB: i64 = 512;

/// Operator-tunable baseline resource ceilings (`SystemConfig::sandbox`),
/// multiplied by the plan tier's factor the same way the built-in defaults
/// are. Lets an operator raise or lower every tier's ceiling by editing one
/// KDL section instead of shipping a new build.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SandboxOverrides {
    pub base_cpu_quota: f64,
    pub base_memory_mb: i64,
    pub base_pids_limit: i64,
    pub base_storage_mb: i64,
}

impl Default for SandboxOverrides {
    fn default() -> Self {
        Self {
            base_cpu_quota: BASE_CPU_QUOTA,
            base_memory_mb: BASE_MEMORY_MB,
            base_pids_limit: BASE_PIDS_LIMIT,
            base_storage_mb: BASE_STORAGE_MB,
        }
    }
}

/// Resolve the sandbox profile for a (plan tier, environment) pair. Unknown
/// tiers are normalized to `starter` by `PlanTier::from_str` upstream, so
/// this function only ever sees the four known tiers. `overrides` carries
/// the baseline ceilings before the tier multiplier is applied; pass
/// `&SandboxOverrides::default()` to use the built-in baseline.
pub fn resolve_sandbox_profile(
    tier: PlanTier,
    environment: Environment,
    project_id: &str,
    overrides: &SandboxOverrides,
) -> SandboxProfile {
    let m = tier_multiplier(tier);

    let resources = ResourceCaps {
        cpu_quota: overrides.base_cpu_quota * m,
        memory_limit_mb: (overrides.base_memory_mb as f64 * m) as i64,
        pids_limit: (overrides.base_pids_limit as f64 * m) as i64,
        storage_limit_mb: (overrides.base_storage_mb as f64 * m) as i64,
        allowed_ports: (9100..9900).collect(),
    };

    let network = NetworkPolicy {
        bridge_network: format!("obtura-{project_id}"),
        dns_servers: vec!["1.1.1.1".to_string(), "8.8.8.8".to_string()],
        publish_to_host: true,
    };

    let security = SecurityPolicy {
        no_new_privileges: true,
        read_only_root: false,
        capabilities_drop_all: true,
        capabilities_add: vec![
            "CHOWN".to_string(),
            "DAC_OVERRIDE".to_string(),
            "SETUID".to_string(),
            "SETGID".to_string(),
            "NET_BIND_SERVICE".to_string(),
        ],
        masked_paths: vec![
            "/proc/acpi".to_string(),
            "/proc/kcore".to_string(),
            "/proc/keys".to_string(),
            "/sys/firmware".to_string(),
        ],
        read_only_paths: vec!["/proc/bus".to_string(), "/proc/sys".to_string()],
        tmpfs_mounts: vec![
            "/tmp".to_string(),
            "/var/tmp".to_string(),
            "/var/run".to_string(),
            "/var/cache".to_string(),
        ],
    };

    let startup_timeout = if environment.requires_approval() {
        Duration::from_secs(180)
    } else {
        Duration::from_secs(60)
    };

    SandboxProfile {
        resources,
        network,
        security,
        startup_timeout,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caps_increase_monotonically_with_tier() {
        let overrides = SandboxOverrides::default();
        let starter = resolve_sandbox_profile(PlanTier::Starter, Environment::Staging, "p1", &overrides);
        let team = resolve_sandbox_profile(PlanTier::Team, Environment::Staging, "p1", &overrides);
        let business = resolve_sandbox_profile(PlanTier::Business, Environment::Staging, "p1", &overrides);
        let enterprise = resolve_sandbox_profile(PlanTier::Enterprise, Environment::Staging, "p1", &overrides);

        assert!(starter.resources.memory_limit_mb < team.resources.memory_limit_mb);
        assert!(team.resources.memory_limit_mb < business.resources.memory_limit_mb);
        assert!(business.resources.memory_limit_mb < enterprise.resources.memory_limit_mb);
    }

    #[test]
    fn production_gets_longer_startup_timeout() {
        let overrides = SandboxOverrides::default();
        let prod = resolve_sandbox_profile(PlanTier::Starter, Environment::Production, "p1", &overrides);
        let staging = resolve_sandbox_profile(PlanTier::Starter, Environment::Staging, "p1", &overrides);
        assert_eq!(prod.startup_timeout.as_secs(), 180);
        assert_eq!(staging.startup_timeout.as_secs(), 60);
    }

    #[test]
    fn capability_set_matches_spec() {
        let profile = resolve_sandbox_profile(PlanTier::Starter, Environment::Preview, "p1", &SandboxOverrides::default());
        assert!(profile.security.capabilities_drop_all);
        assert_eq!(
            profile.security.capabilities_add,
            vec!["CHOWN", "DAC_OVERRIDE", "SETUID", "SETGID", "NET_BIND_SERVICE"]
        );
        assert!(!profile.security.read_only_root);
        assert!(profile.security.no_new_privileges);
    }

    #[test]
    fn is_deterministic() {
        let overrides = SandboxOverrides::default();
        let a = resolve_sandbox_profile(PlanTier::Business, Environment::Production, "proj", &overrides);
        let b = resolve_sandbox_profile(PlanTier::Business, Environment::Production, "proj", &overrides);
        assert_eq!(a.resources.memory_limit_mb, b.resources.memory_limit_mb);
        assert_eq!(a.network.bridge_network, b.network.bridge_network);
    }

    #[test]
    fn override_raises_baseline_before_tier_multiplier() {
        let doubled = SandboxOverrides {
            base_memory_mb: BASE_MEMORY_MB * 2,
            ..SandboxOverrides::default()
        };
        let default_profile = resolve_sandbox_profile(PlanTier::Team, Environment::Staging, "p1", &SandboxOverrides::default());
        let overridden_profile = resolve_sandbox_profile(PlanTier::Team, Environment::Staging, "p1", &doubled);
        assert_eq!(overridden_profile.resources.memory_limit_mb, default_profile.resources.memory_limit_mb * 2);
    }
}
