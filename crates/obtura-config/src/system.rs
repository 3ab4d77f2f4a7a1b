//! System-wide configuration: connection info, port pool, and the canary
//! analysis thresholds, kept configurable rather than hardcoded so operators
//! can tune them per deployment without a rebuild.

use kdl::KdlDocument;
use obtura_core::sandbox::SandboxOverrides;
use serde::{Deserialize, Serialize};

use crate::{ConfigError, ConfigResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimiterConfig {
    pub concurrent_ttl_secs: u64,
    pub monthly_ttl_secs: u64,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            concurrent_ttl_secs: 2400,
            monthly_ttl_secs: 60 * 24 * 3600,
        }
    }
}

/// Canary analysis thresholds. Kept as config rather than constants so
/// error-rate and latency tolerances can be tuned without a redeploy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CanaryThresholds {
    pub max_error_rate_percent: f64,
    pub max_avg_latency_ms: f64,
    pub monitoring_duration_minutes: u64,
}

impl Default for CanaryThresholds {
    fn default() -> Self {
        Self {
            max_error_rate_percent: 5.0,
            max_avg_latency_ms: 1000.0,
            monitoring_duration_minutes: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortPoolConfig {
    pub range_start: u16,
    pub range_end: u16,
}

impl Default for PortPoolConfig {
    fn default() -> Self {
        Self {
            range_start: 9100,
            range_end: 9900,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    pub rules_dir: String,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            rules_dir: "/etc/traefik/dynamic".to_string(),
        }
    }
}

/// System-wide configuration for the deployment core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemConfig {
    pub multi_tenant: bool,
    pub rate_limiter: RateLimiterConfig,
    pub canary: CanaryThresholds,
    pub ports: PortPoolConfig,
    pub router: RouterConfig,
    pub sandbox: SandboxOverrides,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            multi_tenant: true,
            rate_limiter: RateLimiterConfig::default(),
            canary: CanaryThresholds::default(),
            ports: PortPoolConfig::default(),
            router: RouterConfig::default(),
            sandbox: SandboxOverrides::default(),
        }
    }
}

fn node_entry_f64(doc: &KdlDocument, node_name: &str) -> Option<f64> {
    doc.get(node_name)
        .and_then(|n| n.entries().first())
        .and_then(|e| e.value().as_float().or_else(|| e.value().as_integer().map(|i| i as f64)))
}

fn node_entry_i64(doc: &KdlDocument, node_name: &str) -> Option<i64> {
    doc.get(node_name)
        .and_then(|n| n.entries().first())
        .and_then(|e| e.value().as_integer())
}

fn node_entry_bool(doc: &KdlDocument, node_name: &str) -> Option<bool> {
    doc.get(node_name)
        .and_then(|n| n.entries().first())
        .and_then(|e| e.value().as_bool())
}

fn node_entry_string(doc: &KdlDocument, node_name: &str) -> Option<String> {
    doc.get(node_name)
        .and_then(|n| n.entries().first())
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

fn child_doc<'a>(doc: &'a KdlDocument, node_name: &str) -> Option<&'a KdlDocument> {
    doc.get(node_name).and_then(|n| n.children())
}

/// Parse system configuration from KDL text. Every section is optional;
/// absent sections fall back to `Default`.
pub fn parse_system_config(kdl: &str) -> ConfigResult<SystemConfig> {
    let doc: KdlDocument = kdl.parse()?;
    let mut config = SystemConfig::default();

    if let Some(v) = node_entry_bool(&doc, "multi_tenant") {
        config.multi_tenant = v;
    }

    if let Some(rl) = child_doc(&doc, "rate_limiter") {
        if let Some(v) = node_entry_i64(rl, "concurrent_ttl_secs") {
            config.rate_limiter.concurrent_ttl_secs = v as u64;
        }
        if let Some(v) = node_entry_i64(rl, "monthly_ttl_secs") {
            config.rate_limiter.monthly_ttl_secs = v as u64;
        }
    }

    if let Some(canary) = child_doc(&doc, "canary") {
        if let Some(v) = node_entry_f64(canary, "error_rate_threshold_percent") {
            config.canary.max_error_rate_percent = v;
        }
        if let Some(v) = node_entry_f64(canary, "latency_threshold_ms") {
            config.canary.max_avg_latency_ms = v;
        }
        if let Some(v) = node_entry_i64(canary, "monitoring_duration_minutes") {
            config.canary.monitoring_duration_minutes = v as u64;
        }
    }

    if let Some(ports) = child_doc(&doc, "ports") {
        if let Some(v) = node_entry_i64(ports, "range_start") {
            config.ports.range_start = v as u16;
        }
        if let Some(v) = node_entry_i64(ports, "range_end") {
            config.ports.range_end = v as u16;
        }
        if config.ports.range_start >= config.ports.range_end {
            return Err(ConfigError::InvalidValue {
                field: "ports".to_string(),
                message: "range_start must be less than range_end".to_string(),
            });
        }
    }

    if let Some(router) = child_doc(&doc, "router") {
        if let Some(v) = node_entry_string(router, "rules_dir") {
            config.router.rules_dir = v;
        }
    }

    if let Some(sandbox) = child_doc(&doc, "sandbox") {
        if let Some(v) = node_entry_f64(sandbox, "base_cpu_quota") {
            config.sandbox.base_cpu_quota = v;
        }
        if let Some(v) = node_entry_i64(sandbox, "base_memory_mb") {
            config.sandbox.base_memory_mb = v;
        }
        if let Some(v) = node_entry_i64(sandbox, "base_pids_limit") {
            config.sandbox.base_pids_limit = v;
        }
        if let Some(v) = node_entry_i64(sandbox, "base_storage_mb") {
            config.sandbox.base_storage_mb = v;
        }
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_document() {
        let kdl = r#"
            multi_tenant #true

            rate_limiter {
                concurrent_ttl_secs 3600
                monthly_ttl_secs 5184000
            }

            canary {
                error_rate_threshold_percent 7.5
                latency_threshold_ms 800
                monitoring_duration_minutes 10
            }

            ports {
                range_start 9200
                range_end 9800
            }

            router {
                rules_dir "/etc/obtura/router"
            }

            sandbox {
                base_cpu_quota 1.0
                base_memory_mb 512
                base_pids_limit 256
                base_storage_mb 1024
            }
        "#;

        let config = parse_system_config(kdl).unwrap();
        assert!(config.multi_tenant);
        assert_eq!(config.rate_limiter.concurrent_ttl_secs, 3600);
        assert_eq!(config.canary.max_error_rate_percent, 7.5);
        assert_eq!(config.canary.monitoring_duration_minutes, 10);
        assert_eq!(config.ports.range_start, 9200);
        assert_eq!(config.router.rules_dir, "/etc/obtura/router");
        assert_eq!(config.sandbox.base_cpu_quota, 1.0);
        assert_eq!(config.sandbox.base_memory_mb, 512);
    }

    #[test]
    fn missing_sections_fall_back_to_defaults() {
        let config = parse_system_config("multi_tenant #true").unwrap();
        assert_eq!(config.canary.max_error_rate_percent, 5.0);
        assert_eq!(config.ports.range_start, 9100);
        assert_eq!(config.sandbox.base_memory_mb, 256);
    }

    #[test]
    fn rejects_inverted_port_range() {
        let kdl = "ports {\n range_start 9900\n range_end 9100\n}";
        assert!(parse_system_config(kdl).is_err());
    }
}
