//! Edge router rule programmer.
//!
//! Writes one YAML rule file per container to a watched directory; the
//! router process (Traefik-compatible file provider) picks up changes on
//! its own poll interval. No process is talked to directly -- the
//! directory of declarative files is the source of truth, not an API call.

use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("failed to write rule file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to remove rule file {path}: {source}")]
    Remove {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize rule for {container}: {source}")]
    Serialize {
        container: String,
        #[source]
        source: serde_yaml::Error,
    },
}

pub type Result<T> = std::result::Result<T, RouterError>;

/// One container's routing rule: a host-matched HTTP router pointing at a
/// single backend, with a passive health check.
#[derive(Debug, Clone)]
pub struct RouteRule {
    pub container_name: String,
    pub fqdn: String,
    pub backend_host: String,
    pub backend_port: u16,
    pub health_check_path: String,
}

#[derive(Debug, Serialize)]
struct RuleFile {
    http: HttpSection,
}

#[derive(Debug, Serialize)]
struct HttpSection {
    routers: std::collections::BTreeMap<String, RouterEntry>,
    services: std::collections::BTreeMap<String, ServiceEntry>,
}

#[derive(Debug, Serialize)]
struct RouterEntry {
    rule: String,
    service: String,
}

#[derive(Debug, Serialize)]
struct ServiceEntry {
    #[serde(rename = "loadBalancer")]
    load_balancer: LoadBalancer,
}

#[derive(Debug, Serialize)]
struct LoadBalancer {
    servers: Vec<Server>,
    #[serde(rename = "healthCheck")]
    health_check: HealthCheck,
}

#[derive(Debug, Serialize)]
struct Server {
    url: String,
}

#[derive(Debug, Serialize)]
struct HealthCheck {
    path: String,
    interval: String,
}

fn rule_file_for(rule: &RouteRule) -> RuleFile {
    let service_name = format!("{}-svc", rule.container_name);
    let mut routers = std::collections::BTreeMap::new();
    routers.insert(
        rule.container_name.clone(),
        RouterEntry {
            rule: format!("Host(`{}`)", rule.fqdn),
            service: service_name.clone(),
        },
    );

    let mut services = std::collections::BTreeMap::new();
    services.insert(
        service_name,
        ServiceEntry {
            load_balancer: LoadBalancer {
                servers: vec![Server {
                    url: format!("http://{}:{}", rule.backend_host, rule.backend_port),
                }],
                health_check: HealthCheck {
                    path: rule.health_check_path.clone(),
                    interval: "10s".to_string(),
                },
            },
        },
    );

    RuleFile {
        http: HttpSection { routers, services },
    }
}

/// Writes and removes per-container rule files under a configured
/// directory. One file per container name (`<container_name>.yml`), so
/// removal is O(1) given the name.
pub struct FileRouterProgrammer {
    rules_dir: PathBuf,
}

impl FileRouterProgrammer {
    pub fn new(rules_dir: impl Into<PathBuf>) -> Self {
        Self {
            rules_dir: rules_dir.into(),
        }
    }

    fn path_for(&self, container_name: &str) -> PathBuf {
        self.rules_dir.join(format!("{container_name}.yml"))
    }

    /// Write (or overwrite) the rule file for a container.
    pub fn program(&self, rule: &RouteRule) -> Result<()> {
        let file = rule_file_for(rule);
        let yaml = serde_yaml::to_string(&file).map_err(|source| RouterError::Serialize {
            container: rule.container_name.clone(),
            source,
        })?;

        let path = self.path_for(&rule.container_name);
        std::fs::create_dir_all(&self.rules_dir).map_err(|source| RouterError::Write {
            path: path.clone(),
            source,
        })?;
        std::fs::write(&path, yaml).map_err(|source| RouterError::Write { path: path.clone(), source })?;

        info!(container = %rule.container_name, path = %path.display(), "programmed router rule");
        Ok(())
    }

    /// Remove the rule file for a container. Absence is not an error.
    pub fn remove(&self, container_name: &str) -> Result<()> {
        let path = self.path_for(container_name);
        match std::fs::remove_file(&path) {
            Ok(()) => {
                debug!(container = %container_name, path = %path.display(), "removed router rule");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(container = %container_name, "remove: rule file already absent");
                Ok(())
            }
            Err(source) => Err(RouterError::Remove { path, source }),
        }
    }

    pub fn rules_dir(&self) -> &Path {
        &self.rules_dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_rule() -> RouteRule {
        RouteRule {
            container_name: "myapp-prod-blue-0".to_string(),
            fqdn: "myapp.example.com".to_string(),
            backend_host: "127.0.0.1".to_string(),
            backend_port: 9123,
            health_check_path: "/health".to_string(),
        }
    }

    #[test]
    fn program_writes_one_file_per_container_name() {
        let dir = tempfile::tempdir().unwrap();
        let programmer = FileRouterProgrammer::new(dir.path());
        let rule = sample_rule();

        programmer.program(&rule).unwrap();

        let expected = dir.path().join("myapp-prod-blue-0.yml");
        assert!(expected.exists());
        let contents = std::fs::read_to_string(&expected).unwrap();
        assert!(contents.contains("Host(`myapp.example.com`)"));
        assert!(contents.contains("http://127.0.0.1:9123"));
    }

    #[test]
    fn program_overwrites_existing_rule() {
        let dir = tempfile::tempdir().unwrap();
        let programmer = FileRouterProgrammer::new(dir.path());
        let mut rule = sample_rule();
        programmer.program(&rule).unwrap();

        rule.backend_port = 9999;
        programmer.program(&rule).unwrap();

        let contents =
            std::fs::read_to_string(dir.path().join("myapp-prod-blue-0.yml")).unwrap();
        assert!(contents.contains("9999"));
        assert!(!contents.contains("9123"));
    }

    #[test]
    fn remove_deletes_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let programmer = FileRouterProgrammer::new(dir.path());
        let rule = sample_rule();
        programmer.program(&rule).unwrap();

        programmer.remove(&rule.container_name).unwrap();

        assert!(!dir.path().join("myapp-prod-blue-0.yml").exists());
    }

    #[test]
    fn remove_is_idempotent_when_file_absent() {
        let dir = tempfile::tempdir().unwrap();
        let programmer = FileRouterProgrammer::new(dir.path());
        assert!(programmer.remove("never-existed").is_ok());
    }

    #[test]
    fn creates_rules_dir_if_missing() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("nested").join("dynamic");
        let programmer = FileRouterProgrammer::new(&nested);
        programmer.program(&sample_rule()).unwrap();
        assert!(nested.join("myapp-prod-blue-0.yml").exists());
    }
}
