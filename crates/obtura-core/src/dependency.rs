//! Dependency detector: a pure function reading the architecture blob
//! attached to a build and extracting the services/databases it declares.
//! No I/O -- the orchestrator persists whatever this returns.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyKind {
    Service,
    Database,
    Cache,
    Queue,
    Unknown,
}

impl std::str::FromStr for DependencyKind {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "service" => DependencyKind::Service,
            "database" | "db" => DependencyKind::Database,
            "cache" => DependencyKind::Cache,
            "queue" | "mq" => DependencyKind::Queue,
            _ => DependencyKind::Unknown,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectedDependency {
    pub name: String,
    pub kind: DependencyKind,
}

/// Reads `metadata.dependencies` (an array of `{name, kind}` objects) off
/// the build's architecture blob. Any other shape -- missing field, wrong
/// type, malformed entries -- yields an empty list rather than an error;
/// dependency detection augments the deployment record, it never blocks it.
pub fn detect_dependencies(metadata: &serde_json::Value) -> Vec<DetectedDependency> {
    let Some(entries) = metadata.get("dependencies").and_then(|v| v.as_array()) else {
        return Vec::new();
    };

    entries
        .iter()
        .filter_map(|entry| {
            let name = entry.get("name")?.as_str()?.to_string();
            let kind = entry
                .get("kind")
                .and_then(|v| v.as_str())
                .and_then(|s| s.parse::<DependencyKind>().ok())
                .unwrap_or(DependencyKind::Unknown);
            Some(DetectedDependency { name, kind })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_declared_dependencies() {
        let metadata = serde_json::json!({
            "dependencies": [
                { "name": "postgres", "kind": "database" },
                { "name": "redis", "kind": "cache" },
            ]
        });
        let deps = detect_dependencies(&metadata);
        assert_eq!(deps.len(), 2);
        assert_eq!(deps[0].name, "postgres");
        assert_eq!(deps[0].kind, DependencyKind::Database);
    }

    #[test]
    fn missing_dependencies_field_yields_empty() {
        assert!(detect_dependencies(&serde_json::json!({})).is_empty());
    }

    #[test]
    fn malformed_entries_are_skipped_not_fatal() {
        let metadata = serde_json::json!({
            "dependencies": [
                { "kind": "database" },
                { "name": "svc-a" },
                "not-an-object",
            ]
        });
        let deps = detect_dependencies(&metadata);
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].name, "svc-a");
        assert_eq!(deps[0].kind, DependencyKind::Unknown);
    }
}
