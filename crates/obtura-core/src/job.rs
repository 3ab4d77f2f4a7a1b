//! Inbound deploy job: the trigger envelope and its normalized form.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::ResourceId;
use crate::deployment::{Environment, Strategy};

/// The deploy trigger envelope received on `obtura.deploys` / `deploy.triggered`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployEnvelope {
    #[serde(rename = "buildId")]
    pub build_id: ResourceId,
    #[serde(rename = "deploymentId")]
    pub deployment_id: ResourceId,
    #[serde(rename = "projectId")]
    pub project_id: ResourceId,
    pub project: EnvelopeProject,
    pub build: EnvelopeBuild,
    pub deployment: EnvelopeDeployment,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvelopeProject {
    pub id: ResourceId,
    pub slug: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvelopeBuild {
    pub id: ResourceId,
    #[serde(rename = "imageTags")]
    pub image_tags: Vec<String>,
    pub branch: Option<String>,
    #[serde(rename = "commitHash")]
    pub commit_hash: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvelopeDeployment {
    pub id: ResourceId,
    pub environment: String,
    pub domain: Option<String>,
    pub subdomain: Option<String>,
}

impl DeployEnvelope {
    /// buildId, deploymentId, projectId, at least one imageTags entry, and
    /// environment are all required.
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.build.image_tags.is_empty() {
            return Err(crate::Error::InvalidInput(
                "build.imageTags must contain at least one tag".to_string(),
            ));
        }
        if self.deployment.environment.is_empty() {
            return Err(crate::Error::InvalidInput(
                "deployment.environment is required".to_string(),
            ));
        }
        self.deployment
            .environment
            .parse::<Environment>()
            .map_err(|_| {
                crate::Error::InvalidInput(format!(
                    "unknown environment: {}",
                    self.deployment.environment
                ))
            })?;
        Ok(())
    }
}

/// The normalized job the orchestrator consumes: defaults applied, strategy
/// resolved, replica count normalized.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub project_id: ResourceId,
    pub build_id: ResourceId,
    pub image_tag: String,
    pub deployment_id: ResourceId,
    pub environment: Environment,
    pub strategy: Strategy,
    pub replica_count: u32,
    pub domain: Option<String>,
    pub subdomain: Option<String>,
    pub config: HashMap<String, String>,
    /// The raw architecture blob attached to the build, handed to the
    /// dependency detector. Absent/empty when the build carries none.
    pub build_metadata: serde_json::Value,
}

impl Job {
    /// Build a `Job` from the wire envelope plus the deployment row's
    /// requested strategy/replica_count (empty strategy -> blue_green,
    /// zero replicas -> 1).
    pub fn from_envelope(
        envelope: &DeployEnvelope,
        requested_strategy: Strategy,
        requested_replicas: u32,
    ) -> Result<Self, crate::Error> {
        envelope.validate()?;
        let environment: Environment = envelope.deployment.environment.parse()?;
        let image_tag = envelope
            .build
            .image_tags
            .first()
            .cloned()
            .ok_or_else(|| crate::Error::InvalidInput("missing image tag".to_string()))?;

        Ok(Job {
            project_id: envelope.project_id,
            build_id: envelope.build_id,
            image_tag,
            deployment_id: envelope.deployment_id,
            environment,
            strategy: requested_strategy,
            replica_count: crate::deployment::Deployment::normalize_replica_count(requested_replicas),
            domain: envelope.deployment.domain.clone(),
            subdomain: envelope.deployment.subdomain.clone(),
            config: HashMap::new(),
            build_metadata: envelope.build.metadata.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_envelope() -> DeployEnvelope {
        DeployEnvelope {
            build_id: ResourceId::new(),
            deployment_id: ResourceId::new(),
            project_id: ResourceId::new(),
            project: EnvelopeProject {
                id: ResourceId::new(),
                slug: "acme".into(),
                name: "Acme".into(),
            },
            build: EnvelopeBuild {
                id: ResourceId::new(),
                image_tags: vec!["acme/web:sha123".into()],
                branch: Some("main".into()),
                commit_hash: Some("sha123".into()),
                metadata: serde_json::json!({}),
            },
            deployment: EnvelopeDeployment {
                id: ResourceId::new(),
                environment: "production".into(),
                domain: Some("acme.example.com".into()),
                subdomain: None,
            },
        }
    }

    #[test]
    fn validate_rejects_missing_image_tags() {
        let mut e = sample_envelope();
        e.build.image_tags.clear();
        assert!(e.validate().is_err());
    }

    #[test]
    fn from_envelope_normalizes_zero_replicas() {
        let e = sample_envelope();
        let job = Job::from_envelope(&e, Strategy::BlueGreen, 0).unwrap();
        assert_eq!(job.replica_count, 1);
        assert_eq!(job.image_tag, "acme/web:sha123");
        assert_eq!(job.environment, Environment::Production);
    }
}
