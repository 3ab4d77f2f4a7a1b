use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use obtura_core::ResourceId;
use obtura_core::dependency::DetectedDependency;
use obtura_core::deployment::{Deployment, DeploymentStatus, Environment, Strategy};

use crate::error::{DbError, DbResult};

#[derive(sqlx::FromRow)]
struct DeploymentRow {
    id: Uuid,
    project_id: Uuid,
    environment: String,
    image_tag: String,
    strategy: String,
    replica_count: i32,
    domain: Option<String>,
    subdomain: Option<String>,
    triggered_by: Option<Uuid>,
    status: String,
    approval_required: bool,
    preview_expires_at: Option<DateTime<Utc>>,
    error_message: Option<String>,
    rolled_back_from_deployment_id: Option<Uuid>,
    detected_dependencies: serde_json::Value,
    deployment_started_at: Option<DateTime<Utc>>,
    deployment_completed_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<DeploymentRow> for Deployment {
    type Error = DbError;

    fn try_from(row: DeploymentRow) -> Result<Self, Self::Error> {
        Ok(Deployment {
            id: ResourceId::from(row.id),
            project_id: ResourceId::from(row.project_id),
            environment: row
                .environment
                .parse()
                .map_err(|_| DbError::NotFound("unreadable environment column".into()))?,
            image_tag: row.image_tag,
            strategy: row
                .strategy
                .parse()
                .map_err(|_| DbError::NotFound("unreadable strategy column".into()))?,
            replica_count: row.replica_count.max(0) as u32,
            domain: row.domain,
            subdomain: row.subdomain,
            triggered_by: row.triggered_by.map(ResourceId::from),
            status: parse_status(&row.status)?,
            approval_required: row.approval_required,
            preview_expires_at: row.preview_expires_at,
            error_message: row.error_message,
            rolled_back_from_deployment_id: row.rolled_back_from_deployment_id.map(ResourceId::from),
            // Malformed/legacy rows degrade to an empty list rather than
            // failing the whole read -- dependency detection augments the
            // record, it never gates access to it.
            detected_dependencies: serde_json::from_value(row.detected_dependencies).unwrap_or_default(),
            deployment_started_at: row.deployment_started_at,
            deployment_completed_at: row.deployment_completed_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn parse_status(s: &str) -> DbResult<DeploymentStatus> {
    Ok(match s {
        "pending" => DeploymentStatus::Pending,
        "deploying" => DeploymentStatus::Deploying,
        "active" => DeploymentStatus::Active,
        "failed" => DeploymentStatus::Failed,
        "rolled_back" => DeploymentStatus::RolledBack,
        "terminated" => DeploymentStatus::Terminated,
        other => return Err(DbError::NotFound(format!("unknown status column value: {other}"))),
    })
}

#[async_trait]
pub trait DeploymentRepo: Send + Sync {
    async fn create(
        &self,
        project_id: ResourceId,
        environment: Environment,
        image_tag: &str,
        strategy: Strategy,
        replica_count: u32,
        domain: Option<&str>,
        subdomain: Option<&str>,
        triggered_by: Option<ResourceId>,
        approval_required: bool,
    ) -> DbResult<Deployment>;

    async fn get(&self, id: ResourceId) -> DbResult<Deployment>;

    /// Persists the dependency detector's output on the deployment row.
    async fn record_detected_dependencies(
        &self,
        id: ResourceId,
        dependencies: &[DetectedDependency],
    ) -> DbResult<()>;

    /// Monotonic status write. Callers must already know the transition is
    /// legal (`DeploymentStatus::can_transition_to`); this layer just persists.
    async fn update_status(
        &self,
        id: ResourceId,
        status: DeploymentStatus,
        error_message: Option<&str>,
    ) -> DbResult<()>;

    async fn mark_deploying(&self, id: ResourceId) -> DbResult<()>;

    async fn mark_active(&self, id: ResourceId) -> DbResult<()>;

    /// Stamps `id` (the deployment being rolled back) with the deployment it
    /// was rolled back to.
    async fn record_rollback_target(&self, id: ResourceId, rolled_back_from: ResourceId) -> DbResult<()>;

    /// All deployments currently `active` for the same (project, environment)
    /// pair as `id`, excluding `id` itself -- used to find the prior active
    /// deployment that a new rollout should eventually supersede/terminate.
    async fn list_prior_active(&self, id: ResourceId) -> DbResult<Vec<Deployment>>;

    /// Count of deployments not yet in a terminal status for a tenant,
    /// across all of its projects -- backs the concurrent-deployment quota.
    async fn count_in_flight_for_tenant(&self, tenant_id: ResourceId) -> DbResult<i64>;

    /// Count of deployments created for a tenant since `since` -- backs the
    /// monthly deployment quota.
    async fn count_since_for_tenant(&self, tenant_id: ResourceId, since: DateTime<Utc>) -> DbResult<i64>;
}

pub struct PgDeploymentRepo {
    pool: PgPool,
}

impl PgDeploymentRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DeploymentRepo for PgDeploymentRepo {
    async fn create(
        &self,
        project_id: ResourceId,
        environment: Environment,
        image_tag: &str,
        strategy: Strategy,
        replica_count: u32,
        domain: Option<&str>,
        subdomain: Option<&str>,
        triggered_by: Option<ResourceId>,
        approval_required: bool,
    ) -> DbResult<Deployment> {
        let id = ResourceId::new();
        let row = sqlx::query_as::<_, DeploymentRow>(
            r#"
            INSERT INTO deployments (
                id, project_id, environment, image_tag, strategy, replica_count,
                domain, subdomain, triggered_by, status, approval_required
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, 'pending', $10)
            RETURNING *
            "#,
        )
        .bind(id.as_uuid())
        .bind(project_id.as_uuid())
        .bind(environment.to_string())
        .bind(image_tag)
        .bind(strategy.to_string())
        .bind(replica_count as i32)
        .bind(domain)
        .bind(subdomain)
        .bind(triggered_by.as_ref().map(ResourceId::as_uuid))
        .bind(approval_required)
        .fetch_one(&self.pool)
        .await?;

        Deployment::try_from(row)
    }

    async fn get(&self, id: ResourceId) -> DbResult<Deployment> {
        let row = sqlx::query_as::<_, DeploymentRow>("SELECT * FROM deployments WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::NotFound(format!("deployment {id} not found")))?;

        Deployment::try_from(row)
    }

    async fn record_detected_dependencies(
        &self,
        id: ResourceId,
        dependencies: &[DetectedDependency],
    ) -> DbResult<()> {
        let blob = serde_json::to_value(dependencies).map_err(|e| DbError::Serialization(e.to_string()))?;
        sqlx::query("UPDATE deployments SET detected_dependencies = $2, updated_at = now() WHERE id = $1")
            .bind(id.as_uuid())
            .bind(blob)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_status(
        &self,
        id: ResourceId,
        status: DeploymentStatus,
        error_message: Option<&str>,
    ) -> DbResult<()> {
        sqlx::query(
            r#"
            UPDATE deployments
            SET status = $2, error_message = $3, updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .bind(status.to_string())
        .bind(error_message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_deploying(&self, id: ResourceId) -> DbResult<()> {
        sqlx::query(
            r#"
            UPDATE deployments
            SET status = 'deploying', deployment_started_at = now(), updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// The only place `active` is ever set, and only from the terminal
    /// `completed` strategy phase -- never mid-rollout.
    async fn mark_active(&self, id: ResourceId) -> DbResult<()> {
        sqlx::query(
            r#"
            UPDATE deployments
            SET status = 'active', deployment_completed_at = now(), updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_rollback_target(&self, id: ResourceId, rolled_back_from: ResourceId) -> DbResult<()> {
        sqlx::query(
            r#"
            UPDATE deployments
            SET rolled_back_from_deployment_id = $2, updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .bind(rolled_back_from.as_uuid())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_prior_active(&self, id: ResourceId) -> DbResult<Vec<Deployment>> {
        let rows = sqlx::query_as::<_, DeploymentRow>(
            r#"
            SELECT d2.* FROM deployments d1
            JOIN deployments d2
              ON d2.project_id = d1.project_id
             AND d2.environment = d1.environment
             AND d2.id != d1.id
             AND d2.status = 'active'
            WHERE d1.id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Deployment::try_from).collect()
    }

    async fn count_in_flight_for_tenant(&self, tenant_id: ResourceId) -> DbResult<i64> {
        let (count,): (i64,) = sqlx::query_as(
            r#"
            SELECT count(*) FROM deployments d
            JOIN projects p ON p.id = d.project_id
            WHERE p.tenant_id = $1
              AND d.status NOT IN ('failed', 'rolled_back', 'terminated')
            "#,
        )
        .bind(tenant_id.as_uuid())
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn count_since_for_tenant(&self, tenant_id: ResourceId, since: DateTime<Utc>) -> DbResult<i64> {
        let (count,): (i64,) = sqlx::query_as(
            r#"
            SELECT count(*) FROM deployments d
            JOIN projects p ON p.id = d.project_id
            WHERE p.tenant_id = $1 AND d.created_at >= $2
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(since)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }
}
