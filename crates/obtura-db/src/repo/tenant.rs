use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use obtura_core::ResourceId;

use crate::error::{DbError, DbResult};

/// Resolves the tenant that owns a project. The deployment core treats
/// tenancy as a lookup, not an aggregate it manages; creation/billing of
/// tenants lives outside this workspace.
#[async_trait]
pub trait TenantRepo: Send + Sync {
    async fn owning_tenant_id(&self, project_id: ResourceId) -> DbResult<ResourceId>;

    /// Every tenant with at least one project, used by the rate limiter's
    /// periodic concurrent-counter reconciliation sweep rather than the
    /// deploy hot path.
    async fn list_tenant_ids(&self) -> DbResult<Vec<ResourceId>>;
}

pub struct PgTenantRepo {
    pool: PgPool,
}

impl PgTenantRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TenantRepo for PgTenantRepo {
    async fn owning_tenant_id(&self, project_id: ResourceId) -> DbResult<ResourceId> {
        let row: (Uuid,) = sqlx::query_as(
            r#"
            SELECT tenant_id FROM projects WHERE id = $1
            "#,
        )
        .bind(project_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| DbError::NotFound(format!("project {project_id} not found")))?;

        Ok(ResourceId::from(row.0))
    }

    async fn list_tenant_ids(&self) -> DbResult<Vec<ResourceId>> {
        let rows: Vec<(Uuid,)> =
            sqlx::query_as("SELECT DISTINCT tenant_id FROM projects")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(|(id,)| ResourceId::from(id)).collect())
    }
}
