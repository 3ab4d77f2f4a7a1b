use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use obtura_core::ResourceId;

use crate::error::DbResult;

/// Audit row recorded whenever a deployment is rolled back, distinct from
/// `Deployment.rolled_back_from_deployment_id` (which only tracks the most
/// recent rollback on the row itself).
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct RollbackRecord {
    pub id: Uuid,
    pub deployment_id: Uuid,
    pub target_deployment_id: Uuid,
    pub reason: String,
    pub initiated_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait RollbackRepo: Send + Sync {
    async fn record(
        &self,
        deployment_id: ResourceId,
        target_deployment_id: ResourceId,
        reason: &str,
        initiated_by: Option<ResourceId>,
    ) -> DbResult<RollbackRecord>;

    async fn list_for_deployment(&self, deployment_id: ResourceId) -> DbResult<Vec<RollbackRecord>>;
}

pub struct PgRollbackRepo {
    pool: PgPool,
}

impl PgRollbackRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RollbackRepo for PgRollbackRepo {
    async fn record(
        &self,
        deployment_id: ResourceId,
        target_deployment_id: ResourceId,
        reason: &str,
        initiated_by: Option<ResourceId>,
    ) -> DbResult<RollbackRecord> {
        let id = ResourceId::new();
        let row = sqlx::query_as::<_, RollbackRecord>(
            r#"
            INSERT INTO deployment_rollbacks (
                id, deployment_id, target_deployment_id, reason, initiated_by
            )
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(id.as_uuid())
        .bind(deployment_id.as_uuid())
        .bind(target_deployment_id.as_uuid())
        .bind(reason)
        .bind(initiated_by.as_ref().map(ResourceId::as_uuid))
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn list_for_deployment(&self, deployment_id: ResourceId) -> DbResult<Vec<RollbackRecord>> {
        let rows = sqlx::query_as::<_, RollbackRecord>(
            "SELECT * FROM deployment_rollbacks WHERE deployment_id = $1 ORDER BY created_at ASC",
        )
        .bind(deployment_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}
