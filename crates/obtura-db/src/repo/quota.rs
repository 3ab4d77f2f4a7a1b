use async_trait::async_trait;
use sqlx::PgPool;

use obtura_core::ResourceId;
use obtura_core::quota::Quota;

use crate::error::{DbError, DbResult};

#[derive(sqlx::FromRow)]
struct QuotaRow {
    tier: String,
    max_concurrent_deployments: Option<i64>,
    max_deployments_per_month: Option<i64>,
    cpu_cores_per_container: Option<f64>,
    memory_mb_per_container: Option<i64>,
    max_environments: Option<i64>,
    max_preview_environments: Option<i64>,
    rollback_retention_days: Option<i64>,
}

impl From<QuotaRow> for Quota {
    fn from(row: QuotaRow) -> Self {
        let defaults = Quota::default();
        Quota {
            tier: row.tier.parse().unwrap_or_default(),
            max_concurrent_deployments: row
                .max_concurrent_deployments
                .unwrap_or(defaults.max_concurrent_deployments),
            max_deployments_per_month: row
                .max_deployments_per_month
                .unwrap_or(defaults.max_deployments_per_month),
            cpu_cores_per_container: row
                .cpu_cores_per_container
                .unwrap_or(defaults.cpu_cores_per_container),
            memory_mb_per_container: row
                .memory_mb_per_container
                .unwrap_or(defaults.memory_mb_per_container),
            max_environments: row.max_environments.unwrap_or(defaults.max_environments),
            max_preview_environments: row
                .max_preview_environments
                .unwrap_or(defaults.max_preview_environments),
            rollback_retention_days: row
                .rollback_retention_days
                .unwrap_or(defaults.rollback_retention_days),
        }
    }
}

/// Read-only view over the plan/subscription tables owned by the billing
/// system. The deployment core never writes these rows.
#[async_trait]
pub trait QuotaRepo: Send + Sync {
    async fn resolve(&self, tenant_id: ResourceId) -> DbResult<Quota>;
}

pub struct PgQuotaRepo {
    pool: PgPool,
}

impl PgQuotaRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl QuotaRepo for PgQuotaRepo {
    /// Fails with `DbError::NotFound` when the tenant has no active
    /// subscription row -- quota resolution gates every deploy, so a missing
    /// billing record must block rather than silently grant starter limits.
    /// Individual nullable columns on a matched row still fall back to
    /// `Quota::default()`'s per-field values (a plan row with an unset
    /// `rollback_retention_days`, say, rather than the whole lookup failing).
    async fn resolve(&self, tenant_id: ResourceId) -> DbResult<Quota> {
        let row = sqlx::query_as::<_, QuotaRow>(
            r#"
            SELECT
                p.slug AS tier,
                p.max_concurrent_deployments,
                p.max_deployments_per_month,
                p.cpu_cores_per_container,
                p.memory_mb_per_container,
                p.max_environments,
                p.max_preview_environments,
                p.rollback_retention_days
            FROM subscriptions s
            JOIN plans p ON p.id = s.plan_id
            WHERE s.tenant_id = $1 AND s.active
            "#,
        )
        .bind(tenant_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| DbError::NotFound(format!("no active subscription for tenant {tenant_id}")))?;

        Ok(Quota::from(row))
    }
}
