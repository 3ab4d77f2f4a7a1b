use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use obtura_core::ResourceId;

use crate::error::DbResult;

/// One row per analysis window evaluated during a canary rollout.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct CanaryAnalysisResult {
    pub id: Uuid,
    pub deployment_id: Uuid,
    pub error_rate_percent: f64,
    pub avg_latency_ms: f64,
    pub sample_count: i64,
    pub promoted: bool,
    pub evaluated_at: DateTime<Utc>,
}

#[async_trait]
pub trait CanaryAnalysisRepo: Send + Sync {
    #[allow(clippy::too_many_arguments)]
    async fn record(
        &self,
        deployment_id: ResourceId,
        error_rate_percent: f64,
        avg_latency_ms: f64,
        sample_count: i64,
        promoted: bool,
    ) -> DbResult<CanaryAnalysisResult>;

    async fn list_for_deployment(&self, deployment_id: ResourceId) -> DbResult<Vec<CanaryAnalysisResult>>;
}

pub struct PgCanaryAnalysisRepo {
    pool: PgPool,
}

impl PgCanaryAnalysisRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CanaryAnalysisRepo for PgCanaryAnalysisRepo {
    async fn record(
        &self,
        deployment_id: ResourceId,
        error_rate_percent: f64,
        avg_latency_ms: f64,
        sample_count: i64,
        promoted: bool,
    ) -> DbResult<CanaryAnalysisResult> {
        let id = ResourceId::new();
        let row = sqlx::query_as::<_, CanaryAnalysisResult>(
            r#"
            INSERT INTO canary_analysis_results (
                id, deployment_id, error_rate_percent, avg_latency_ms, sample_count, promoted, evaluated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, now())
            RETURNING *
            "#,
        )
        .bind(id.as_uuid())
        .bind(deployment_id.as_uuid())
        .bind(error_rate_percent)
        .bind(avg_latency_ms)
        .bind(sample_count)
        .bind(promoted)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn list_for_deployment(&self, deployment_id: ResourceId) -> DbResult<Vec<CanaryAnalysisResult>> {
        let rows = sqlx::query_as::<_, CanaryAnalysisResult>(
            "SELECT * FROM canary_analysis_results WHERE deployment_id = $1 ORDER BY evaluated_at ASC",
        )
        .bind(deployment_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}
