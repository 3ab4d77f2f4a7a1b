use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use obtura_core::ResourceId;
use obtura_core::deployment::Strategy;
use obtura_core::strategy::{Group, Phase, PhaseTransition, StrategyState};

use crate::error::{DbError, DbResult};

#[derive(sqlx::FromRow)]
struct StrategyStateRow {
    deployment_id: Uuid,
    strategy: String,
    current_phase: String,
    active_group: Option<String>,
    standby_group: Option<String>,
    total_batches: Option<i32>,
    current_batch: Option<i32>,
    batch_size: Option<i32>,
    canary_traffic_percentage: Option<i32>,
    canary_duration_minutes: Option<i32>,
    total_replicas: i32,
    healthy_replicas: i32,
    unhealthy_replicas: i32,
    phase_started_at: DateTime<Utc>,
    phase_updated_at: DateTime<Utc>,
}

impl TryFrom<StrategyStateRow> for StrategyState {
    type Error = DbError;

    fn try_from(row: StrategyStateRow) -> Result<Self, Self::Error> {
        Ok(StrategyState {
            deployment_id: ResourceId::from(row.deployment_id),
            strategy: row
                .strategy
                .parse()
                .map_err(|_| DbError::NotFound("unreadable strategy column".into()))?,
            current_phase: row
                .current_phase
                .parse()
                .map_err(|_| DbError::NotFound("unreadable phase column".into()))?,
            active_group: row.active_group.map(|g| g.parse()).transpose().ok().flatten(),
            standby_group: row.standby_group.map(|g| g.parse()).transpose().ok().flatten(),
            total_batches: row.total_batches,
            current_batch: row.current_batch,
            batch_size: row.batch_size,
            canary_traffic_percentage: row.canary_traffic_percentage,
            canary_duration_minutes: row.canary_duration_minutes,
            total_replicas: row.total_replicas,
            healthy_replicas: row.healthy_replicas,
            unhealthy_replicas: row.unhealthy_replicas,
            phase_started_at: row.phase_started_at,
            phase_updated_at: row.phase_updated_at,
        })
    }
}

#[async_trait]
pub trait StrategyRepo: Send + Sync {
    /// Idempotent init: an `UPSERT` keyed on `deployment_id` so a redelivered
    /// `deploy.triggered` message (or a consumer crash-and-retry) never
    /// double-inserts or clobbers progress already made by a first attempt
    /// that is still running.
    async fn init(
        &self,
        deployment_id: ResourceId,
        strategy: Strategy,
        total_replicas: i32,
        standby_group: Option<Group>,
    ) -> DbResult<StrategyState>;

    async fn get(&self, deployment_id: ResourceId) -> DbResult<StrategyState>;

    /// Advance to `to_phase`, recording the audit row. Checks
    /// `Phase::is_monotone_advance_to` itself against the row's current
    /// phase inside the same transaction that locks it, so no caller can
    /// skip the check by forgetting to call it first.
    async fn transition_phase(&self, deployment_id: ResourceId, to_phase: Phase) -> DbResult<()>;

    async fn set_groups(&self, deployment_id: ResourceId, active: Group, standby: Group) -> DbResult<()>;

    async fn update_rolling_progress(
        &self,
        deployment_id: ResourceId,
        current_batch: i32,
        healthy_replicas: i32,
        unhealthy_replicas: i32,
    ) -> DbResult<()>;

    async fn update_canary_progress(
        &self,
        deployment_id: ResourceId,
        traffic_percentage: i32,
        healthy_replicas: i32,
        unhealthy_replicas: i32,
    ) -> DbResult<()>;

    async fn list_transitions(&self, deployment_id: ResourceId) -> DbResult<Vec<PhaseTransition>>;
}

pub struct PgStrategyRepo {
    pool: PgPool,
}

impl PgStrategyRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl StrategyRepo for PgStrategyRepo {
    async fn init(
        &self,
        deployment_id: ResourceId,
        strategy: Strategy,
        total_replicas: i32,
        standby_group: Option<Group>,
    ) -> DbResult<StrategyState> {
        let row = sqlx::query_as::<_, StrategyStateRow>(
            r#"
            INSERT INTO deployment_strategy_state (
                deployment_id, strategy, current_phase, standby_group, total_replicas
            )
            VALUES ($1, $2, 'preparing', $3, $4)
            ON CONFLICT (deployment_id) DO UPDATE
                SET strategy = EXCLUDED.strategy
            RETURNING *
            "#,
        )
        .bind(deployment_id.as_uuid())
        .bind(strategy.to_string())
        .bind(standby_group.map(|g| g.to_string()))
        .bind(total_replicas)
        .fetch_one(&self.pool)
        .await?;

        StrategyState::try_from(row)
    }

    async fn get(&self, deployment_id: ResourceId) -> DbResult<StrategyState> {
        let row = sqlx::query_as::<_, StrategyStateRow>(
            "SELECT * FROM deployment_strategy_state WHERE deployment_id = $1",
        )
        .bind(deployment_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| DbError::NotFound(format!("strategy state for {deployment_id} not found")))?;

        StrategyState::try_from(row)
    }

    async fn transition_phase(&self, deployment_id: ResourceId, to_phase: Phase) -> DbResult<()> {
        let mut tx = self.pool.begin().await?;

        let (from_phase,): (String,) = sqlx::query_as(
            "SELECT current_phase FROM deployment_strategy_state WHERE deployment_id = $1 FOR UPDATE",
        )
        .bind(deployment_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| DbError::NotFound(format!("strategy state for {deployment_id} not found")))?;

        let current: Phase = from_phase
            .parse()
            .map_err(|_| DbError::Serialization("unreadable phase column".into()))?;
        if !current.is_monotone_advance_to(to_phase) {
            return Err(DbError::InvalidTransition(format!(
                "deployment {deployment_id} cannot advance from {current} to {to_phase}"
            )));
        }

        sqlx::query(
            r#"
            UPDATE deployment_strategy_state
            SET current_phase = $2, phase_started_at = now(), phase_updated_at = now()
            WHERE deployment_id = $1
            "#,
        )
        .bind(deployment_id.as_uuid())
        .bind(to_phase.to_string())
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO deployment_phase_transitions (deployment_id, from_phase, to_phase, at)
            VALUES ($1, $2, $3, now())
            "#,
        )
        .bind(deployment_id.as_uuid())
        .bind(Some(from_phase))
        .bind(to_phase.to_string())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn set_groups(&self, deployment_id: ResourceId, active: Group, standby: Group) -> DbResult<()> {
        sqlx::query(
            r#"
            UPDATE deployment_strategy_state
            SET active_group = $2, standby_group = $3
            WHERE deployment_id = $1
            "#,
        )
        .bind(deployment_id.as_uuid())
        .bind(active.to_string())
        .bind(standby.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_rolling_progress(
        &self,
        deployment_id: ResourceId,
        current_batch: i32,
        healthy_replicas: i32,
        unhealthy_replicas: i32,
    ) -> DbResult<()> {
        sqlx::query(
            r#"
            UPDATE deployment_strategy_state
            SET current_batch = $2, healthy_replicas = $3, unhealthy_replicas = $4
            WHERE deployment_id = $1
            "#,
        )
        .bind(deployment_id.as_uuid())
        .bind(current_batch)
        .bind(healthy_replicas)
        .bind(unhealthy_replicas)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_canary_progress(
        &self,
        deployment_id: ResourceId,
        traffic_percentage: i32,
        healthy_replicas: i32,
        unhealthy_replicas: i32,
    ) -> DbResult<()> {
        sqlx::query(
            r#"
            UPDATE deployment_strategy_state
            SET canary_traffic_percentage = $2, healthy_replicas = $3, unhealthy_replicas = $4
            WHERE deployment_id = $1
            "#,
        )
        .bind(deployment_id.as_uuid())
        .bind(traffic_percentage)
        .bind(healthy_replicas)
        .bind(unhealthy_replicas)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_transitions(&self, deployment_id: ResourceId) -> DbResult<Vec<PhaseTransition>> {
        #[derive(sqlx::FromRow)]
        struct Row {
            deployment_id: Uuid,
            from_phase: Option<String>,
            to_phase: String,
            at: DateTime<Utc>,
        }

        let rows: Vec<Row> = sqlx::query_as(
            r#"
            SELECT deployment_id, from_phase, to_phase, at
            FROM deployment_phase_transitions
            WHERE deployment_id = $1
            ORDER BY at ASC
            "#,
        )
        .bind(deployment_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|r| {
                Ok(PhaseTransition {
                    deployment_id: ResourceId::from(r.deployment_id),
                    from_phase: r.from_phase.map(|p| p.parse()).transpose().ok().flatten(),
                    to_phase: r
                        .to_phase
                        .parse()
                        .map_err(|_| DbError::NotFound("unreadable phase column".into()))?,
                    at: r.at,
                })
            })
            .collect()
    }
}
