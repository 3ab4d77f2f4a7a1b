use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use obtura_core::ResourceId;
use obtura_core::routing::TrafficRoutingRow;
use obtura_core::strategy::Group;

use crate::error::{DbError, DbResult};

#[derive(sqlx::FromRow)]
struct RoutingRow {
    id: Uuid,
    deployment_id: Uuid,
    routing_group: String,
    traffic_percentage: i32,
    container_ids: Vec<Uuid>,
    is_active: bool,
    deactivated_at: Option<DateTime<Utc>>,
}

impl TryFrom<RoutingRow> for TrafficRoutingRow {
    type Error = DbError;

    fn try_from(row: RoutingRow) -> Result<Self, Self::Error> {
        Ok(TrafficRoutingRow {
            id: ResourceId::from(row.id),
            deployment_id: ResourceId::from(row.deployment_id),
            routing_group: row
                .routing_group
                .parse()
                .map_err(|_| DbError::NotFound("unreadable group column".into()))?,
            traffic_percentage: row.traffic_percentage.clamp(0, 100) as u8,
            container_ids: row.container_ids.into_iter().map(ResourceId::from).collect(),
            is_active: row.is_active,
            deactivated_at: row.deactivated_at,
        })
    }
}

#[async_trait]
pub trait RoutingRepo: Send + Sync {
    async fn insert_row(
        &self,
        deployment_id: ResourceId,
        group: Group,
        traffic_percentage: u8,
        container_ids: &[ResourceId],
    ) -> DbResult<TrafficRoutingRow>;

    async fn deactivate_all(&self, deployment_id: ResourceId) -> DbResult<()>;

    async fn active_rows(&self, deployment_id: ResourceId) -> DbResult<Vec<TrafficRoutingRow>>;
}

pub struct PgRoutingRepo {
    pool: PgPool,
}

impl PgRoutingRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RoutingRepo for PgRoutingRepo {
    async fn insert_row(
        &self,
        deployment_id: ResourceId,
        group: Group,
        traffic_percentage: u8,
        container_ids: &[ResourceId],
    ) -> DbResult<TrafficRoutingRow> {
        let id = ResourceId::new();
        let ids: Vec<Uuid> = container_ids.iter().map(|c| *c.as_uuid()).collect();
        let row = sqlx::query_as::<_, RoutingRow>(
            r#"
            INSERT INTO deployment_traffic_routing (
                id, deployment_id, routing_group, traffic_percentage, container_ids, is_active
            )
            VALUES ($1, $2, $3, $4, $5, true)
            RETURNING *
            "#,
        )
        .bind(id.as_uuid())
        .bind(deployment_id.as_uuid())
        .bind(group.to_string())
        .bind(traffic_percentage as i32)
        .bind(ids)
        .fetch_one(&self.pool)
        .await?;

        TrafficRoutingRow::try_from(row)
    }

    async fn deactivate_all(&self, deployment_id: ResourceId) -> DbResult<()> {
        sqlx::query(
            r#"
            UPDATE deployment_traffic_routing
            SET is_active = false, deactivated_at = now()
            WHERE deployment_id = $1 AND is_active
            "#,
        )
        .bind(deployment_id.as_uuid())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn active_rows(&self, deployment_id: ResourceId) -> DbResult<Vec<TrafficRoutingRow>> {
        let rows = sqlx::query_as::<_, RoutingRow>(
            "SELECT * FROM deployment_traffic_routing WHERE deployment_id = $1 AND is_active",
        )
        .bind(deployment_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TrafficRoutingRow::try_from).collect()
    }
}
