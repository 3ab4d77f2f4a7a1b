use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use obtura_core::ResourceId;
use obtura_core::container::{Container, ContainerStatus, HealthStatus};
use obtura_core::strategy::Group;

use crate::error::{DbError, DbResult};

#[derive(sqlx::FromRow)]
struct ContainerRow {
    id: Uuid,
    deployment_id: Uuid,
    runtime_id: String,
    name: String,
    image: String,
    host_port: i32,
    group_label: String,
    replica_index: i32,
    status: String,
    health_status: String,
    is_active: bool,
    is_primary: bool,
    health_check_passes: i32,
    health_check_failures: i32,
    consecutive_failures: i32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ContainerRow> for Container {
    type Error = DbError;

    fn try_from(row: ContainerRow) -> Result<Self, Self::Error> {
        Ok(Container {
            id: ResourceId::from(row.id),
            deployment_id: ResourceId::from(row.deployment_id),
            runtime_id: row.runtime_id,
            name: row.name,
            image: row.image,
            host_port: row.host_port as u16,
            group: row
                .group_label
                .parse()
                .map_err(|_| DbError::NotFound("unreadable group column".into()))?,
            replica_index: row.replica_index,
            status: parse_container_status(&row.status)?,
            health_status: parse_health_status(&row.health_status)?,
            is_active: row.is_active,
            is_primary: row.is_primary,
            health_check_passes: row.health_check_passes,
            health_check_failures: row.health_check_failures,
            consecutive_failures: row.consecutive_failures,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn parse_container_status(s: &str) -> DbResult<ContainerStatus> {
    Ok(match s {
        "starting" => ContainerStatus::Starting,
        "running" => ContainerStatus::Running,
        "stopped" => ContainerStatus::Stopped,
        "failed" => ContainerStatus::Failed,
        "unhealthy" => ContainerStatus::Unhealthy,
        other => return Err(DbError::NotFound(format!("unknown container status: {other}"))),
    })
}

fn parse_health_status(s: &str) -> DbResult<HealthStatus> {
    Ok(match s {
        "starting" => HealthStatus::Starting,
        "healthy" => HealthStatus::Healthy,
        "unhealthy" => HealthStatus::Unhealthy,
        "failed" => HealthStatus::Failed,
        other => return Err(DbError::NotFound(format!("unknown health status: {other}"))),
    })
}

#[async_trait]
pub trait ContainerRepo: Send + Sync {
    #[allow(clippy::too_many_arguments)]
    async fn insert(
        &self,
        deployment_id: ResourceId,
        runtime_id: &str,
        name: &str,
        image: &str,
        host_port: u16,
        group: Group,
        replica_index: i32,
    ) -> DbResult<Container>;

    async fn update_status(&self, id: ResourceId, status: ContainerStatus) -> DbResult<()>;

    async fn record_probe(&self, id: ResourceId, passed: bool) -> DbResult<Container>;

    async fn mark_active(&self, id: ResourceId, is_active: bool) -> DbResult<()>;

    async fn mark_primary(&self, deployment_id: ResourceId, id: ResourceId) -> DbResult<()>;

    /// Clears `is_primary` on a single container, independent of the rest of
    /// its deployment. Used to demote a prior group's containers once a new
    /// group has taken over, since `mark_primary` only ever promotes within
    /// the *new* deployment row's scope and never reaches back across
    /// deployments to retract a stale primary flag.
    async fn clear_primary(&self, id: ResourceId) -> DbResult<()>;

    /// Reclassifies a container's `group` column, e.g. promoting a surviving
    /// canary replica to `stable` once it has absorbed all traffic.
    async fn update_group(&self, id: ResourceId, group: Group) -> DbResult<()>;

    /// Attaches the runtime-assigned container id to a row inserted before
    /// the runtime container existed (the row claims the host port; the
    /// runtime id is only known once the container has actually been
    /// created).
    async fn set_runtime_id(&self, id: ResourceId, runtime_id: &str) -> DbResult<()>;

    async fn list_by_deployment(&self, deployment_id: ResourceId) -> DbResult<Vec<Container>>;

    async fn list_by_group(&self, deployment_id: ResourceId, group: Group) -> DbResult<Vec<Container>>;

    /// Highest host port currently claimed across all containers, used to
    /// probe forward from the port pool's `range_start`. A gap-scan over the
    /// full range is the fallback when the pool wraps.
    async fn max_claimed_port(&self) -> DbResult<Option<u16>>;

    async fn is_port_claimed(&self, port: u16) -> DbResult<bool>;
}

pub struct PgContainerRepo {
    pool: PgPool,
}

impl PgContainerRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ContainerRepo for PgContainerRepo {
    async fn insert(
        &self,
        deployment_id: ResourceId,
        runtime_id: &str,
        name: &str,
        image: &str,
        host_port: u16,
        group: Group,
        replica_index: i32,
    ) -> DbResult<Container> {
        let id = ResourceId::new();
        let row = sqlx::query_as::<_, ContainerRow>(
            r#"
            INSERT INTO deployment_containers (
                id, deployment_id, runtime_id, name, image, host_port, group_label, replica_index,
                status, health_status
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'starting', 'starting')
            RETURNING id, deployment_id, runtime_id, name, image, host_port, group_label,
                      replica_index, status, health_status, is_active, is_primary,
                      health_check_passes, health_check_failures, consecutive_failures,
                      created_at, updated_at
            "#,
        )
        .bind(id.as_uuid())
        .bind(deployment_id.as_uuid())
        .bind(runtime_id)
        .bind(name)
        .bind(image)
        .bind(host_port as i32)
        .bind(group.to_string())
        .bind(replica_index)
        .fetch_one(&self.pool)
        .await?;

        Container::try_from(row)
    }

    async fn update_status(&self, id: ResourceId, status: ContainerStatus) -> DbResult<()> {
        sqlx::query("UPDATE deployment_containers SET status = $2, updated_at = now() WHERE id = $1")
            .bind(id.as_uuid())
            .bind(status.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn record_probe(&self, id: ResourceId, passed: bool) -> DbResult<Container> {
        let row = if passed {
            sqlx::query_as::<_, ContainerRow>(
                r#"
                UPDATE deployment_containers
                SET health_check_passes = health_check_passes + 1,
                    consecutive_failures = 0,
                    health_status = 'healthy',
                    updated_at = now()
                WHERE id = $1
                RETURNING id, deployment_id, runtime_id, name, image, host_port, group_label,
                          replica_index, status, health_status, is_active, is_primary,
                          health_check_passes, health_check_failures, consecutive_failures,
                          created_at, updated_at
                "#,
            )
        } else {
            sqlx::query_as::<_, ContainerRow>(
                r#"
                UPDATE deployment_containers
                SET health_check_failures = health_check_failures + 1,
                    consecutive_failures = consecutive_failures + 1,
                    health_status = 'unhealthy',
                    updated_at = now()
                WHERE id = $1
                RETURNING id, deployment_id, runtime_id, name, image, host_port, group_label,
                          replica_index, status, health_status, is_active, is_primary,
                          health_check_passes, health_check_failures, consecutive_failures,
                          created_at, updated_at
                "#,
            )
        }
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| DbError::NotFound(format!("container {id} not found")))?;

        Container::try_from(row)
    }

    async fn mark_active(&self, id: ResourceId, is_active: bool) -> DbResult<()> {
        sqlx::query("UPDATE deployment_containers SET is_active = $2, updated_at = now() WHERE id = $1")
            .bind(id.as_uuid())
            .bind(is_active)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn mark_primary(&self, deployment_id: ResourceId, id: ResourceId) -> DbResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("UPDATE deployment_containers SET is_primary = false WHERE deployment_id = $1")
            .bind(deployment_id.as_uuid())
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE deployment_containers SET is_primary = true WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn clear_primary(&self, id: ResourceId) -> DbResult<()> {
        sqlx::query("UPDATE deployment_containers SET is_primary = false, updated_at = now() WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_group(&self, id: ResourceId, group: Group) -> DbResult<()> {
        sqlx::query("UPDATE deployment_containers SET group_label = $2, updated_at = now() WHERE id = $1")
            .bind(id.as_uuid())
            .bind(group.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_runtime_id(&self, id: ResourceId, runtime_id: &str) -> DbResult<()> {
        sqlx::query("UPDATE deployment_containers SET runtime_id = $2, updated_at = now() WHERE id = $1")
            .bind(id.as_uuid())
            .bind(runtime_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_by_deployment(&self, deployment_id: ResourceId) -> DbResult<Vec<Container>> {
        let rows = sqlx::query_as::<_, ContainerRow>(
            r#"
            SELECT id, deployment_id, runtime_id, name, image, host_port, group_label,
                   replica_index, status, health_status, is_active, is_primary,
                   health_check_passes, health_check_failures, consecutive_failures,
                   created_at, updated_at
            FROM deployment_containers WHERE deployment_id = $1
            ORDER BY replica_index ASC
            "#,
        )
        .bind(deployment_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Container::try_from).collect()
    }

    async fn list_by_group(&self, deployment_id: ResourceId, group: Group) -> DbResult<Vec<Container>> {
        let rows = sqlx::query_as::<_, ContainerRow>(
            r#"
            SELECT id, deployment_id, runtime_id, name, image, host_port, group_label,
                   replica_index, status, health_status, is_active, is_primary,
                   health_check_passes, health_check_failures, consecutive_failures,
                   created_at, updated_at
            FROM deployment_containers WHERE deployment_id = $1 AND group_label = $2
            ORDER BY replica_index ASC
            "#,
        )
        .bind(deployment_id.as_uuid())
        .bind(group.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Container::try_from).collect()
    }

    async fn max_claimed_port(&self) -> DbResult<Option<u16>> {
        let (max,): (Option<i32>,) =
            sqlx::query_as("SELECT max(host_port) FROM deployment_containers")
                .fetch_one(&self.pool)
                .await?;
        Ok(max.map(|p| p as u16))
    }

    async fn is_port_claimed(&self, port: u16) -> DbResult<bool> {
        let (exists,): (bool,) = sqlx::query_as(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM deployment_containers
                WHERE host_port = $1 AND status NOT IN ('stopped', 'failed')
            )
            "#,
        )
        .bind(port as i32)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }
}
