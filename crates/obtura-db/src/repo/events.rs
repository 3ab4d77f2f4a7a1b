use async_trait::async_trait;
use sqlx::PgPool;

use obtura_core::ResourceId;
use obtura_core::events::{Alert, Severity};

use crate::error::DbResult;

#[async_trait]
pub trait EventsRepo: Send + Sync {
    async fn append_event(
        &self,
        deployment_id: ResourceId,
        event_type: &str,
        message: &str,
        severity: Severity,
    ) -> DbResult<()>;

    async fn raise_alert(
        &self,
        deployment_id: ResourceId,
        alert_type: &str,
        severity: Severity,
        message: &str,
    ) -> DbResult<Alert>;

    async fn acknowledge_alert(&self, id: ResourceId, user_id: ResourceId) -> DbResult<()>;

    async fn resolve_alert(&self, id: ResourceId) -> DbResult<()>;
}

pub struct PgEventsRepo {
    pool: PgPool,
}

impl PgEventsRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EventsRepo for PgEventsRepo {
    async fn append_event(
        &self,
        deployment_id: ResourceId,
        event_type: &str,
        message: &str,
        severity: Severity,
    ) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO deployment_events (deployment_id, event_type, message, severity, at)
            VALUES ($1, $2, $3, $4, now())
            "#,
        )
        .bind(deployment_id.as_uuid())
        .bind(event_type)
        .bind(message)
        .bind(severity.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn raise_alert(
        &self,
        deployment_id: ResourceId,
        alert_type: &str,
        severity: Severity,
        message: &str,
    ) -> DbResult<Alert> {
        let id = ResourceId::new();
        sqlx::query(
            r#"
            INSERT INTO deployment_alerts (
                id, deployment_id, alert_type, severity, message, resolved, acknowledged
            )
            VALUES ($1, $2, $3, $4, $5, false, false)
            "#,
        )
        .bind(id.as_uuid())
        .bind(deployment_id.as_uuid())
        .bind(alert_type)
        .bind(severity.to_string())
        .bind(message)
        .execute(&self.pool)
        .await?;

        Ok(Alert {
            id,
            deployment_id,
            alert_type: alert_type.to_string(),
            severity,
            message: message.to_string(),
            resolved: false,
            acknowledged: false,
            resolver_user: None,
            created_at: chrono::Utc::now(),
        })
    }

    async fn acknowledge_alert(&self, id: ResourceId, user_id: ResourceId) -> DbResult<()> {
        sqlx::query("UPDATE deployment_alerts SET acknowledged = true, resolver_user = $2 WHERE id = $1")
            .bind(id.as_uuid())
            .bind(user_id.as_uuid())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn resolve_alert(&self, id: ResourceId) -> DbResult<()> {
        sqlx::query("UPDATE deployment_alerts SET resolved = true WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
