//! Distributed counters backing the deployment rate limiter: one for
//! concurrent in-flight deployments per tenant, one for the rolling
//! monthly count. Both live in Redis so every orchestrator instance sees
//! the same counts without a round trip to Postgres on the hot path.

use async_trait::async_trait;
use chrono::Utc;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;

use obtura_core::{Error, ResourceId, Result};

fn concurrent_key(tenant_id: ResourceId) -> String {
    format!("deployments:concurrent:company:{tenant_id}")
}

fn monthly_key(tenant_id: ResourceId) -> String {
    format!("deployments:monthly:company:{tenant_id}:{}", Utc::now().format("%Y%m"))
}

/// A held slot against the concurrent-deployment counter. Dropping it
/// without calling `release` leaves the counter incremented until its TTL
/// expires -- the TTL exists precisely so a crashed consumer doesn't wedge
/// a tenant's quota forever.
pub struct ConcurrentSlot {
    tenant_id: ResourceId,
    released: bool,
}

impl ConcurrentSlot {
    /// Constructs a slot directly, for `RateLimiter` fakes outside this
    /// crate (the real `RedisRateLimiter` only ever hands one out through
    /// `try_acquire_concurrent`).
    pub fn new(tenant_id: ResourceId) -> Self {
        Self { tenant_id, released: false }
    }

    pub fn tenant_id(&self) -> ResourceId {
        self.tenant_id
    }
}

#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Atomically checks the concurrent-deployment count against `max` and,
    /// if under the limit, increments it and returns a held slot. Returns
    /// `Error::LimitExceeded` without mutating state when at or over `max`.
    async fn try_acquire_concurrent(&self, tenant_id: ResourceId, max: i64) -> Result<ConcurrentSlot>;

    async fn release_concurrent(&self, slot: ConcurrentSlot) -> Result<()>;

    /// Atomically checks and increments the rolling monthly counter.
    /// `max < 0` means unlimited and is never checked.
    async fn check_and_increment_monthly(&self, tenant_id: ResourceId, max: i64) -> Result<()>;

    /// Reconciles the concurrent counter against the authoritative
    /// in-flight count from Postgres, correcting drift from crashed
    /// consumers that never released their slot. Intended to run as a
    /// periodic background task, not on the deploy hot path.
    async fn reconcile_concurrent(&self, tenant_id: ResourceId, actual_in_flight: i64) -> Result<()>;
}

pub struct RedisRateLimiter {
    conn: ConnectionManager,
    concurrent_ttl_secs: u64,
    monthly_ttl_secs: u64,
}

impl RedisRateLimiter {
    pub fn new(conn: ConnectionManager, concurrent_ttl_secs: u64, monthly_ttl_secs: u64) -> Self {
        Self {
            conn,
            concurrent_ttl_secs,
            monthly_ttl_secs,
        }
    }
}

#[async_trait]
impl RateLimiter for RedisRateLimiter {
    async fn try_acquire_concurrent(&self, tenant_id: ResourceId, max: i64) -> Result<ConcurrentSlot> {
        let key = concurrent_key(tenant_id);
        let mut conn = self.conn.clone();

        // INCR then check: over-the-limit callers immediately decrement back
        // out, so the counter never drifts above "winners + one in-flight
        // racer" even under concurrent callers.
        let current: i64 = conn
            .incr(&key, 1)
            .await
            .map_err(|e| Error::Transient(e.to_string()))?;

        if current == 1 {
            let _: () = conn
                .expire(&key, self.concurrent_ttl_secs as i64)
                .await
                .map_err(|e| Error::Transient(e.to_string()))?;
        }

        if max >= 0 && current > max {
            let _: i64 = conn
                .decr(&key, 1)
                .await
                .map_err(|e| Error::Transient(e.to_string()))?;
            return Err(Error::LimitExceeded {
                kind: "concurrent_deployments",
                current: current - 1,
                max,
            });
        }

        Ok(ConcurrentSlot {
            tenant_id,
            released: false,
        })
    }

    async fn release_concurrent(&self, mut slot: ConcurrentSlot) -> Result<()> {
        let key = concurrent_key(slot.tenant_id);
        let mut conn = self.conn.clone();
        let _: i64 = conn
            .decr(&key, 1)
            .await
            .map_err(|e| Error::Transient(e.to_string()))?;
        slot.released = true;
        Ok(())
    }

    async fn check_and_increment_monthly(&self, tenant_id: ResourceId, max: i64) -> Result<()> {
        if max < 0 {
            return Ok(());
        }

        let key = monthly_key(tenant_id);
        let mut conn = self.conn.clone();

        let current: i64 = conn
            .incr(&key, 1)
            .await
            .map_err(|e| Error::Transient(e.to_string()))?;

        if current == 1 {
            let _: () = conn
                .expire(&key, self.monthly_ttl_secs as i64)
                .await
                .map_err(|e| Error::Transient(e.to_string()))?;
        }

        if current > max {
            let _: i64 = conn
                .decr(&key, 1)
                .await
                .map_err(|e| Error::Transient(e.to_string()))?;
            return Err(Error::LimitExceeded {
                kind: "monthly_deployments",
                current: current - 1,
                max,
            });
        }

        Ok(())
    }

    async fn reconcile_concurrent(&self, tenant_id: ResourceId, actual_in_flight: i64) -> Result<()> {
        let key = concurrent_key(tenant_id);
        let mut conn = self.conn.clone();
        let _: () = conn
            .set_ex(&key, actual_in_flight, self.concurrent_ttl_secs)
            .await
            .map_err(|e| Error::Transient(e.to_string()))?;
        Ok(())
    }
}

impl Drop for ConcurrentSlot {
    fn drop(&mut self) {
        if !self.released {
            tracing::warn!(
                tenant_id = %self.tenant_id,
                "concurrent deployment slot dropped without release; relying on TTL expiry"
            );
        }
    }
}
