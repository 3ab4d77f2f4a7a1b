//! Host port allocation: a closed range (default 9100-9900,
//! configurable via `PortPoolConfig`). Reads `max(port)` of currently
//! non-terminal containers and returns `max+1`; on range exhaustion scans
//! for the first gap; returns `None` when the pool is fully claimed.

use obtura_config::PortPoolConfig;
use obtura_core::Result;
use obtura_db::repo::ContainerRepo;

pub const MAX_CLAIM_ATTEMPTS: u32 = 5;

/// Picks the next candidate host port. Does not itself claim the port --
/// the claim happens when the caller inserts the container row, and a
/// unique-constraint collision there means this should be called again.
pub async fn next_candidate(containers: &dyn ContainerRepo, pool: &PortPoolConfig) -> Result<Option<u16>> {
    if let Some(max) = containers.max_claimed_port().await? {
        let candidate = max.saturating_add(1);
        if candidate >= pool.range_start && candidate <= pool.range_end {
            return Ok(Some(candidate));
        }
    } else {
        return Ok(Some(pool.range_start));
    }

    for port in pool.range_start..=pool.range_end {
        if !containers.is_port_claimed(port).await? {
            return Ok(Some(port));
        }
    }

    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use obtura_core::ResourceId;
    use obtura_core::container::{Container, ContainerStatus};
    use obtura_core::strategy::Group;
    use obtura_db::DbResult;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeContainerRepo {
        claimed: Mutex<Vec<u16>>,
    }

    #[async_trait]
    impl ContainerRepo for FakeContainerRepo {
        async fn insert(
            &self,
            _deployment_id: ResourceId,
            _runtime_id: &str,
            _name: &str,
            _image: &str,
            _host_port: u16,
            _group: Group,
            _replica_index: i32,
        ) -> DbResult<Container> {
            unimplemented!()
        }
        async fn update_status(&self, _id: ResourceId, _status: ContainerStatus) -> DbResult<()> {
            unimplemented!()
        }
        async fn record_probe(&self, _id: ResourceId, _passed: bool) -> DbResult<Container> {
            unimplemented!()
        }
        async fn mark_active(&self, _id: ResourceId, _is_active: bool) -> DbResult<()> {
            unimplemented!()
        }
        async fn mark_primary(&self, _deployment_id: ResourceId, _id: ResourceId) -> DbResult<()> {
            unimplemented!()
        }
        async fn clear_primary(&self, _id: ResourceId) -> DbResult<()> {
            unimplemented!()
        }
        async fn update_group(&self, _id: ResourceId, _group: Group) -> DbResult<()> {
            unimplemented!()
        }
        async fn set_runtime_id(&self, _id: ResourceId, _runtime_id: &str) -> DbResult<()> {
            unimplemented!()
        }
        async fn list_by_deployment(&self, _deployment_id: ResourceId) -> DbResult<Vec<Container>> {
            unimplemented!()
        }
        async fn list_by_group(&self, _deployment_id: ResourceId, _group: Group) -> DbResult<Vec<Container>> {
            unimplemented!()
        }
        async fn max_claimed_port(&self) -> DbResult<Option<u16>> {
            Ok(self.claimed.lock().unwrap().iter().copied().max())
        }
        async fn is_port_claimed(&self, port: u16) -> DbResult<bool> {
            Ok(self.claimed.lock().unwrap().contains(&port))
        }
    }

    fn pool() -> PortPoolConfig {
        PortPoolConfig { range_start: 9100, range_end: 9102 }
    }

    #[tokio::test]
    async fn empty_pool_starts_at_range_start() {
        let repo = FakeContainerRepo::default();
        assert_eq!(next_candidate(&repo, &pool()).await.unwrap(), Some(9100));
    }

    #[tokio::test]
    async fn picks_max_plus_one() {
        let repo = FakeContainerRepo { claimed: Mutex::new(vec![9100]) };
        assert_eq!(next_candidate(&repo, &pool()).await.unwrap(), Some(9101));
    }

    #[tokio::test]
    async fn scans_for_gap_when_max_plus_one_out_of_range() {
        // max claimed is already at the top of the range; 9101 is free.
        let repo = FakeContainerRepo { claimed: Mutex::new(vec![9100, 9102]) };
        assert_eq!(next_candidate(&repo, &pool()).await.unwrap(), Some(9101));
    }

    #[tokio::test]
    async fn exhausted_range_returns_none() {
        let repo = FakeContainerRepo { claimed: Mutex::new(vec![9100, 9101, 9102]) };
        assert_eq!(next_candidate(&repo, &pool()).await.unwrap(), None);
    }
}
