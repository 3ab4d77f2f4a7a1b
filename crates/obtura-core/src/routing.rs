//! Traffic routing rows: the percentage split of live traffic across
//! container groups for a deployment.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ResourceId;
use crate::strategy::Group;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrafficRoutingRow {
    pub id: ResourceId,
    pub deployment_id: ResourceId,
    pub routing_group: Group,
    pub traffic_percentage: u8,
    pub container_ids: Vec<ResourceId>,
    pub is_active: bool,
    pub deactivated_at: Option<DateTime<Utc>>,
}

impl TrafficRoutingRow {
    /// Sum of active percentages never exceeds 100.
    pub fn active_sum(rows: &[TrafficRoutingRow]) -> u32 {
        rows.iter()
            .filter(|r| r.is_active)
            .map(|r| r.traffic_percentage as u32)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(group: Group, pct: u8, active: bool) -> TrafficRoutingRow {
        TrafficRoutingRow {
            id: ResourceId::new(),
            deployment_id: ResourceId::new(),
            routing_group: group,
            traffic_percentage: pct,
            container_ids: vec![],
            is_active: active,
            deactivated_at: None,
        }
    }

    #[test]
    fn active_sum_ignores_inactive_rows() {
        let rows = vec![
            row(Group::Blue, 100, false),
            row(Group::Green, 90, true),
            row(Group::Canary, 10, true),
        ];
        assert_eq!(TrafficRoutingRow::active_sum(&rows), 100);
    }
}
