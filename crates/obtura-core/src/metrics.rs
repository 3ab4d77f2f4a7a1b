//! Metrics collaborator seam: the canary analysis step reads
//! aggregated error-rate and latency numbers for a container's monitoring
//! window from this trait. The only implementation lives outside this
//! workspace (the monitoring service); tests supply a fake.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::Result;
use crate::id::ResourceId;

/// Aggregated metrics for one container over a time window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowMetrics {
    pub error_rate_percent: f64,
    pub avg_latency_ms: f64,
    pub sample_count: i64,
}

#[async_trait]
pub trait MetricsProvider: Send + Sync {
    /// Aggregated metrics for `container_id` observed between `since` and
    /// now. Implementations should return `sample_count: 0` rather than an
    /// error when the window has no traffic yet; canary analysis treats a
    /// zero-sample window as inconclusive, not as a fetch failure.
    async fn window_metrics(&self, container_id: ResourceId, since: DateTime<Utc>) -> Result<WindowMetrics>;
}
