//! Canary analysis: compares a canary container's aggregated metrics
//! over its monitoring window against configured thresholds and produces a
//! promote/rollback decision plus a 0-100 score.

use chrono::{DateTime, Utc};

use obtura_config::CanaryThresholds;
use obtura_core::ResourceId;
use obtura_core::Result;
use obtura_core::metrics::{MetricsProvider, WindowMetrics};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CanaryDecision {
    Promote,
    Rollback,
}

#[derive(Debug, Clone, Copy)]
pub struct CanaryVerdict {
    pub decision: CanaryDecision,
    pub metrics: WindowMetrics,
    /// 0-100: how comfortably the metrics clear the thresholds. 100 means
    /// zero errors and zero latency; 0 means at or past either ceiling.
    pub score: u8,
}

/// Decision is `promote` iff error rate <= threshold **and** average
/// latency < threshold; otherwise `rollback`.
fn score(metrics: &WindowMetrics, thresholds: &CanaryThresholds) -> u8 {
    let error_component = (1.0 - (metrics.error_rate_percent / thresholds.max_error_rate_percent).min(1.0)).max(0.0);
    let latency_component =
        (1.0 - (metrics.avg_latency_ms / thresholds.max_avg_latency_ms).min(1.0)).max(0.0);
    (((error_component + latency_component) / 2.0) * 100.0).round() as u8
}

pub async fn analyze(
    metrics_provider: &dyn MetricsProvider,
    container_id: ResourceId,
    monitoring_started_at: DateTime<Utc>,
    thresholds: &CanaryThresholds,
) -> Result<CanaryVerdict> {
    let metrics = metrics_provider.window_metrics(container_id, monitoring_started_at).await?;

    let decision = if metrics.error_rate_percent <= thresholds.max_error_rate_percent
        && metrics.avg_latency_ms < thresholds.max_avg_latency_ms
    {
        CanaryDecision::Promote
    } else {
        CanaryDecision::Rollback
    };

    Ok(CanaryVerdict {
        decision,
        metrics,
        score: score(&metrics, thresholds),
    })
}
