//! HTTP client for the monitoring collaborator's aggregated-metrics
//! endpoint, the only shipped `MetricsProvider`. The metrics/log
//! aggregation service itself lives outside this workspace; this is just
//! the thin client the canary analysis step reads through.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use obtura_core::id::ResourceId;
use obtura_core::metrics::{MetricsProvider, WindowMetrics};
use obtura_core::{Error, Result};

#[derive(Debug, Deserialize)]
struct WindowMetricsResponse {
    #[serde(rename = "errorRatePercent")]
    error_rate_percent: f64,
    #[serde(rename = "avgLatencyMs")]
    avg_latency_ms: f64,
    #[serde(rename = "sampleCount")]
    sample_count: i64,
}

/// Queries the monitoring service's `/internal/containers/{id}/metrics`
/// endpoint for the aggregated error rate and latency of a container's
/// canary monitoring window.
pub struct HttpMetricsProvider {
    client: reqwest::Client,
    base_url: String,
}

impl HttpMetricsProvider {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl MetricsProvider for HttpMetricsProvider {
    async fn window_metrics(&self, container_id: ResourceId, since: DateTime<Utc>) -> Result<WindowMetrics> {
        let url = format!("{}/internal/containers/{container_id}/metrics", self.base_url);

        let response = self
            .client
            .get(&url)
            .query(&[("since", since.to_rfc3339())])
            .send()
            .await
            .map_err(|e| Error::Transient(format!("metrics provider request failed: {e}")))?;

        // A window with no traffic yet is not a fetch failure -- canary
        // analysis treats it as an inconclusive sample, not an error.
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(WindowMetrics {
                error_rate_percent: 0.0,
                avg_latency_ms: 0.0,
                sample_count: 0,
            });
        }

        let body: WindowMetricsResponse = response
            .error_for_status()
            .map_err(|e| Error::Transient(format!("metrics provider returned an error: {e}")))?
            .json()
            .await
            .map_err(|e| Error::Internal(format!("malformed metrics response: {e}")))?;

        Ok(WindowMetrics {
            error_rate_percent: body.error_rate_percent,
            avg_latency_ms: body.avg_latency_ms,
            sample_count: body.sample_count,
        })
    }
}
