//! The consume loop: prefetch=1, one deployment driven to completion per
//! delivery, ACK/NACK decided from the orchestrator's error taxonomy --
//! claim one unit of work, run it to completion, report the outcome.

use std::sync::Arc;
use std::time::Instant;

use futures::StreamExt;
use lapin::message::Delivery;
use lapin::options::{BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicQosOptions};
use lapin::types::{AMQPValue, FieldTable};
use tracing::{error, info, warn};

use obtura_core::deployment::DeploymentStatus;
use obtura_core::events::CompleteEvent;
use obtura_core::job::{DeployEnvelope, Job};
use obtura_core::strategy::Phase;
use obtura_core::ResourceId;
use obtura_db::repo::{DeploymentRepo, StrategyRepo};
use obtura_orchestrator::Deployer;

use crate::bus::{DeployBus, DEPLOY_QUEUE};

#[derive(Debug, Clone, Copy)]
pub struct ConsumerConfig {
    /// One deployment driven to completion per worker at a time.
    pub prefetch: u16,
    /// Deliveries dead-lettered back onto the worker queue more than this
    /// many times are given up on rather than retried forever.
    pub max_redeliveries: u32,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            prefetch: 1,
            max_redeliveries: 5,
        }
    }
}

/// Runs the consume loop until the channel closes or the process is asked
/// to shut down. Each delivery is handled to completion before the next
/// one is fetched, honoring `prefetch`.
pub async fn run_consumer(
    bus: &DeployBus,
    deployer: Arc<Deployer>,
    deployments: Arc<dyn DeploymentRepo>,
    strategy_state: Arc<dyn StrategyRepo>,
    config: ConsumerConfig,
) -> anyhow::Result<()> {
    let channel = bus.create_consume_channel().await?;
    channel
        .basic_qos(config.prefetch, BasicQosOptions::default())
        .await?;

    let mut consumer = channel
        .basic_consume(
            DEPLOY_QUEUE,
            "obtura-deployer",
            BasicConsumeOptions::default(),
            FieldTable::default(),
        )
        .await?;

    info!(queue = DEPLOY_QUEUE, prefetch = config.prefetch, "consuming deploy jobs");

    while let Some(delivery) = consumer.next().await {
        let delivery = match delivery {
            Ok(d) => d,
            Err(e) => {
                warn!(error = %e, "error reading delivery from channel, reconnect required");
                return Err(e.into());
            }
        };

        handle_delivery(bus, &deployer, deployments.as_ref(), strategy_state.as_ref(), &config, delivery).await;
    }

    Ok(())
}

async fn handle_delivery(
    bus: &DeployBus,
    deployer: &Deployer,
    deployments: &dyn DeploymentRepo,
    strategy_state: &dyn StrategyRepo,
    config: &ConsumerConfig,
    delivery: Delivery,
) {
    let envelope: DeployEnvelope = match serde_json::from_slice(&delivery.data) {
        Ok(e) => e,
        Err(e) => {
            error!(error = %e, "malformed deploy envelope, dropping message");
            ack_drop(&delivery).await;
            return;
        }
    };

    if let Err(e) = envelope.validate() {
        warn!(deployment_id = %envelope.deployment_id, error = %e, "deploy envelope failed validation");
        if let Err(db_err) = deployments
            .update_status(envelope.deployment_id, DeploymentStatus::Failed, Some(&e.to_string()))
            .await
        {
            error!(deployment_id = %envelope.deployment_id, error = %db_err, "failed to record validation failure");
        }
        ack_drop(&delivery).await;
        return;
    }

    let existing = match deployments.get(envelope.deployment_id).await {
        Ok(d) => d,
        Err(e) => {
            error!(deployment_id = %envelope.deployment_id, error = %e, "deployment row missing for inbound job");
            ack_drop(&delivery).await;
            return;
        }
    };

    let job = match Job::from_envelope(&envelope, existing.strategy, existing.replica_count) {
        Ok(j) => j,
        Err(e) => {
            warn!(deployment_id = %envelope.deployment_id, error = %e, "failed to normalize job from envelope");
            let _ = deployments
                .update_status(envelope.deployment_id, DeploymentStatus::Failed, Some(&e.to_string()))
                .await;
            ack_drop(&delivery).await;
            return;
        }
    };

    if let Err(e) = deployments.mark_deploying(job.deployment_id).await {
        error!(deployment_id = %job.deployment_id, error = %e, "failed to mark deployment deploying");
    }

    let started = Instant::now();
    let outcome = deployer.deploy(job.clone()).await;
    let duration_secs = started.elapsed().as_secs_f64();

    match outcome {
        Ok(()) => {
            info!(deployment_id = %job.deployment_id, duration_secs, "deployment completed");
            publish_completion(bus, strategy_state, job.deployment_id, "active", None, duration_secs).await;
            ack(&delivery).await;
        }
        Err(e) if e.should_retry() => {
            let redeliveries = redelivery_count(&delivery);
            if redeliveries >= config.max_redeliveries {
                error!(
                    deployment_id = %job.deployment_id,
                    redeliveries,
                    error = %e,
                    "giving up on transient bus error after max redeliveries"
                );
                let _ = deployments
                    .update_status(job.deployment_id, DeploymentStatus::Failed, Some(&e.to_string()))
                    .await;
                publish_completion(bus, strategy_state, job.deployment_id, "failed", Some(e.to_string()), duration_secs).await;
                ack_drop(&delivery).await;
            } else {
                warn!(
                    deployment_id = %job.deployment_id,
                    redeliveries,
                    error = %e,
                    "transient error, requeuing via retry topology"
                );
                nack_retry(&delivery).await;
            }
        }
        Err(e) => {
            // The orchestrator has already recorded the deployment as
            // `failed` with its `error_message` and run cleanup -- the
            // failure is durable, so we ACK rather than redeliver it.
            warn!(deployment_id = %job.deployment_id, error = %e, "deployment failed, not retrying");
            publish_completion(bus, strategy_state, job.deployment_id, "failed", Some(e.to_string()), duration_secs).await;
            ack(&delivery).await;
        }
    }
}

async fn publish_completion(
    bus: &DeployBus,
    strategy_state: &dyn StrategyRepo,
    deployment_id: ResourceId,
    status: &str,
    error: Option<String>,
    duration_secs: f64,
) {
    let phase = strategy_state
        .get(deployment_id)
        .await
        .map(|s| s.current_phase)
        .unwrap_or(Phase::Failed)
        .to_string();

    let event = CompleteEvent {
        deployment_id,
        status: status.to_string(),
        phase,
        duration_secs,
        error,
    };
    if let Err(e) = bus.publish_complete(&event).await {
        warn!(deployment_id = %deployment_id, error = %e, "failed to publish completion event");
    }
}

/// Normal ACK: the delivery is fully and durably handled.
async fn ack(delivery: &Delivery) {
    if let Err(e) = delivery.ack(BasicAckOptions::default()).await {
        error!(error = %e, "failed to ack delivery");
    }
}

/// ACK used for messages we are intentionally giving up on (malformed,
/// validation failure, retries exhausted) -- acking removes it from the
/// queue without routing it through the retry dead-letter exchange again.
async fn ack_drop(delivery: &Delivery) {
    ack(delivery).await;
}

/// NACK without requeue: the queue's dead-letter-exchange routes this to
/// the retry topology, which holds it for the backoff window before
/// dead-lettering it back onto the main exchange for redelivery.
async fn nack_retry(delivery: &Delivery) {
    if let Err(e) = delivery
        .nack(BasicNackOptions {
            multiple: false,
            requeue: false,
        })
        .await
    {
        error!(error = %e, "failed to nack delivery for retry");
    }
}

/// Counts prior redelivery hops via the standard RabbitMQ `x-death` header
/// array that accumulates one entry per dead-letter bounce through the
/// retry queue.
fn redelivery_count(delivery: &Delivery) -> u32 {
    let headers = match delivery.properties.headers() {
        Some(h) => h,
        None => return 0,
    };
    match headers.inner().get("x-death") {
        Some(AMQPValue::FieldArray(arr)) => arr.as_slice().len() as u32,
        _ => 0,
    }
}
