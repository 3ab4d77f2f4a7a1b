//! AMQP topology and publish helpers for the deployment exchange.
//!
//! Declares the durable `obtura.deploys` exchange/queue pair the inbound
//! trigger arrives on, a companion retry topology used to back off
//! redelivered jobs, and the `obtura.deploys.events` exchange the consumer
//! publishes per-deployment log lines and the terminal `complete` event to.

use std::time::Duration;

use lapin::options::{
    BasicPublishOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::{AMQPValue, FieldTable, LongLongInt, ShortString};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind};
use thiserror::Error;
use tracing::info;

use obtura_core::events::CompleteEvent;

pub const DEPLOY_EXCHANGE: &str = "obtura.deploys";
pub const DEPLOY_ROUTING_KEY: &str = "deploy.triggered";
pub const DEPLOY_QUEUE: &str = "obtura.deploys.worker";

pub const RETRY_EXCHANGE: &str = "obtura.deploys.retry";
pub const RETRY_QUEUE: &str = "obtura.deploys.retry";
/// How long a redelivered job waits in the retry queue before it dead-letters
/// back onto the main exchange for another attempt.
pub const RETRY_BACKOFF: Duration = Duration::from_secs(30);

pub const EVENTS_EXCHANGE: &str = "obtura.deploys.events";
pub const LOG_ROUTING_KEY: &str = "deploy.log";
pub const COMPLETE_ROUTING_KEY: &str = "deploy.complete";

#[derive(Debug, Error)]
pub enum BusError {
    #[error(transparent)]
    Lapin(#[from] lapin::Error),

    #[error("failed to serialize outbound message: {0}")]
    Serialize(#[from] serde_json::Error),
}

pub type BusResult<T> = std::result::Result<T, BusError>;

/// Owns the AMQP connection and the channels the consumer publishes on.
/// The inbound consume channel is created separately by the caller so its
/// prefetch can be configured independently of publishing.
pub struct DeployBus {
    connection: Connection,
    publish_channel: Channel,
}

impl DeployBus {
    pub async fn connect(amqp_url: &str) -> BusResult<Self> {
        let connection =
            Connection::connect(amqp_url, ConnectionProperties::default()).await?;
        let publish_channel = connection.create_channel().await?;
        let bus = Self {
            connection,
            publish_channel,
        };
        bus.declare_topology(&bus.publish_channel).await?;
        Ok(bus)
    }

    /// Declares the durable exchange/queue pair the job consumer binds its
    /// own consume channel to, plus the retry and outbound-events topology.
    /// Idempotent -- safe to call from every process that starts up.
    async fn declare_topology(&self, channel: &Channel) -> BusResult<()> {
        channel
            .exchange_declare(
                DEPLOY_EXCHANGE,
                ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;

        channel
            .exchange_declare(
                RETRY_EXCHANGE,
                ExchangeKind::Direct,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;

        channel
            .exchange_declare(
                EVENTS_EXCHANGE,
                ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;

        let mut queue_args = FieldTable::default();
        queue_args.insert(
            ShortString::from("x-dead-letter-exchange"),
            AMQPValue::LongString(RETRY_EXCHANGE.into()),
        );
        queue_args.insert(
            ShortString::from("x-dead-letter-routing-key"),
            AMQPValue::LongString(DEPLOY_ROUTING_KEY.into()),
        );
        channel
            .queue_declare(
                DEPLOY_QUEUE,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                queue_args,
            )
            .await?;
        channel
            .queue_bind(
                DEPLOY_QUEUE,
                DEPLOY_EXCHANGE,
                DEPLOY_ROUTING_KEY,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await?;

        // The retry queue holds a redelivered job for RETRY_BACKOFF, then
        // its own dead-letter-exchange (the main exchange) routes it back
        // onto the worker queue for another attempt.
        let mut retry_args = FieldTable::default();
        retry_args.insert(
            ShortString::from("x-dead-letter-exchange"),
            AMQPValue::LongString(DEPLOY_EXCHANGE.into()),
        );
        retry_args.insert(
            ShortString::from("x-dead-letter-routing-key"),
            AMQPValue::LongString(DEPLOY_ROUTING_KEY.into()),
        );
        retry_args.insert(
            ShortString::from("x-message-ttl"),
            AMQPValue::LongLongInt(RETRY_BACKOFF.as_millis() as LongLongInt),
        );
        channel
            .queue_declare(
                RETRY_QUEUE,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                retry_args,
            )
            .await?;
        channel
            .queue_bind(
                RETRY_QUEUE,
                RETRY_EXCHANGE,
                DEPLOY_ROUTING_KEY,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await?;

        info!("declared obtura.deploys AMQP topology");
        Ok(())
    }

    pub async fn create_consume_channel(&self) -> BusResult<Channel> {
        let channel = self.connection.create_channel().await?;
        Ok(channel)
    }

    /// Publishes a single log line for `deployment_id` to the events exchange.
    pub async fn publish_log(&self, deployment_id: obtura_core::ResourceId, line: &str) -> BusResult<()> {
        let payload = serde_json::to_vec(&serde_json::json!({
            "deploymentId": deployment_id,
            "line": line,
        }))?;
        self.publish_channel
            .basic_publish(
                EVENTS_EXCHANGE,
                LOG_ROUTING_KEY,
                BasicPublishOptions::default(),
                &payload,
                BasicProperties::default().with_delivery_mode(2),
            )
            .await?
            .await?;
        Ok(())
    }

    /// Publishes the terminal `complete` event for a finished deployment.
    pub async fn publish_complete(&self, event: &CompleteEvent) -> BusResult<()> {
        let payload = serde_json::to_vec(event)?;
        self.publish_channel
            .basic_publish(
                EVENTS_EXCHANGE,
                COMPLETE_ROUTING_KEY,
                BasicPublishOptions::default(),
                &payload,
                BasicProperties::default().with_delivery_mode(2),
            )
            .await?
            .await?;
        Ok(())
    }
}
