//! Job consumer (C9): subscribes to the deployment exchange, deserializes
//! each job, invokes the orchestrator, and ACK/NACKs based on outcome.

pub mod bus;
pub mod consumer;
pub mod metrics_client;
pub mod reconcile;

pub use bus::{DeployBus, BusError};
pub use consumer::{run_consumer, ConsumerConfig};
pub use metrics_client::HttpMetricsProvider;
pub use reconcile::spawn_reconcile_task;
