//! Strategy engines: blue/green, rolling, and canary, each driving
//! the phase state machine for one deployment from `preparing` to a
//! terminal phase.

pub mod blue_green;
pub mod canary;
pub mod rolling;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use obtura_config::SystemConfig;
use obtura_core::runtime::ContainerRuntime;
use obtura_db::repo::{CanaryAnalysisRepo, ContainerRepo, DeploymentRepo, EventsRepo, RoutingRepo, StrategyRepo};
use obtura_core::metrics::MetricsProvider;
use obtura_router::FileRouterProgrammer;

/// Bundles every collaborator a strategy engine needs, borrowed for the
/// lifetime of one `deploy` call. Kept as a struct of references rather
/// than threading a dozen parameters through every helper.
pub struct StrategyCtx<'a> {
    pub runtime: &'a Arc<dyn ContainerRuntime>,
    pub router: &'a Arc<FileRouterProgrammer>,
    pub metrics: &'a Arc<dyn MetricsProvider>,
    pub deployments: &'a dyn DeploymentRepo,
    pub strategy_state: &'a dyn StrategyRepo,
    pub containers: &'a dyn ContainerRepo,
    pub routing: &'a dyn RoutingRepo,
    pub events: &'a dyn EventsRepo,
    pub canary_analysis: &'a dyn CanaryAnalysisRepo,
    pub config: &'a SystemConfig,
    /// The worker's ambient cancellation handle for this deploy call.
    /// Every suspension point longer than a single collaborator RPC
    /// (health polls, drain sleeps, canary monitoring) observes this.
    pub cancellation: CancellationToken,
}
