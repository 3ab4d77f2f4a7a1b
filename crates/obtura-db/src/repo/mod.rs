pub mod canary;
pub mod container;
pub mod deployment;
pub mod events;
pub mod quota;
pub mod rollback;
pub mod routing;
pub mod strategy;
pub mod tenant;

pub use canary::{CanaryAnalysisRepo, CanaryAnalysisResult, PgCanaryAnalysisRepo};
pub use container::{ContainerRepo, PgContainerRepo};
pub use deployment::{DeploymentRepo, PgDeploymentRepo};
pub use events::{EventsRepo, PgEventsRepo};
pub use quota::{PgQuotaRepo, QuotaRepo};
pub use rollback::{PgRollbackRepo, RollbackRecord, RollbackRepo};
pub use routing::{PgRoutingRepo, RoutingRepo};
pub use strategy::{PgStrategyRepo, StrategyRepo};
pub use tenant::{PgTenantRepo, TenantRepo};
