//! KDL configuration parsing for the Obtura deployment core.

pub mod error;
pub mod system;

pub use error::{ConfigError, ConfigResult};
pub use system::{CanaryThresholds, PortPoolConfig, RateLimiterConfig, RouterConfig, SystemConfig};
