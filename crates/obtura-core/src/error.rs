//! Error taxonomy for the deployment core.
//!
//! Validation, quota, runtime, health, transient-bus and fatal errors all
//! map to a `kind()` the job consumer uses to decide ACK vs
//! NACK-with-requeue.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("deployment rate limit exceeded: {kind} at {current}/{max}")]
    LimitExceeded {
        kind: &'static str,
        current: i64,
        max: i64,
    },

    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("runtime error: {0}")]
    Runtime(String),

    #[error("transient runtime error: {0}")]
    Transient(String),

    #[error("resource denied: {0}")]
    Denied(String),

    #[error("health check failed: {0}")]
    HealthCheckFailed(String),

    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("deployment failed: {0}")]
    DeploymentFailed(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),
}

/// Coarse classification used to decide bus acknowledgement behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Quota,
    Runtime,
    Health,
    TransientBus,
    Fatal,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidInput(_) => ErrorKind::Validation,
            Error::LimitExceeded { .. } | Error::QuotaExceeded(_) => ErrorKind::Quota,
            Error::Runtime(_) | Error::Denied(_) | Error::ResourceExhausted(_) => {
                ErrorKind::Runtime
            }
            Error::HealthCheckFailed(_) | Error::Timeout(_) => ErrorKind::Health,
            Error::Transient(_) => ErrorKind::TransientBus,
            Error::NotFound(_)
            | Error::DeploymentFailed(_)
            | Error::Cancelled
            | Error::Internal(_) => ErrorKind::Fatal,
        }
    }

    /// Whether the consumer should requeue the delivery (vs ACK and record failure).
    pub fn should_retry(&self) -> bool {
        matches!(self.kind(), ErrorKind::TransientBus)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
