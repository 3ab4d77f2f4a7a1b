//! Persistence errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("duplicate: {0}")]
    Duplicate(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("invalid phase transition: {0}")]
    InvalidTransition(String),

    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl DbError {
    /// Whether this failure is a Postgres unique-constraint violation
    /// (SQLSTATE 23505) -- the signal the port allocator retries on when two
    /// deployments race for the same host port (see the claim-on-insert
    /// policy).
    pub fn is_unique_violation(&self) -> bool {
        match self {
            DbError::Database(sqlx::Error::Database(e)) => e.code().as_deref() == Some("23505"),
            _ => false,
        }
    }
}

impl From<DbError> for obtura_core::Error {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound(msg) => obtura_core::Error::NotFound(msg),
            DbError::Duplicate(msg) => obtura_core::Error::InvalidInput(msg),
            DbError::Serialization(msg) => obtura_core::Error::Internal(msg),
            DbError::InvalidTransition(msg) => obtura_core::Error::Internal(msg),
            e @ DbError::Database(_) if e.is_unique_violation() => {
                obtura_core::Error::Transient(e.to_string())
            }
            DbError::Database(e) => obtura_core::Error::Transient(e.to_string()),
            DbError::Migration(e) => obtura_core::Error::Internal(e.to_string()),
        }
    }
}

pub type DbResult<T> = std::result::Result<T, DbError>;
