//! SQL persistence for the Obtura deployment core.

pub mod error;
pub mod repo;

use sqlx::postgres::{PgPool, PgPoolOptions};

pub use error::{DbError, DbResult};

/// Connect to Postgres with a 10-connection pool shared across the process.
pub async fn create_pool(database_url: &str) -> DbResult<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await?;
    Ok(pool)
}

pub async fn run_migrations(pool: &PgPool) -> DbResult<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}
