//! Database layer - pool construction and schema migrations

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::config::DatabaseConfig;
use crate::Result;

/// Build the connection pool the queue and its callers share.
///
/// The notification listener holds one pooled connection for the process
/// lifetime, so `pool_max_size` must leave room for it on top of the
/// caller's own concurrency.
pub async fn connect_pool(config: &DatabaseConfig) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .min_connections(config.pool_min_size)
        .max_connections(config.pool_max_size)
        .acquire_timeout(Duration::from_secs(config.pool_timeout_seconds))
        .connect(&config.url)
        .await?;

    Ok(pool)
}

/// Apply the embedded queue schema migrations.
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    tracing::debug!("Task queue migrations applied");
    Ok(())
}
