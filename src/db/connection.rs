//! Database connection management using sqlx

use crate::config::DatabaseConfig;
use crate::error::{BiError, Result};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::info;

pub type DbPool = PgPool;

/// Build the pool and verify it with `SELECT 1`.
///
/// Every connection gets the configured `statement_timeout`, so a runaway
/// generated query is cancelled server-side as well.
pub async fn init_pool(config: &DatabaseConfig) -> Result<PgPool> {
    let url = config
        .url
        .as_deref()
        .ok_or_else(|| BiError::Config("database.url is not set".into()))?;
    let statement_timeout_ms = config.statement_timeout_secs * 1000;

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
        .after_connect(move |conn, _meta| {
            Box::pin(async move {
                sqlx::query(&format!("SET statement_timeout = {}", statement_timeout_ms))
                    .execute(&mut *conn)
                    .await?;
                Ok(())
            })
        })
        .connect(url)
        .await?;

    sqlx::query("SELECT 1").execute(&pool).await?;
    info!(max_connections = config.max_connections, "Database pool ready");
    Ok(pool)
}
