//! PostgreSQL executor.
//!
//! Column names come from `describe`. Rows are fetched as `row_to_json` of an
//! anonymous record, so every PostgreSQL type arrives as plain JSON without
//! per-type decoding and values are keyed by position (`f1`, `f2`, ...).
//! Duplicate column names therefore keep all their values.

use super::engine::{ExecutionContext, SqlExecutor};
use super::result::QueryResult;
use crate::error::{BiError, Result};
use async_trait::async_trait;
use sqlx::postgres::PgPool;
use sqlx::{Column, Executor};
use std::time::Instant;
use tracing::debug;

pub struct PostgresExecutor {
    pool: PgPool,
}

impl PostgresExecutor {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl SqlExecutor for PostgresExecutor {
    fn name(&self) -> &str {
        "postgres"
    }

    async fn execute(&self, sql: &str, ctx: &ExecutionContext) -> Result<QueryResult> {
        let started = Instant::now();
        let sql = sql.trim().trim_end_matches(';');

        let run = async {
            let describe = self.pool.describe(sql).await?;
            let columns: Vec<String> = describe
                .columns()
                .iter()
                .map(|c| c.name().to_string())
                .collect();

            let wrapped = wrap_positional_json(sql, ctx.max_rows + 1);
            let objects: Vec<serde_json::Value> = sqlx::query_scalar(&wrapped)
                .fetch_all(&self.pool)
                .await?;
            Ok::<_, BiError>((columns, objects))
        };

        let (columns, objects) = tokio::time::timeout(ctx.timeout, run)
            .await
            .map_err(|_| {
                BiError::TransientDatabase(format!(
                    "statement timed out after {}s",
                    ctx.timeout.as_secs()
                ))
            })??;

        let rows = positional_rows(columns.len(), objects);

        let elapsed = started.elapsed().as_millis() as u64;
        let result = QueryResult::new(columns, rows, self.name())
            .limit(ctx.max_rows)
            .with_timing(elapsed);
        debug!(
            rows = result.row_count,
            truncated = result.truncated,
            elapsed_ms = elapsed,
            "Query executed"
        );
        Ok(result)
    }

    async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// Wrap `sql` so each row comes back as one JSON object keyed by position.
/// The newline keeps a trailing `--` comment from swallowing the wrapper.
fn wrap_positional_json(sql: &str, limit: usize) -> String {
    format!("SELECT row_to_json(ROW(q.*)) FROM (\n{}\n) q LIMIT {}", sql, limit)
}

fn positional_rows(width: usize, objects: Vec<serde_json::Value>) -> Vec<Vec<serde_json::Value>> {
    objects
        .into_iter()
        .map(|obj| {
            (1..=width)
                .map(|i| obj.get(format!("f{i}")).cloned().unwrap_or(serde_json::Value::Null))
                .collect()
        })
        .collect()
}
