//! Executor trait - the contract between the pipeline and the database.

use crate::error::{BiError, Result};
use crate::execution::result::QueryResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Execution context passed to executors
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub user_id: String,
    pub correlation_id: Option<String>,
    /// Rows beyond this are dropped and the result marked truncated
    pub max_rows: usize,
    pub timeout: Duration,
}

impl ExecutionContext {
    pub fn new(user_id: impl Into<String>, max_rows: usize, timeout: Duration) -> Self {
        Self {
            user_id: user_id.into(),
            correlation_id: None,
            max_rows,
            timeout,
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: Option<String>) -> Self {
        self.correlation_id = correlation_id;
        self
    }
}

#[async_trait]
pub trait SqlExecutor: Send + Sync {
    /// Executor name (e.g. "postgres")
    fn name(&self) -> &str;

    async fn execute(&self, sql: &str, ctx: &ExecutionContext) -> Result<QueryResult>;

    async fn health_check(&self) -> Result<()>;
}

/// Stand-in used when no database is configured; every call is unavailable.
pub struct UnconfiguredExecutor;

#[async_trait]
impl SqlExecutor for UnconfiguredExecutor {
    fn name(&self) -> &str {
        "unconfigured"
    }

    async fn execute(&self, _sql: &str, _ctx: &ExecutionContext) -> Result<QueryResult> {
        Err(BiError::ServiceUnavailable("no database configured".into()))
    }

    async fn health_check(&self) -> Result<()> {
        Err(BiError::ServiceUnavailable("no database configured".into()))
    }
}
