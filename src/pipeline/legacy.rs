//! Legacy processor: full schema dump, no context analysis, no cache.
//!
//! It is the fallback target for the enhanced path and the baseline the
//! migration harness compares against.

use super::types::{ProcessorKind, QueryProcessor, QueryRequest, QueryResponse};
use super::visualization;
use crate::context::IntentType;
use crate::error::Result;
use crate::execution::{ensure_read_only, ExecutionContext, SqlExecutor};
use crate::llm::SqlGenerator;
use crate::metadata::Metadata;
use crate::prompt::build_legacy_prompt;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

pub struct LegacyProcessor {
    metadata: Arc<Metadata>,
    generator: Arc<SqlGenerator>,
    executor: Arc<dyn SqlExecutor>,
    dialect: String,
    max_tokens: usize,
    max_rows: usize,
    statement_timeout: Duration,
}

impl LegacyProcessor {
    pub fn new(
        metadata: Arc<Metadata>,
        generator: Arc<SqlGenerator>,
        executor: Arc<dyn SqlExecutor>,
        dialect: impl Into<String>,
        max_tokens: usize,
    ) -> Self {
        Self {
            metadata,
            generator,
            executor,
            dialect: dialect.into(),
            max_tokens,
            max_rows: 1000,
            statement_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_limits(mut self, max_rows: usize, statement_timeout: Duration) -> Self {
        self.max_rows = max_rows;
        self.statement_timeout = statement_timeout;
        self
    }
}

#[async_trait]
impl QueryProcessor for LegacyProcessor {
    fn kind(&self) -> ProcessorKind {
        ProcessorKind::Legacy
    }

    async fn process(&self, request: &QueryRequest) -> Result<QueryResponse> {
        let started = Instant::now();
        let prompt = build_legacy_prompt(&self.metadata, &request.question, &self.dialect, self.max_tokens);

        let generated = self.generator.generate(&prompt.text).await?;
        let sql = ensure_read_only(&generated.sql)?;

        let ctx = ExecutionContext::new(
            request.user_id.clone(),
            request.max_rows.unwrap_or(self.max_rows).min(self.max_rows),
            self.statement_timeout,
        )
        .with_correlation_id(request.correlation_id.clone());
        let result = self.executor.execute(&sql, &ctx).await?;
        info!(rows = result.row_count, "Legacy query processed");

        Ok(QueryResponse {
            success: true,
            question: request.question.clone(),
            sql: Some(sql),
            visualization: Some(visualization::recommend(IntentType::Unknown, &result)),
            result: Some(result),
            confidence: generated.confidence,
            error: None,
            prompt: Some(prompt.details),
            processor: ProcessorKind::Legacy,
            from_cache: false,
            cache_similarity: None,
            fallback_used: false,
            elapsed_ms: started.elapsed().as_millis() as u64,
            correlation_id: request.correlation_id.clone(),
        })
    }
}
