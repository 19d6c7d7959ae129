//! Business-context-aware processor.
//!
//! Stage order per request: analyze, cache lookup, retrieve metadata, build
//! prompt, generate SQL, guard, execute, cache store.

use super::types::{ProcessorKind, QueryProcessor, QueryRequest, QueryResponse};
use super::visualization;
use crate::cache::SemanticCache;
use crate::context::{BusinessContextAnalyzer, BusinessContextProfile, ConversationStore};
use crate::error::Result;
use crate::execution::{ensure_read_only, ExecutionContext, QueryResult, SqlExecutor};
use crate::llm::SqlGenerator;
use crate::prompt::PromptBuilder;
use crate::schema_rag::BusinessMetadataRetriever;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Weight of the generator's confidence against the analyzer's.
const GENERATION_WEIGHT: f64 = 0.6;

pub struct EnhancedProcessor {
    analyzer: Arc<BusinessContextAnalyzer>,
    retriever: Arc<BusinessMetadataRetriever>,
    prompt_builder: Arc<PromptBuilder>,
    generator: Arc<SqlGenerator>,
    executor: Arc<dyn SqlExecutor>,
    cache: Arc<SemanticCache>,
    conversations: Arc<ConversationStore>,
    max_rows: usize,
    statement_timeout: Duration,
}

impl EnhancedProcessor {
    pub fn new(
        analyzer: Arc<BusinessContextAnalyzer>,
        retriever: Arc<BusinessMetadataRetriever>,
        prompt_builder: Arc<PromptBuilder>,
        generator: Arc<SqlGenerator>,
        executor: Arc<dyn SqlExecutor>,
        cache: Arc<SemanticCache>,
        conversations: Arc<ConversationStore>,
    ) -> Self {
        Self {
            analyzer,
            retriever,
            prompt_builder,
            generator,
            executor,
            cache,
            conversations,
            max_rows: 1000,
            statement_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_limits(mut self, max_rows: usize, statement_timeout: Duration) -> Self {
        self.max_rows = max_rows;
        self.statement_timeout = statement_timeout;
        self
    }

    fn analyze(&self, request: &QueryRequest) -> BusinessContextProfile {
        let prior = self.conversations.last_turn(&request.user_id);
        let profile = self
            .analyzer
            .analyze(&request.question, &request.user_id, prior.as_ref());
        self.conversations.record(&request.user_id, &profile);
        profile
    }

    async fn from_cache(
        &self,
        request: &QueryRequest,
        profile: &BusinessContextProfile,
    ) -> Option<QueryResponse> {
        let hit = self.cache.lookup_default(&request.question).await?;
        let result: QueryResult = match serde_json::from_value(hit.entry.response.clone()) {
            Ok(result) => result,
            Err(e) => {
                debug!(error = %e, "Cached payload unreadable, ignoring hit");
                return None;
            }
        };
        Some(QueryResponse {
            success: true,
            question: request.question.clone(),
            sql: Some(hit.entry.sql.clone()),
            visualization: Some(visualization::recommend(profile.intent.intent_type, &result)),
            result: Some(result),
            confidence: combine(hit.similarity as f64, profile.confidence_score),
            error: None,
            prompt: None,
            processor: ProcessorKind::Enhanced,
            from_cache: true,
            cache_similarity: Some(hit.similarity),
            fallback_used: false,
            elapsed_ms: 0,
            correlation_id: request.correlation_id.clone(),
        })
    }
}

fn combine(generation: f64, analysis: f64) -> f64 {
    (GENERATION_WEIGHT * generation + (1.0 - GENERATION_WEIGHT) * analysis).clamp(0.0, 1.0)
}

#[async_trait]
impl QueryProcessor for EnhancedProcessor {
    fn kind(&self) -> ProcessorKind {
        ProcessorKind::Enhanced
    }

    async fn process(&self, request: &QueryRequest) -> Result<QueryResponse> {
        let started = Instant::now();
        let profile = self.analyze(request);

        // Follow-ups depend on earlier turns, so their wording alone is not a key.
        let cacheable = !profile.is_follow_up;
        if cacheable {
            if let Some(mut response) = self.from_cache(request, &profile).await {
                response.elapsed_ms = started.elapsed().as_millis() as u64;
                return Ok(response);
            }
        }

        let schema = self.retriever.retrieve(&profile);
        let prompt = self.prompt_builder.build(&profile, &schema);
        debug!(
            template = %prompt.details.template,
            tokens = prompt.details.token_count,
            tables = prompt.details.schema_table_count,
            "Prompt built"
        );

        let generated = self.generator.generate(&prompt.text).await?;
        let sql = ensure_read_only(&generated.sql)?;

        let ctx = ExecutionContext::new(
            request.user_id.clone(),
            request.max_rows.unwrap_or(self.max_rows).min(self.max_rows),
            self.statement_timeout,
        )
        .with_correlation_id(request.correlation_id.clone());
        let result = self.executor.execute(&sql, &ctx).await?;

        if cacheable {
            match serde_json::to_value(&result) {
                Ok(payload) => {
                    self.cache.store(&request.question, &sql, &payload, None).await;
                }
                Err(e) => debug!(error = %e, "Result not cacheable"),
            }
        }

        let confidence = combine(generated.confidence, profile.confidence_score);
        info!(
            intent = %profile.intent.intent_type,
            domain = %profile.domain.name,
            rows = result.row_count,
            confidence,
            "Enhanced query processed"
        );

        Ok(QueryResponse {
            success: true,
            question: request.question.clone(),
            sql: Some(sql),
            visualization: Some(visualization::recommend(profile.intent.intent_type, &result)),
            result: Some(result),
            confidence,
            error: None,
            prompt: Some(prompt.details),
            processor: ProcessorKind::Enhanced,
            from_cache: false,
            cache_similarity: None,
            fallback_used: false,
            elapsed_ms: started.elapsed().as_millis() as u64,
            correlation_id: request.correlation_id.clone(),
        })
    }
}
