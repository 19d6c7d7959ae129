//! Application wiring shared by the HTTP server and the CLI.

use super::problem::{ApiError, CorrelationId};
use super::rate_limit::RateLimiter;
use crate::cache::{CacheStore, InMemoryCacheStore, SemanticCache, SqliteCacheStore};
use crate::config::{AppConfig, CacheBackend};
use crate::context::{BusinessContextAnalyzer, ConversationStore};
use crate::db::{DbPool, QueryHistoryRepository};
use crate::error::{BiError, Result};
use crate::execution::{PostgresExecutor, ResilientExecutor, SqlExecutor, UnconfiguredExecutor};
use crate::llm::provider::DUMMY_API_KEY;
use crate::llm::{LlmProvider, LlmUsageTracker, OpenAiProvider, SqlGenerator};
use crate::metadata::Metadata;
use crate::migration::{MigrationController, MigrationMetrics, MigrationRouter};
use crate::pipeline::{EnhancedProcessor, LegacyProcessor, QueryService, ServiceSettings};
use crate::prompt::PromptBuilder;
use crate::resilience::{CircuitBreaker, RetryPolicy};
use crate::schema_rag::{BusinessMetadataRetriever, Embedder, HashingEmbedder, OpenAiEmbedder};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// External collaborators. Tests substitute mocks here.
pub struct Backends {
    pub executor: Arc<dyn SqlExecutor>,
    pub llm: Arc<dyn LlmProvider>,
    pub embedder: Arc<dyn Embedder>,
    pub cache_store: Arc<dyn CacheStore>,
    pub history: Option<Arc<QueryHistoryRepository>>,
}

impl Backends {
    /// Real backends from configuration. Without a pool every query is
    /// reported as unavailable.
    pub fn from_config(config: &AppConfig, pool: Option<DbPool>) -> Result<Self> {
        let (executor, history): (Arc<dyn SqlExecutor>, _) = match pool {
            Some(pool) => {
                let history = config
                    .database
                    .record_history
                    .then(|| Arc::new(QueryHistoryRepository::new(pool.clone())));
                (Arc::new(PostgresExecutor::new(pool)), history)
            }
            None => (Arc::new(UnconfiguredExecutor), None),
        };

        let embedder: Arc<dyn Embedder> = match config.llm.api_key.as_deref() {
            Some(key) if !key.is_empty() && key != DUMMY_API_KEY => Arc::new(OpenAiEmbedder::new(
                &config.llm,
                key.to_string(),
                config.cache.embedding_dimension,
            )?),
            _ => Arc::new(HashingEmbedder::new(config.cache.embedding_dimension)),
        };

        let cache_store: Arc<dyn CacheStore> = match config.cache.backend {
            CacheBackend::Memory => Arc::new(InMemoryCacheStore::new()),
            CacheBackend::Sqlite => Arc::new(SqliteCacheStore::open(&config.cache.sqlite_path)?),
        };

        Ok(Self {
            executor,
            llm: Arc::new(OpenAiProvider::new(&config.llm)?),
            embedder,
            cache_store,
            history,
        })
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub metadata: Arc<Metadata>,
    pub analyzer: Arc<BusinessContextAnalyzer>,
    pub retriever: Arc<BusinessMetadataRetriever>,
    pub prompt_builder: Arc<PromptBuilder>,
    pub cache: Arc<SemanticCache>,
    pub executor: Arc<dyn SqlExecutor>,
    pub breaker: Arc<CircuitBreaker>,
    pub llm: Arc<dyn LlmProvider>,
    pub usage: Arc<LlmUsageTracker>,
    pub service: Arc<QueryService>,
    pub router: Arc<MigrationRouter>,
    pub metrics: Arc<MigrationMetrics>,
    pub controller: Arc<MigrationController>,
    pub rate_limiter: Arc<RateLimiter>,
    pub conversations: Arc<ConversationStore>,
}

impl AppState {
    pub fn new(config: AppConfig, metadata: Arc<Metadata>, backends: Backends) -> Self {
        let analyzer = Arc::new(BusinessContextAnalyzer::new(metadata.clone()));
        let retriever = Arc::new(BusinessMetadataRetriever::new(
            metadata.clone(),
            config.retrieval.clone(),
        ));
        let prompt_builder = Arc::new(PromptBuilder::new(config.prompt.clone()));
        let cache = Arc::new(SemanticCache::new(
            backends.cache_store,
            backends.embedder,
            config.cache.clone(),
        ));

        let breaker = Arc::new(CircuitBreaker::new("database", (&config.resilience).into()));
        let executor: Arc<dyn SqlExecutor> = Arc::new(ResilientExecutor::new(
            backends.executor,
            RetryPolicy::from(&config.resilience),
            breaker.clone(),
        ));

        let usage = Arc::new(LlmUsageTracker::new(
            config.llm.prompt_cost_per_1k,
            config.llm.completion_cost_per_1k,
        ));
        let generator = Arc::new(SqlGenerator::new(backends.llm.clone(), usage.clone()));
        let statement_timeout = Duration::from_secs(config.database.statement_timeout_secs);

        let conversations = Arc::new(ConversationStore::new(
            config.processing.conversation_turns,
            Duration::from_secs(config.processing.conversation_ttl_secs),
        ));
        let enhanced = EnhancedProcessor::new(
            analyzer.clone(),
            retriever.clone(),
            prompt_builder.clone(),
            generator.clone(),
            executor.clone(),
            cache.clone(),
            conversations.clone(),
        )
        .with_limits(config.database.max_rows, statement_timeout);
        let legacy = LegacyProcessor::new(
            metadata.clone(),
            generator,
            executor.clone(),
            config.prompt.sql_dialect.clone(),
            config.prompt.max_tokens,
        )
        .with_limits(config.database.max_rows, statement_timeout);

        let router = Arc::new(MigrationRouter::new(&config.migration));
        let metrics = Arc::new(MigrationMetrics::new());
        let controller = Arc::new(MigrationController::new(
            router.clone(),
            metrics.clone(),
            config.migration.auto_migration.clone(),
        ));

        let mut service = QueryService::new(
            Arc::new(enhanced),
            Arc::new(legacy),
            router.clone(),
            metrics.clone(),
            ServiceSettings::from(&config),
        );
        if let Some(history) = backends.history {
            service = service.with_history(history);
        }

        info!(
            tables = metadata.tables.len(),
            cache_backend = ?config.cache.backend,
            rollout = config.migration.rollout_percentage,
            "Application state ready"
        );

        Self {
            rate_limiter: Arc::new(RateLimiter::new(
                config.rate_limit.enabled,
                config.rate_limit.requests_per_minute,
            )),
            config: Arc::new(config),
            metadata,
            analyzer,
            retriever,
            prompt_builder,
            cache,
            executor,
            breaker,
            llm: backends.llm,
            usage,
            service: Arc::new(service),
            router,
            metrics,
            controller,
            conversations,
        }
    }

    pub fn error(&self, error: BiError, correlation_id: &CorrelationId) -> ApiError {
        ApiError {
            error,
            expose_kind: !self.config.server.is_production(),
            correlation_id: Some(correlation_id.0.clone()),
        }
    }
}
