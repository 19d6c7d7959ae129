#![allow(dead_code)]

use async_trait::async_trait;
use bi_query_engine::api::{AppState, Backends};
use bi_query_engine::cache::InMemoryCacheStore;
use bi_query_engine::error::{BiError, Result};
use bi_query_engine::execution::{ExecutionContext, QueryResult, SqlExecutor};
use bi_query_engine::llm::{LlmCompletion, LlmProvider};
use bi_query_engine::schema_rag::HashingEmbedder;
use bi_query_engine::{AppConfig, Metadata};
use serde_json::json;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub const DEPOSITS_QUESTION: &str = "Show me total deposits by country last week";

pub const DEPOSITS_SQL: &str = "SELECT c.country_name, SUM(d.deposits) AS total_deposits \
FROM daily_actions d \
JOIN players p ON p.player_id = d.player_id \
JOIN countries c ON c.country_id = p.country_id \
GROUP BY c.country_name";

pub struct MockLlm {
    available: AtomicBool,
    pub calls: AtomicUsize,
    pub prompts: Mutex<Vec<String>>,
}

impl MockLlm {
    pub fn new(available: bool) -> Arc<Self> {
        Arc::new(Self {
            available: AtomicBool::new(available),
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }
}

#[async_trait]
impl LlmProvider for MockLlm {
    async fn complete(&self, prompt: &str) -> Result<LlmCompletion> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());
        if !self.available.load(Ordering::SeqCst) {
            return Err(BiError::LlmUnavailable("connection refused".into()));
        }
        Ok(LlmCompletion {
            text: format!("```sql\n{}\n```", DEPOSITS_SQL),
            prompt_tokens: 400,
            completion_tokens: 60,
            model: "mock-gpt".into(),
        })
    }

    fn model(&self) -> &str {
        "mock-gpt"
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub enum ExecutorMode {
    Healthy,
    Deadlocking,
    Unreachable,
}

pub struct MockExecutor {
    mode: ExecutorMode,
    pub calls: AtomicUsize,
    pub statements: Mutex<Vec<String>>,
}

impl MockExecutor {
    pub fn new(mode: ExecutorMode) -> Arc<Self> {
        Arc::new(Self {
            mode,
            calls: AtomicUsize::new(0),
            statements: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SqlExecutor for MockExecutor {
    fn name(&self) -> &str {
        "mock"
    }

    async fn execute(&self, sql: &str, ctx: &ExecutionContext) -> Result<QueryResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.statements.lock().unwrap().push(sql.to_string());
        match self.mode {
            ExecutorMode::Healthy => Ok(QueryResult::new(
                vec!["country_name".into(), "total_deposits".into()],
                vec![
                    vec![json!("Germany"), json!(1200.5)],
                    vec![json!("France"), json!(800.0)],
                ],
                self.name(),
            )
            .limit(ctx.max_rows)),
            ExecutorMode::Deadlocking => Err(BiError::TransientDatabase("deadlock detected".into())),
            ExecutorMode::Unreachable => Err(BiError::TransientDatabase(
                "Connection: error communicating with database: connection refused".into(),
            )),
        }
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

pub fn metadata() -> Arc<Metadata> {
    let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("metadata");
    Arc::new(Metadata::load(dir).expect("sample metadata loads"))
}

pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.rate_limit.enabled = false;
    config.resilience.initial_delay_ms = 1;
    config.resilience.max_delay_ms = 5;
    config
}

pub fn state(config: AppConfig, llm: Arc<MockLlm>, executor: Arc<MockExecutor>) -> AppState {
    let backends = Backends {
        executor,
        llm,
        embedder: Arc::new(HashingEmbedder::new(config.cache.embedding_dimension)),
        cache_store: Arc::new(InMemoryCacheStore::new()),
        history: None,
    };
    AppState::new(config, metadata(), backends)
}
