mod common;

use bi_query_engine::error::ErrorKind;
use bi_query_engine::jobs;
use bi_query_engine::pipeline::{ProcessorKind, QueryRequest};
use bi_query_engine::resilience::CircuitState;
use common::{ExecutorMode, MockExecutor, MockLlm, DEPOSITS_QUESTION};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn deposits_by_country_succeeds_on_healthy_backend() {
    let llm = MockLlm::new(true);
    let executor = MockExecutor::new(ExecutorMode::Healthy);
    let state = common::state(common::test_config(), llm.clone(), executor.clone());

    let response = state
        .service
        .handle(QueryRequest::new(DEPOSITS_QUESTION, "analyst-1"))
        .await;

    assert!(response.success, "unexpected failure: {:?}", response.error);
    assert_eq!(response.processor, ProcessorKind::Enhanced);
    assert!(response.sql.as_deref().is_some_and(|s| !s.is_empty()));
    assert!(response.confidence > 0.0);
    assert!(response.error.is_none());
    assert_eq!(response.status_code(), 200);

    let result = response.result.expect("result");
    assert_eq!(result.row_count, 2);
    assert!(response.visualization.is_some());

    let details = response.prompt.expect("prompt details");
    assert!(details.token_count <= details.max_tokens);
    assert!(details.schema_table_count >= 2);
    assert!(details.template.starts_with("business_context."));

    let prompts = llm.prompts.lock().unwrap();
    assert!(prompts[0].contains("daily_actions"));
    assert!(prompts[0].contains("countries"));
}

#[tokio::test]
async fn repeated_question_is_served_from_cache() {
    let llm = MockLlm::new(true);
    let executor = MockExecutor::new(ExecutorMode::Healthy);
    let state = common::state(common::test_config(), llm.clone(), executor.clone());

    let first = state
        .service
        .handle(QueryRequest::new(DEPOSITS_QUESTION, "analyst-1"))
        .await;
    let second = state
        .service
        .handle(QueryRequest::new("show me TOTAL deposits by country, last week!", "analyst-2"))
        .await;

    assert!(first.success && !first.from_cache);
    assert!(second.success && second.from_cache);
    assert_eq!(second.cache_similarity, Some(1.0));
    assert_eq!(second.sql, first.sql);
    assert_eq!(executor.calls(), 1);
    assert_eq!(llm.calls.load(std::sync::atomic::Ordering::SeqCst), 1);

    let stats = state.cache.stats().await;
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.entries, Some(1));
}

#[tokio::test]
async fn llm_unavailable_without_fallback_is_503() {
    let mut config = common::test_config();
    config.migration.fallback_to_legacy = false;
    let executor = MockExecutor::new(ExecutorMode::Healthy);
    let state = common::state(config, MockLlm::new(false), executor.clone());

    let response = state
        .service
        .handle(QueryRequest::new(DEPOSITS_QUESTION, "analyst-1"))
        .await;

    assert!(!response.success);
    let error = response.error.as_ref().expect("error populated");
    assert_eq!(error.code, ErrorKind::LlmUnavailable);
    assert_eq!(response.status_code(), 503);
    assert!(!response.fallback_used);
    assert_eq!(executor.calls(), 0);
}

#[tokio::test]
async fn llm_failure_falls_back_to_legacy_when_enabled() {
    let llm = MockLlm::new(false);
    let state = common::state(
        common::test_config(),
        llm.clone(),
        MockExecutor::new(ExecutorMode::Healthy),
    );

    let response = state
        .service
        .handle(QueryRequest::new(DEPOSITS_QUESTION, "analyst-1"))
        .await;

    // The legacy path shares the provider, so it fails the same way.
    assert!(response.fallback_used);
    assert_eq!(response.processor, ProcessorKind::Legacy);
    assert_eq!(response.status_code(), 503);
    assert_eq!(llm.calls.load(std::sync::atomic::Ordering::SeqCst), 2);
}

#[tokio::test]
async fn kill_switch_routes_everything_to_legacy() {
    let mut config = common::test_config();
    config.migration.enhanced_enabled = false;
    let llm = MockLlm::new(true);
    let state = common::state(config, llm.clone(), MockExecutor::new(ExecutorMode::Healthy));

    let response = state
        .service
        .handle(QueryRequest::new(DEPOSITS_QUESTION, "analyst-1"))
        .await;

    assert!(response.success);
    assert_eq!(response.processor, ProcessorKind::Legacy);
    let details = response.prompt.expect("prompt details");
    assert_eq!(details.template, "legacy.schema_dump");
}

#[tokio::test]
async fn open_circuit_short_circuits_database_calls() {
    let mut config = common::test_config();
    config.resilience.max_retries = 0;
    config.resilience.minimum_throughput = 3;
    config.resilience.failure_rate_threshold = 0.5;
    let executor = MockExecutor::new(ExecutorMode::Deadlocking);
    let state = common::state(config, MockLlm::new(true), executor.clone());

    for _ in 0..3 {
        let response = state
            .service
            .handle(QueryRequest::new(DEPOSITS_QUESTION, "analyst-1"))
            .await;
        assert!(!response.success);
        assert_eq!(response.error.unwrap().code, ErrorKind::ExecutionFailed);
    }
    assert_eq!(state.breaker.state(), CircuitState::Open);

    let response = state
        .service
        .handle(QueryRequest::new(DEPOSITS_QUESTION, "analyst-1"))
        .await;
    assert!(!response.success);
    assert_eq!(response.error.as_ref().unwrap().code, ErrorKind::ServiceUnavailable);
    assert_eq!(response.status_code(), 503);
    assert_eq!(executor.calls(), 3);
}

#[tokio::test]
async fn unreachable_database_is_service_unavailable() {
    let executor = MockExecutor::new(ExecutorMode::Unreachable);
    let state = common::state(common::test_config(), MockLlm::new(true), executor.clone());

    let response = state
        .service
        .handle(QueryRequest::new(DEPOSITS_QUESTION, "analyst-1"))
        .await;

    assert!(!response.success);
    assert!(!response.fallback_used);
    assert_eq!(response.error.as_ref().unwrap().code, ErrorKind::ServiceUnavailable);
    assert_eq!(response.status_code(), 503);
    // First attempt plus three retries.
    assert_eq!(executor.calls(), 4);
}

#[tokio::test]
async fn routing_is_stable_for_a_user() {
    let mut config = common::test_config();
    config.migration.rollout_percentage = 50;
    let state = common::state(
        config,
        MockLlm::new(true),
        MockExecutor::new(ExecutorMode::Healthy),
    );

    for user in ["alice", "bob", "carol", "dave", "erin"] {
        let first = state.router.route(user);
        for _ in 0..5 {
            assert_eq!(state.router.route(user), first);
        }
    }
}

#[tokio::test]
async fn context_dependent_questions_bypass_the_cache() {
    let executor = MockExecutor::new(ExecutorMode::Healthy);
    let state = common::state(common::test_config(), MockLlm::new(true), executor.clone());

    state
        .service
        .handle(QueryRequest::new(DEPOSITS_QUESTION, "analyst-1"))
        .await;
    let follow_up = state
        .service
        .handle(QueryRequest::new("and by month?", "analyst-1"))
        .await;
    assert!(follow_up.success);
    assert!(!follow_up.from_cache);

    // Another conversation asking the same words must not reuse that answer.
    let other = state
        .service
        .handle(QueryRequest::new("and by month?", "analyst-2"))
        .await;
    assert!(!other.from_cache);
    assert_eq!(executor.calls(), 3);
    assert_eq!(state.cache.stats().await.entries, Some(1));
}

#[tokio::test(start_paused = true)]
async fn idle_conversations_are_pruned_in_background() {
    let state = common::state(
        common::test_config(),
        MockLlm::new(true),
        MockExecutor::new(ExecutorMode::Healthy),
    );
    for user in ["analyst-1", "analyst-2"] {
        state
            .service
            .handle(QueryRequest::new(DEPOSITS_QUESTION, user))
            .await;
    }
    assert_eq!(state.conversations.len(), 2);

    let shutdown = CancellationToken::new();
    let handles = jobs::spawn_all(&state, &shutdown);
    let ttl = state.config.processing.conversation_ttl_secs;
    tokio::time::sleep(Duration::from_secs(ttl + 301)).await;
    assert!(state.conversations.is_empty());

    shutdown.cancel();
    for handle in handles {
        handle.await.unwrap();
    }
}
