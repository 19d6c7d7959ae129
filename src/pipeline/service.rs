//! Query service facade: route, optionally compare, process with a timeout,
//! fall back, record outcome.

use super::types::{ProcessorKind, QueryProcessor, QueryRequest, QueryResponse};
use crate::config::AppConfig;
use crate::db::QueryHistoryRepository;
use crate::error::{BiError, Result};
use crate::migration::{ComparisonRecord, MigrationMetrics, MigrationRouter};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub timeout: Duration,
    pub fallback_to_legacy: bool,
    pub comparison_enabled: bool,
    pub comparison_sample_percentage: f64,
    pub max_question_length: usize,
}

impl From<&AppConfig> for ServiceSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            timeout: Duration::from_secs(config.processing.timeout_secs),
            fallback_to_legacy: config.migration.fallback_to_legacy,
            comparison_enabled: config.migration.comparison_enabled,
            comparison_sample_percentage: config.migration.comparison_sample_percentage,
            max_question_length: config.processing.max_question_length,
        }
    }
}

/// Errors after which the legacy path gets a chance to answer.
fn should_fall_back(err: &BiError) -> bool {
    matches!(
        err,
        BiError::Llm(_) | BiError::LlmUnavailable(_) | BiError::Validation(_)
    )
}

pub struct QueryService {
    enhanced: Arc<dyn QueryProcessor>,
    legacy: Arc<dyn QueryProcessor>,
    router: Arc<MigrationRouter>,
    metrics: Arc<MigrationMetrics>,
    history: Option<Arc<QueryHistoryRepository>>,
    settings: ServiceSettings,
}

impl QueryService {
    pub fn new(
        enhanced: Arc<dyn QueryProcessor>,
        legacy: Arc<dyn QueryProcessor>,
        router: Arc<MigrationRouter>,
        metrics: Arc<MigrationMetrics>,
        settings: ServiceSettings,
    ) -> Self {
        Self {
            enhanced,
            legacy,
            router,
            metrics,
            history: None,
            settings,
        }
    }

    pub fn with_history(mut self, history: Arc<QueryHistoryRepository>) -> Self {
        self.history = Some(history);
        self
    }

    pub fn router(&self) -> &Arc<MigrationRouter> {
        &self.router
    }

    pub fn metrics(&self) -> &Arc<MigrationMetrics> {
        &self.metrics
    }

    pub fn settings(&self) -> &ServiceSettings {
        &self.settings
    }

    fn processor(&self, kind: ProcessorKind) -> &Arc<dyn QueryProcessor> {
        match kind {
            ProcessorKind::Enhanced => &self.enhanced,
            ProcessorKind::Legacy => &self.legacy,
        }
    }

    fn validate(&self, request: &QueryRequest) -> Result<()> {
        let question = request.question.trim();
        if question.is_empty() {
            return Err(BiError::Validation("question must not be empty".into()));
        }
        if question.chars().count() > self.settings.max_question_length {
            return Err(BiError::Validation(format!(
                "question exceeds {} characters",
                self.settings.max_question_length
            )));
        }
        Ok(())
    }

    async fn run(&self, kind: ProcessorKind, request: &QueryRequest) -> (Result<QueryResponse>, u64) {
        let started = Instant::now();
        let outcome = tokio::time::timeout(self.settings.timeout, self.processor(kind).process(request))
            .await
            .unwrap_or_else(|_| {
                Err(BiError::Timeout(format!(
                    "query processing exceeded {}s",
                    self.settings.timeout.as_secs()
                )))
            });
        let elapsed = started.elapsed().as_millis() as u64;

        let (success, confidence) = match &outcome {
            Ok(response) => (response.success, response.confidence),
            Err(_) => (false, 0.0),
        };
        self.metrics.record(kind, elapsed, success, confidence);
        (outcome, elapsed)
    }

    fn sample_comparison(&self) -> bool {
        self.settings.comparison_enabled
            && rand::random::<f64>() * 100.0 < self.settings.comparison_sample_percentage
    }

    /// Process a question end to end. Failures are reported in the response.
    pub async fn handle(&self, request: QueryRequest) -> QueryResponse {
        let started = Instant::now();
        let decision = self.router.route(&request.user_id);
        let primary = decision.processor;

        if let Err(e) = self.validate(&request) {
            let mut response = QueryResponse::failure(primary, &request.question, &e);
            response.correlation_id = request.correlation_id.clone();
            return response;
        }

        let (outcome, fallback) = if self.sample_comparison() {
            self.compare(primary, &request).await
        } else {
            (self.run(primary, &request).await.0, None)
        };

        let mut response = match outcome {
            Ok(response) => response,
            Err(e) if primary == ProcessorKind::Enhanced
                && self.settings.fallback_to_legacy
                && should_fall_back(&e) =>
            {
                warn!(error = %e, user = %request.user_id, "Enhanced processing failed, falling back to legacy");
                let legacy = match fallback {
                    Some(result) => result,
                    None => self.run(ProcessorKind::Legacy, &request).await.0,
                };
                let mut response = legacy.unwrap_or_else(|e| {
                    QueryResponse::failure(ProcessorKind::Legacy, &request.question, &e)
                });
                response.fallback_used = true;
                response
            }
            Err(e) => {
                warn!(error = %e, processor = %primary, "Query processing failed");
                QueryResponse::failure(primary, &request.question, &e)
            }
        };

        response.elapsed_ms = started.elapsed().as_millis() as u64;
        response.correlation_id = request.correlation_id.clone();
        info!(
            processor = %response.processor,
            reason = ?decision.reason,
            success = response.success,
            from_cache = response.from_cache,
            fallback = response.fallback_used,
            elapsed_ms = response.elapsed_ms,
            "Query handled"
        );

        if let Some(history) = &self.history {
            if let Err(e) = history.record(&request.user_id, &request.question, &response).await {
                warn!(error = %e, "Failed to record query history");
            }
        }
        response
    }

    /// Run both processors concurrently. Returns the primary outcome and,
    /// when the primary is enhanced, the legacy outcome for fallback.
    async fn compare(
        &self,
        primary: ProcessorKind,
        request: &QueryRequest,
    ) -> (Result<QueryResponse>, Option<Result<QueryResponse>>) {
        let ((enhanced, enhanced_ms), (legacy, legacy_ms)) = tokio::join!(
            self.run(ProcessorKind::Enhanced, request),
            self.run(ProcessorKind::Legacy, request)
        );

        let summary = |r: &Result<QueryResponse>| match r {
            Ok(resp) => (resp.success, resp.confidence, resp.sql.clone()),
            Err(_) => (false, 0.0, None),
        };
        let (enhanced_success, enhanced_confidence, enhanced_sql) = summary(&enhanced);
        let (legacy_success, legacy_confidence, legacy_sql) = summary(&legacy);

        let record = ComparisonRecord {
            primary,
            enhanced_elapsed_ms: enhanced_ms,
            legacy_elapsed_ms: legacy_ms,
            enhanced_success,
            legacy_success,
            enhanced_confidence,
            legacy_confidence,
            same_sql: enhanced_sql.is_some() && enhanced_sql == legacy_sql,
        };
        info!(
            enhanced_ms,
            legacy_ms,
            enhanced_success,
            legacy_success,
            enhanced_confidence,
            legacy_confidence,
            "Processor comparison"
        );
        self.metrics.record_comparison(record);

        match primary {
            ProcessorKind::Enhanced => (enhanced, Some(legacy)),
            ProcessorKind::Legacy => (legacy, None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MigrationConfig;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubProcessor {
        kind: ProcessorKind,
        fail_with: Option<fn() -> BiError>,
        delay: Duration,
        calls: AtomicUsize,
    }

    impl StubProcessor {
        fn ok(kind: ProcessorKind) -> Arc<Self> {
            Arc::new(Self {
                kind,
                fail_with: None,
                delay: Duration::ZERO,
                calls: AtomicUsize::new(0),
            })
        }

        fn failing(kind: ProcessorKind, err: fn() -> BiError) -> Arc<Self> {
            Arc::new(Self {
                kind,
                fail_with: Some(err),
                delay: Duration::ZERO,
                calls: AtomicUsize::new(0),
            })
        }

        fn slow(kind: ProcessorKind, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                kind,
                fail_with: None,
                delay,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl QueryProcessor for StubProcessor {
        fn kind(&self) -> ProcessorKind {
            self.kind
        }

        async fn process(&self, request: &QueryRequest) -> Result<QueryResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if let Some(err) = self.fail_with {
                return Err(err());
            }
            let mut response = QueryResponse::failure(self.kind, &request.question, &BiError::Validation(String::new()));
            response.success = true;
            response.error = None;
            response.sql = Some(format!("SELECT '{}'", self.kind));
            response.confidence = 0.8;
            Ok(response)
        }
    }

    fn settings(fallback: bool, comparison: bool) -> ServiceSettings {
        ServiceSettings {
            timeout: Duration::from_secs(300),
            fallback_to_legacy: fallback,
            comparison_enabled: comparison,
            comparison_sample_percentage: 100.0,
            max_question_length: 200,
        }
    }

    fn service(
        enhanced: Arc<StubProcessor>,
        legacy: Arc<StubProcessor>,
        settings: ServiceSettings,
    ) -> QueryService {
        let router = Arc::new(MigrationRouter::new(&MigrationConfig::default()));
        QueryService::new(enhanced, legacy, router, Arc::new(MigrationMetrics::new()), settings)
    }

    #[tokio::test]
    async fn test_llm_failure_falls_back_to_legacy() {
        let enhanced = StubProcessor::failing(ProcessorKind::Enhanced, || BiError::LlmUnavailable("down".into()));
        let legacy = StubProcessor::ok(ProcessorKind::Legacy);
        let svc = service(enhanced, legacy.clone(), settings(true, false));

        let response = svc.handle(QueryRequest::new("total deposits", "alice")).await;
        assert!(response.success);
        assert!(response.fallback_used);
        assert_eq!(response.processor, ProcessorKind::Legacy);
        assert_eq!(legacy.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_llm_failure_without_fallback_is_503() {
        let enhanced = StubProcessor::failing(ProcessorKind::Enhanced, || BiError::LlmUnavailable("down".into()));
        let legacy = StubProcessor::ok(ProcessorKind::Legacy);
        let svc = service(enhanced, legacy.clone(), settings(false, false));

        let response = svc.handle(QueryRequest::new("total deposits", "alice")).await;
        assert!(!response.success);
        assert!(response.error.is_some());
        assert_eq!(response.status_code(), 503);
        assert_eq!(legacy.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_circuit_open_does_not_fall_back() {
        let enhanced = StubProcessor::failing(ProcessorKind::Enhanced, || {
            BiError::ServiceUnavailable("circuit open".into())
        });
        let legacy = StubProcessor::ok(ProcessorKind::Legacy);
        let svc = service(enhanced, legacy.clone(), settings(true, false));

        let response = svc.handle(QueryRequest::new("total deposits", "alice")).await;
        assert_eq!(response.status_code(), 503);
        assert_eq!(legacy.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_empty_and_oversized_questions_rejected() {
        let svc = service(
            StubProcessor::ok(ProcessorKind::Enhanced),
            StubProcessor::ok(ProcessorKind::Legacy),
            settings(true, false),
        );
        let empty = svc.handle(QueryRequest::new("   ", "alice")).await;
        assert_eq!(empty.status_code(), 400);
        let long = svc.handle(QueryRequest::new("x".repeat(201), "alice")).await;
        assert_eq!(long.status_code(), 400);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_yields_408() {
        let svc = QueryService::new(
            StubProcessor::slow(ProcessorKind::Enhanced, Duration::from_secs(600)),
            StubProcessor::ok(ProcessorKind::Legacy),
            Arc::new(MigrationRouter::new(&MigrationConfig::default())),
            Arc::new(MigrationMetrics::new()),
            settings(true, false),
        );
        let response = svc.handle(QueryRequest::new("total deposits", "alice")).await;
        assert_eq!(response.status_code(), 408);
        assert!(!response.fallback_used);
    }

    #[tokio::test]
    async fn test_comparison_runs_both_and_returns_primary() {
        let enhanced = StubProcessor::ok(ProcessorKind::Enhanced);
        let legacy = StubProcessor::ok(ProcessorKind::Legacy);
        let svc = service(enhanced.clone(), legacy.clone(), settings(true, true));

        let response = svc.handle(QueryRequest::new("total deposits", "alice")).await;
        assert_eq!(response.processor, ProcessorKind::Enhanced);
        assert_eq!(enhanced.calls.load(Ordering::SeqCst), 1);
        assert_eq!(legacy.calls.load(Ordering::SeqCst), 1);

        let comparisons = svc.metrics().recent_comparisons(10);
        assert_eq!(comparisons.len(), 1);
        assert!(!comparisons[0].same_sql);
    }
}
