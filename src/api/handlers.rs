//! Axum handlers.
//!
//! Business-context endpoints expose each pipeline stage on its own for
//! diagnosis; `/api/query-execution/execute` runs the full service.

use super::problem::{ApiError, CorrelationId};
use super::state::AppState;
use crate::context::{BusinessContextProfile, BusinessDomain, BusinessEntity, QueryIntent};
use crate::error::BiError;
use crate::pipeline::{QueryRequest, QueryResponse};
use crate::prompt::BuiltPrompt;
use crate::resilience::CircuitState;
use crate::schema_rag::ContextualBusinessSchema;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;

type ApiResult<T> = std::result::Result<Json<T>, ApiError>;

fn default_user() -> String {
    "anonymous".to_string()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeRequest {
    pub question: String,
    #[serde(default = "default_user")]
    pub user_id: String,
    #[serde(default)]
    pub max_tables: Option<usize>,
    #[serde(default)]
    pub max_tokens: Option<usize>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptResponse {
    pub profile: BusinessContextProfile,
    pub prompt: BuiltPrompt,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableSummary {
    pub name: String,
    pub relevance: f64,
    pub importance: f64,
    pub is_bridge: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentResponse {
    pub intent: QueryIntent,
    pub domain: BusinessDomain,
    pub confidence: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentHealth {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ComponentHealth {
    fn up() -> Self {
        Self {
            status: "up",
            detail: None,
        }
    }

    fn down(detail: impl Into<String>) -> Self {
        Self {
            status: "down",
            detail: Some(detail.into()),
        }
    }

    fn is_up(&self) -> bool {
        self.status == "up"
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: &'static str,
    pub database: ComponentHealth,
    pub cache: ComponentHealth,
    pub circuit: CircuitState,
    pub llm: ComponentHealth,
}

impl AppState {
    /// Validate and rate-limit a business-context request, then analyze it.
    fn profile(&self, request: &AnalyzeRequest, cid: &CorrelationId) -> Result<BusinessContextProfile, ApiError> {
        if request.question.trim().is_empty() {
            return Err(self.error(BiError::Validation("question must not be empty".into()), cid));
        }
        if request.question.chars().count() > self.config.processing.max_question_length {
            return Err(self.error(
                BiError::Validation(format!(
                    "question exceeds {} characters",
                    self.config.processing.max_question_length
                )),
                cid,
            ));
        }
        self.rate_limiter
            .check(&request.user_id)
            .map_err(|e| self.error(e, cid))?;
        Ok(self.analyzer.analyze(&request.question, &request.user_id, None))
    }

    fn schema(&self, request: &AnalyzeRequest, profile: &BusinessContextProfile) -> ContextualBusinessSchema {
        let config = self.retriever.config();
        self.retriever.retrieve_with_budget(
            profile,
            request.max_tables.unwrap_or(config.max_tables).max(1),
            request.max_tokens.unwrap_or(config.max_tokens).max(1),
        )
    }
}

/// POST /api/businesscontext/analyze
pub async fn analyze(
    State(state): State<AppState>,
    Extension(cid): Extension<CorrelationId>,
    Json(request): Json<AnalyzeRequest>,
) -> ApiResult<BusinessContextProfile> {
    Ok(Json(state.profile(&request, &cid)?))
}

/// POST /api/businesscontext/prompt
pub async fn prompt(
    State(state): State<AppState>,
    Extension(cid): Extension<CorrelationId>,
    Json(request): Json<AnalyzeRequest>,
) -> ApiResult<PromptResponse> {
    let profile = state.profile(&request, &cid)?;
    let schema = state.schema(&request, &profile);
    let prompt = state.prompt_builder.build(&profile, &schema);
    Ok(Json(PromptResponse { profile, prompt }))
}

/// POST /api/businesscontext/metadata
pub async fn metadata(
    State(state): State<AppState>,
    Extension(cid): Extension<CorrelationId>,
    Json(request): Json<AnalyzeRequest>,
) -> ApiResult<ContextualBusinessSchema> {
    let profile = state.profile(&request, &cid)?;
    Ok(Json(state.schema(&request, &profile)))
}

/// POST /api/businesscontext/entities
pub async fn entities(
    State(state): State<AppState>,
    Extension(cid): Extension<CorrelationId>,
    Json(request): Json<AnalyzeRequest>,
) -> ApiResult<Vec<BusinessEntity>> {
    Ok(Json(state.profile(&request, &cid)?.entities))
}

/// POST /api/businesscontext/tables
pub async fn tables(
    State(state): State<AppState>,
    Extension(cid): Extension<CorrelationId>,
    Json(request): Json<AnalyzeRequest>,
) -> ApiResult<Vec<TableSummary>> {
    let profile = state.profile(&request, &cid)?;
    let schema = state.schema(&request, &profile);
    Ok(Json(
        schema
            .tables
            .into_iter()
            .map(|t| TableSummary {
                name: t.name,
                relevance: t.relevance,
                importance: t.importance,
                is_bridge: t.is_bridge,
            })
            .collect(),
    ))
}

/// POST /api/businesscontext/intent
pub async fn intent(
    State(state): State<AppState>,
    Extension(cid): Extension<CorrelationId>,
    Json(request): Json<AnalyzeRequest>,
) -> ApiResult<IntentResponse> {
    let profile = state.profile(&request, &cid)?;
    Ok(Json(IntentResponse {
        intent: profile.intent,
        domain: profile.domain,
        confidence: profile.confidence_score,
    }))
}

/// POST /api/query-execution/execute
///
/// Processing failures are reported in the body with `success = false` and
/// an HTTP status matching the error.
pub async fn execute(
    State(state): State<AppState>,
    Extension(cid): Extension<CorrelationId>,
    Json(mut request): Json<QueryRequest>,
) -> Result<Response, ApiError> {
    state
        .rate_limiter
        .check(&request.user_id)
        .map_err(|e| state.error(e, &cid))?;
    request.correlation_id = Some(cid.0.clone());

    let response: QueryResponse = state.service.handle(request).await;
    let status = StatusCode::from_u16(response.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    Ok((status, Json(response)).into_response())
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> Response {
    let timeout = Duration::from_secs(state.config.processing.health_timeout_secs);

    let database = match tokio::time::timeout(timeout, state.executor.health_check()).await {
        Ok(Ok(())) => ComponentHealth::up(),
        Ok(Err(e)) => ComponentHealth::down(e.to_string()),
        Err(_) => ComponentHealth::down(format!("no response within {}s", timeout.as_secs())),
    };
    let cache = if !state.cache.is_enabled() {
        ComponentHealth::up()
    } else {
        match tokio::time::timeout(timeout, state.cache.ping()).await {
            Ok(Ok(_)) => ComponentHealth::up(),
            Ok(Err(e)) => ComponentHealth::down(e.to_string()),
            Err(_) => ComponentHealth::down("cache store timed out"),
        }
    };
    let llm = if state.llm.is_configured() {
        ComponentHealth::up()
    } else {
        ComponentHealth::down("no API key configured")
    };
    let circuit = state.breaker.state();

    let healthy = database.is_up() && cache.is_up() && llm.is_up() && circuit != CircuitState::Open;
    let report = HealthReport {
        status: if healthy { "healthy" } else { "degraded" },
        database,
        cache,
        circuit,
        llm,
    };
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report)).into_response()
}

/// GET /api/cache/stats
pub async fn cache_stats(State(state): State<AppState>) -> Response {
    Json(state.cache.stats().await).into_response()
}

/// POST /api/cache/optimize
pub async fn cache_optimize(
    State(state): State<AppState>,
    Extension(cid): Extension<CorrelationId>,
) -> Result<Response, ApiError> {
    let report = state.cache.optimize().await.map_err(|e| state.error(e, &cid))?;
    Ok(Json(report).into_response())
}

/// DELETE /api/cache
pub async fn cache_clear(
    State(state): State<AppState>,
    Extension(cid): Extension<CorrelationId>,
) -> Result<Response, ApiError> {
    state.cache.clear().await.map_err(|e| state.error(e, &cid))?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

/// GET /api/migration/status
pub async fn migration_status(State(state): State<AppState>) -> Response {
    let window = Duration::from_secs(state.controller.config().window_secs);
    Json(json!({
        "enhancedEnabled": state.router.enhanced_enabled(),
        "rolloutPercentage": state.router.rollout_percentage(),
        "fallbackToLegacy": state.service.settings().fallback_to_legacy,
        "comparisonEnabled": state.service.settings().comparison_enabled,
        "autoMigrationEnabled": state.controller.config().enabled,
        "enhanced": state.metrics.summary(crate::pipeline::ProcessorKind::Enhanced, window),
        "legacy": state.metrics.summary(crate::pipeline::ProcessorKind::Legacy, window),
        "lastEvaluation": state.controller.last_evaluation(),
        "recentComparisons": state.metrics.recent_comparisons(20),
    }))
    .into_response()
}

/// GET /api/llm/usage
pub async fn llm_usage(State(state): State<AppState>) -> Response {
    Json(state.usage.report()).into_response()
}
