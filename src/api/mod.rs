//! HTTP surface.
//!
//! ```text
//! POST   /api/businesscontext/{analyze,prompt,metadata,entities,tables,intent}
//! POST   /api/query-execution/execute
//! GET    /health
//! GET    /api/cache/stats
//! POST   /api/cache/optimize
//! DELETE /api/cache
//! GET    /api/migration/status
//! GET    /api/llm/usage
//! ```

pub mod handlers;
pub mod problem;
pub mod rate_limit;
pub mod state;

pub use problem::{ApiError, CorrelationId, ProblemDetails, CORRELATION_HEADER};
pub use rate_limit::RateLimiter;
pub use state::{AppState, Backends};

use crate::error::{BiError, Result};
use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/api/businesscontext/analyze", post(handlers::analyze))
        .route("/api/businesscontext/prompt", post(handlers::prompt))
        .route("/api/businesscontext/metadata", post(handlers::metadata))
        .route("/api/businesscontext/entities", post(handlers::entities))
        .route("/api/businesscontext/tables", post(handlers::tables))
        .route("/api/businesscontext/intent", post(handlers::intent))
        .route("/api/query-execution/execute", post(handlers::execute))
        .route("/api/cache/stats", get(handlers::cache_stats))
        .route("/api/cache/optimize", post(handlers::cache_optimize))
        .route("/api/cache", axum::routing::delete(handlers::cache_clear))
        .route("/api/migration/status", get(handlers::migration_status))
        .route("/api/llm/usage", get(handlers::llm_usage))
        .layer(axum::middleware::from_fn(problem::correlation_id))
        .with_state(state)
}

/// Serve until `shutdown` is cancelled.
pub async fn serve(state: AppState, bind_addr: &str, shutdown: CancellationToken) -> Result<()> {
    let router = build_router(state);
    let listener = TcpListener::bind(bind_addr)
        .await
        .map_err(|e| BiError::Config(format!("bind failed on {bind_addr}: {e}")))?;

    info!(%bind_addr, "HTTP server listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    info!("HTTP server shut down");
    Ok(())
}
