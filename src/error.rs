use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BiError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Metadata error: {0}")]
    Metadata(String),

    #[error("Database error: {0}")]
    Database(String),

    /// Deadlocks, statement timeouts, dropped connections. Safe to retry.
    #[error("Transient database error: {0}")]
    TransientDatabase(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("LLM provider unavailable: {0}")]
    LlmUnavailable(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Logger error: {0}")]
    Logger(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl From<sqlx::Error> for BiError {
    fn from(err: sqlx::Error) -> Self {
        crate::execution::error_classifier::classify_sqlx_error(err)
    }
}

/// Coarse error category shared by HTTP mapping and `QueryResponse.error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    Validation,
    Unauthorized,
    Forbidden,
    NotFound,
    RateLimited,
    Timeout,
    ServiceUnavailable,
    LlmUnavailable,
    ExecutionFailed,
    Internal,
}

impl ErrorKind {
    pub fn status_code(&self) -> u16 {
        match self {
            ErrorKind::Validation => 400,
            ErrorKind::Unauthorized => 401,
            ErrorKind::Forbidden => 403,
            ErrorKind::NotFound => 404,
            ErrorKind::Timeout => 408,
            ErrorKind::RateLimited => 429,
            ErrorKind::ServiceUnavailable | ErrorKind::LlmUnavailable => 503,
            ErrorKind::ExecutionFailed | ErrorKind::Internal => 500,
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "Invalid request",
            ErrorKind::Unauthorized => "Unauthorized",
            ErrorKind::Forbidden => "Forbidden",
            ErrorKind::NotFound => "Resource not found",
            ErrorKind::RateLimited => "Too many requests",
            ErrorKind::Timeout => "Request timed out",
            ErrorKind::ServiceUnavailable => "Service unavailable",
            ErrorKind::LlmUnavailable => "Language model unavailable",
            ErrorKind::ExecutionFailed => "Query execution failed",
            ErrorKind::Internal => "Internal server error",
        }
    }

    /// Slug used in problem-details `type` URIs.
    pub fn slug(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::NotFound => "not-found",
            ErrorKind::RateLimited => "rate-limited",
            ErrorKind::Timeout => "timeout",
            ErrorKind::ServiceUnavailable => "service-unavailable",
            ErrorKind::LlmUnavailable => "llm-unavailable",
            ErrorKind::ExecutionFailed => "execution-failed",
            ErrorKind::Internal => "internal",
        }
    }
}

impl BiError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BiError::Validation(_) => ErrorKind::Validation,
            BiError::Unauthorized(_) => ErrorKind::Unauthorized,
            BiError::Forbidden(_) => ErrorKind::Forbidden,
            BiError::NotFound(_) => ErrorKind::NotFound,
            BiError::RateLimited { .. } => ErrorKind::RateLimited,
            BiError::Timeout(_) => ErrorKind::Timeout,
            BiError::ServiceUnavailable(_) => ErrorKind::ServiceUnavailable,
            BiError::LlmUnavailable(_) => ErrorKind::LlmUnavailable,
            BiError::Database(_) | BiError::TransientDatabase(_) | BiError::Execution(_) => {
                ErrorKind::ExecutionFailed
            }
            BiError::Metadata(_)
            | BiError::Llm(_)
            | BiError::Cache(_)
            | BiError::Config(_)
            | BiError::Logger(_)
            | BiError::Io(_)
            | BiError::Json(_)
            | BiError::Sqlite(_) => ErrorKind::Internal,
        }
    }

    /// Variant name, reported in problem details outside production.
    pub fn variant_name(&self) -> &'static str {
        match self {
            BiError::Validation(_) => "Validation",
            BiError::Unauthorized(_) => "Unauthorized",
            BiError::Forbidden(_) => "Forbidden",
            BiError::NotFound(_) => "NotFound",
            BiError::RateLimited { .. } => "RateLimited",
            BiError::Timeout(_) => "Timeout",
            BiError::ServiceUnavailable(_) => "ServiceUnavailable",
            BiError::Metadata(_) => "Metadata",
            BiError::Database(_) => "Database",
            BiError::TransientDatabase(_) => "TransientDatabase",
            BiError::Llm(_) => "Llm",
            BiError::LlmUnavailable(_) => "LlmUnavailable",
            BiError::Cache(_) => "Cache",
            BiError::Execution(_) => "Execution",
            BiError::Config(_) => "Config",
            BiError::Logger(_) => "Logger",
            BiError::Io(_) => "Io",
            BiError::Json(_) => "Json",
            BiError::Sqlite(_) => "Sqlite",
        }
    }
}

pub type Result<T> = std::result::Result<T, BiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(BiError::Validation("x".into()).kind().status_code(), 400);
        assert_eq!(BiError::RateLimited { retry_after_secs: 3 }.kind().status_code(), 429);
        assert_eq!(BiError::Timeout("x".into()).kind().status_code(), 408);
        assert_eq!(BiError::LlmUnavailable("down".into()).kind().status_code(), 503);
        assert_eq!(BiError::ServiceUnavailable("open".into()).kind().status_code(), 503);
        assert_eq!(BiError::Metadata("bad".into()).kind().status_code(), 500);
    }

    #[test]
    fn test_transient_database_is_execution_failure() {
        let err = BiError::TransientDatabase("deadlock detected".into());
        assert_eq!(err.kind(), ErrorKind::ExecutionFailed);
        assert_eq!(err.variant_name(), "TransientDatabase");
    }
}
