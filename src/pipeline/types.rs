//! Request/response types shared by both query processors.

use crate::error::{BiError, ErrorKind};
use crate::execution::QueryResult;
use crate::prompt::PromptDetails;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::visualization::VisualizationConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessorKind {
    Legacy,
    Enhanced,
}

impl fmt::Display for ProcessorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessorKind::Legacy => write!(f, "legacy"),
            ProcessorKind::Enhanced => write!(f, "enhanced"),
        }
    }
}

fn default_user() -> String {
    "anonymous".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    pub question: String,
    #[serde(default = "default_user")]
    pub user_id: String,
    #[serde(default)]
    pub max_rows: Option<usize>,
    #[serde(skip)]
    pub correlation_id: Option<String>,
}

impl QueryRequest {
    pub fn new(question: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            user_id: user_id.into(),
            max_rows: None,
            correlation_id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorInfo {
    pub code: ErrorKind,
    pub message: String,
}

impl From<&BiError> for ErrorInfo {
    fn from(err: &BiError) -> Self {
        Self {
            code: err.kind(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResponse {
    pub success: bool,
    pub question: String,
    pub sql: Option<String>,
    pub result: Option<QueryResult>,
    pub confidence: f64,
    pub visualization: Option<VisualizationConfig>,
    pub error: Option<ErrorInfo>,
    pub prompt: Option<PromptDetails>,
    pub processor: ProcessorKind,
    pub from_cache: bool,
    pub cache_similarity: Option<f32>,
    pub fallback_used: bool,
    pub elapsed_ms: u64,
    pub correlation_id: Option<String>,
}

impl QueryResponse {
    pub fn failure(processor: ProcessorKind, question: &str, err: &BiError) -> Self {
        Self {
            success: false,
            question: question.to_string(),
            sql: None,
            result: None,
            confidence: 0.0,
            visualization: None,
            error: Some(ErrorInfo::from(err)),
            prompt: None,
            processor,
            from_cache: false,
            cache_similarity: None,
            fallback_used: false,
            elapsed_ms: 0,
            correlation_id: None,
        }
    }

    /// HTTP status the response should be served with.
    pub fn status_code(&self) -> u16 {
        match &self.error {
            Some(error) if !self.success => error.code.status_code(),
            _ => 200,
        }
    }
}

/// One way of turning a question into an answer.
#[async_trait]
pub trait QueryProcessor: Send + Sync {
    fn kind(&self) -> ProcessorKind;

    /// Errors are returned rather than folded into the response so the
    /// caller can decide on fallback.
    async fn process(&self, request: &QueryRequest) -> crate::error::Result<QueryResponse>;
}
