//! RFC 7807 problem details and correlation ids.

use crate::error::BiError;
use axum::extract::Request;
use axum::http::{header, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::{error, warn};
use uuid::Uuid;

pub const CORRELATION_HEADER: &str = "x-correlation-id";
const PROBLEM_TYPE_BASE: &str = "https://errors.bi-query-engine.dev/";

#[derive(Debug, Clone)]
pub struct CorrelationId(pub String);

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProblemDetails {
    #[serde(rename = "type")]
    pub type_uri: String,
    pub title: String,
    pub status: u16,
    pub detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

/// Error returned by handlers; rendered as problem details.
#[derive(Debug)]
pub struct ApiError {
    pub error: BiError,
    pub expose_kind: bool,
    pub correlation_id: Option<String>,
}

impl ApiError {
    pub fn problem(&self) -> ProblemDetails {
        let kind = self.error.kind();
        ProblemDetails {
            type_uri: format!("{}{}", PROBLEM_TYPE_BASE, kind.slug()),
            title: kind.title().to_string(),
            status: kind.status_code(),
            detail: self.error.to_string(),
            kind: self
                .expose_kind
                .then(|| self.error.variant_name().to_string()),
            correlation_id: self.correlation_id.clone(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let problem = self.problem();
        let status =
            StatusCode::from_u16(problem.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            error!(error = %self.error, correlation_id = ?self.correlation_id, "Request failed");
        } else {
            warn!(error = %self.error, correlation_id = ?self.correlation_id, "Request rejected");
        }

        let mut response = (status, Json(problem)).into_response();
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/problem+json"),
        );
        if let BiError::RateLimited { retry_after_secs } = self.error {
            if let Ok(value) = HeaderValue::from_str(&retry_after_secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

/// Reuse the caller's `x-correlation-id` or mint one, expose it to handlers
/// and echo it on the response.
pub async fn correlation_id(mut request: Request, next: Next) -> Response {
    let id = request
        .headers()
        .get(CORRELATION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty() && v.len() <= 128)
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    request.extensions_mut().insert(CorrelationId(id.clone()));
    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&id) {
        response.headers_mut().insert(CORRELATION_HEADER, value);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_problem_hides_kind_in_production() {
        let err = |expose_kind| ApiError {
            error: BiError::Timeout("slow".into()),
            expose_kind,
            correlation_id: Some("abc".into()),
        };
        let dev = err(true).problem();
        assert_eq!(dev.status, 408);
        assert_eq!(dev.kind.as_deref(), Some("Timeout"));
        assert!(dev.type_uri.ends_with("/timeout"));

        let prod = err(false).problem();
        assert!(prod.kind.is_none());
        assert_eq!(prod.correlation_id.as_deref(), Some("abc"));
    }

    #[test]
    fn test_rate_limited_sets_retry_after() {
        let response = ApiError {
            error: BiError::RateLimited { retry_after_secs: 12 },
            expose_kind: false,
            correlation_id: None,
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "12");
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/problem+json");
    }
}
