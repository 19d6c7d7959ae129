//! Chat-completion providers.
//!
//! [`OpenAiProvider`] speaks the OpenAI chat-completions API and its Azure
//! OpenAI deployment variant. Transport failures, rate limiting and 5xx
//! responses surface as [`BiError::LlmUnavailable`] so callers can fall back.

use crate::config::{LlmConfig, LlmProviderKind};
use crate::error::{BiError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// Key that short-circuits HTTP calls and returns a canned completion.
pub const DUMMY_API_KEY: &str = "dummy-api-key";

const SYSTEM_MESSAGE: &str =
    "You translate business questions into SQL. Respond with SQL only, inside a ```sql fenced block.";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmCompletion {
    pub text: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub model: String,
}

#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<LlmCompletion>;

    fn model(&self) -> &str;

    /// False when no credentials are available; reported by health checks.
    fn is_configured(&self) -> bool {
        true
    }
}

pub fn transport_error(e: reqwest::Error) -> BiError {
    if e.is_timeout() {
        BiError::LlmUnavailable(format!("request timed out: {}", e))
    } else {
        BiError::LlmUnavailable(format!("request failed: {}", e))
    }
}

pub fn status_error(status: reqwest::StatusCode, body: &str) -> BiError {
    let snippet: String = body.chars().take(200).collect();
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        BiError::LlmUnavailable(format!("provider returned {}: {}", status, snippet))
    } else {
        BiError::Llm(format!("provider returned {}: {}", status, snippet))
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

pub struct OpenAiProvider {
    client: reqwest::Client,
    provider: LlmProviderKind,
    api_key: Option<String>,
    base_url: String,
    model: String,
    api_version: String,
    temperature: f32,
    max_completion_tokens: u32,
}

impl OpenAiProvider {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| BiError::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            provider: config.provider,
            api_key: config.api_key.clone().filter(|k| !k.trim().is_empty()),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_version: config.api_version.clone(),
            temperature: config.temperature,
            max_completion_tokens: config.max_completion_tokens,
        })
    }

    fn request(&self, api_key: &str) -> reqwest::RequestBuilder {
        match self.provider {
            LlmProviderKind::OpenAi => self
                .client
                .post(format!("{}/chat/completions", self.base_url))
                .header("Authorization", format!("Bearer {}", api_key)),
            LlmProviderKind::AzureOpenAi => self
                .client
                .post(format!(
                    "{}/openai/deployments/{}/chat/completions?api-version={}",
                    self.base_url, self.model, self.api_version
                ))
                .header("api-key", api_key),
        }
    }

    fn dummy_completion(&self, prompt: &str) -> LlmCompletion {
        let text = "```sql\nSELECT 1 AS ok\n```".to_string();
        LlmCompletion {
            prompt_tokens: crate::prompt::estimate_tokens(prompt) as u32,
            completion_tokens: crate::prompt::estimate_tokens(&text) as u32,
            text,
            model: self.model.clone(),
        }
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    async fn complete(&self, prompt: &str) -> Result<LlmCompletion> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| BiError::LlmUnavailable("no API key configured".into()))?;
        if api_key == DUMMY_API_KEY {
            return Ok(self.dummy_completion(prompt));
        }

        let mut body = serde_json::json!({
            "messages": [
                {"role": "system", "content": SYSTEM_MESSAGE},
                {"role": "user", "content": prompt}
            ],
            "temperature": self.temperature,
            "max_tokens": self.max_completion_tokens
        });
        if self.provider == LlmProviderKind::OpenAi {
            body["model"] = serde_json::Value::String(self.model.clone());
        }

        let response = self
            .request(api_key)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            warn!(status = %status, "LLM request rejected");
            return Err(status_error(status, &text));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| BiError::Llm(format!("Failed to parse LLM response: {}", e)))?;

        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| BiError::Llm("LLM response contained no choices".into()))?;

        let (prompt_tokens, completion_tokens) = match parsed.usage {
            Some(u) => (u.prompt_tokens, u.completion_tokens),
            None => (
                crate::prompt::estimate_tokens(prompt) as u32,
                crate::prompt::estimate_tokens(&text) as u32,
            ),
        };
        debug!(prompt_tokens, completion_tokens, "LLM completion received");

        Ok(LlmCompletion {
            text,
            prompt_tokens,
            completion_tokens,
            model: parsed.model.unwrap_or_else(|| self.model.clone()),
        })
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_error_classification() {
        assert!(matches!(
            status_error(reqwest::StatusCode::TOO_MANY_REQUESTS, "slow down"),
            BiError::LlmUnavailable(_)
        ));
        assert!(matches!(
            status_error(reqwest::StatusCode::BAD_GATEWAY, ""),
            BiError::LlmUnavailable(_)
        ));
        assert!(matches!(
            status_error(reqwest::StatusCode::BAD_REQUEST, "bad prompt"),
            BiError::Llm(_)
        ));
    }

    #[tokio::test]
    async fn test_missing_key_is_unavailable() {
        let provider = OpenAiProvider::new(&LlmConfig::default()).unwrap();
        assert!(!provider.is_configured());
        assert!(matches!(
            provider.complete("question").await,
            Err(BiError::LlmUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_dummy_key_returns_canned_sql() {
        let config = LlmConfig {
            api_key: Some(DUMMY_API_KEY.to_string()),
            ..LlmConfig::default()
        };
        let provider = OpenAiProvider::new(&config).unwrap();
        let completion = provider.complete("how many players").await.unwrap();
        assert!(completion.text.contains("SELECT 1"));
        assert_eq!(completion.model, "gpt-4");
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_unavailable() {
        let config = LlmConfig {
            api_key: Some("sk-test".to_string()),
            base_url: "http://127.0.0.1:9".to_string(),
            timeout_secs: 2,
            ..LlmConfig::default()
        };
        let provider = OpenAiProvider::new(&config).unwrap();
        assert!(matches!(
            provider.complete("question").await,
            Err(BiError::LlmUnavailable(_))
        ));
    }
}
