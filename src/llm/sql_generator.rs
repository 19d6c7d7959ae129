//! SQL generation from a built prompt.

use super::provider::{LlmCompletion, LlmProvider};
use super::usage::LlmUsageTracker;
use crate::error::{BiError, Result};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

lazy_static! {
    static ref FENCED_SQL: Regex =
        Regex::new(r"(?is)```(?:sql|postgresql|postgres)?\s*\n?(.*?)```").expect("static regex");
    static ref BARE_SQL: Regex = Regex::new(r"(?is)\b(with|select)\b.*").expect("static regex");
    static ref HEDGING: Regex =
        Regex::new(r"(?i)\b(assum\w*|unclear|not sure|might|guess)\b").expect("static regex");
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedSql {
    pub sql: String,
    pub confidence: f64,
    pub model: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

/// Pull SQL out of a completion, preferring a fenced block.
///
/// Returns the SQL and whether it came from a fence.
pub fn extract_sql(text: &str) -> Option<(String, bool)> {
    if let Some(caps) = FENCED_SQL.captures(text) {
        let sql = caps.get(1).map(|m| m.as_str().trim()).unwrap_or_default();
        if !sql.is_empty() {
            return Some((sql.trim_end_matches(';').trim().to_string(), true));
        }
    }
    BARE_SQL.find(text).map(|m| {
        let sql = m.as_str().trim();
        // Stop at the first blank line; anything after is commentary.
        let sql = sql.split("\n\n").next().unwrap_or(sql);
        (sql.trim().trim_end_matches(';').trim().to_string(), false)
    })
}

fn generation_confidence(completion: &LlmCompletion, fenced: bool) -> f64 {
    let mut confidence: f64 = if fenced { 0.9 } else { 0.75 };
    if HEDGING.is_match(&completion.text) {
        confidence -= 0.2;
    }
    confidence.clamp(0.1, 1.0)
}

pub struct SqlGenerator {
    provider: Arc<dyn LlmProvider>,
    usage: Arc<LlmUsageTracker>,
}

impl SqlGenerator {
    pub fn new(provider: Arc<dyn LlmProvider>, usage: Arc<LlmUsageTracker>) -> Self {
        Self { provider, usage }
    }

    pub fn provider(&self) -> &Arc<dyn LlmProvider> {
        &self.provider
    }

    pub fn usage(&self) -> &Arc<LlmUsageTracker> {
        &self.usage
    }

    pub async fn generate(&self, prompt: &str) -> Result<GeneratedSql> {
        let completion = self.provider.complete(prompt).await?;
        self.usage.record(&completion);

        let (sql, fenced) = extract_sql(&completion.text)
            .filter(|(sql, _)| !sql.is_empty())
            .ok_or_else(|| BiError::Llm("completion did not contain SQL".into()))?;
        let confidence = generation_confidence(&completion, fenced);
        debug!(fenced, confidence, "Extracted SQL from completion");

        Ok(GeneratedSql {
            sql,
            confidence,
            model: completion.model,
            prompt_tokens: completion.prompt_tokens,
            completion_tokens: completion.completion_tokens,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct CannedProvider(&'static str);

    #[async_trait]
    impl LlmProvider for CannedProvider {
        async fn complete(&self, _prompt: &str) -> Result<LlmCompletion> {
            Ok(LlmCompletion {
                text: self.0.to_string(),
                prompt_tokens: 100,
                completion_tokens: 20,
                model: "test-model".into(),
            })
        }

        fn model(&self) -> &str {
            "test-model"
        }
    }

    #[test]
    fn test_extract_fenced_sql() {
        let text = "Here you go:\n```sql\nSELECT COUNT(*) FROM players;\n```\nThis counts players.";
        let (sql, fenced) = extract_sql(text).unwrap();
        assert_eq!(sql, "SELECT COUNT(*) FROM players");
        assert!(fenced);
    }

    #[test]
    fn test_extract_bare_sql_stops_at_commentary() {
        let text = "SELECT player_id\nFROM players\n\nThis returns all player ids.";
        let (sql, fenced) = extract_sql(text).unwrap();
        assert_eq!(sql, "SELECT player_id\nFROM players");
        assert!(!fenced);
    }

    #[test]
    fn test_extract_none_without_sql() {
        assert!(extract_sql("I cannot answer that question.").is_none());
    }

    #[tokio::test]
    async fn test_generate_records_usage_and_penalises_hedging() {
        let usage = Arc::new(LlmUsageTracker::new(0.03, 0.06));
        let confident = SqlGenerator::new(
            Arc::new(CannedProvider("```sql\nSELECT 1\n```")),
            usage.clone(),
        );
        let hedged = SqlGenerator::new(
            Arc::new(CannedProvider("Assuming deposits are in EUR:\n```sql\nSELECT 1\n```")),
            usage.clone(),
        );

        let a = confident.generate("q").await.unwrap();
        let b = hedged.generate("q").await.unwrap();
        assert!(a.confidence > b.confidence);
        assert_eq!(usage.report().total_requests, 2);
    }

    #[tokio::test]
    async fn test_generate_without_sql_fails() {
        let generator = SqlGenerator::new(
            Arc::new(CannedProvider("Sorry, no idea.")),
            Arc::new(LlmUsageTracker::new(0.0, 0.0)),
        );
        assert!(matches!(generator.generate("q").await, Err(BiError::Llm(_))));
    }
}
