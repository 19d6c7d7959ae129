//! Text embedders.
//!
//! [`OpenAiEmbedder`] calls the OpenAI / Azure OpenAI embeddings API.
//! [`HashingEmbedder`] is a local, deterministic feature-hashing embedder used
//! when no API key is configured and for schema ranking.

use crate::config::{LlmConfig, LlmProviderKind};
use crate::error::{BiError, Result};
use crate::fuzzy_matcher::FuzzyMatcher;
use crate::llm::provider::{status_error, transport_error};
use crate::schema_rag::vector_store::Embedding;
use async_trait::async_trait;
use std::time::Duration;

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Embedding>;

    fn dimension(&self) -> usize;

    fn name(&self) -> &str;
}

/// Signed feature hashing over unigrams and bigrams, L2-normalized.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    pub fn embed_sync(&self, text: &str) -> Embedding {
        let mut vector = vec![0.0f32; self.dimension];
        let tokens: Vec<String> = FuzzyMatcher::normalize_term(text)
            .split(' ')
            .filter(|t| !t.is_empty())
            .map(FuzzyMatcher::singularize)
            .collect();

        for token in &tokens {
            self.add_feature(&mut vector, token, 1.0);
        }
        for pair in tokens.windows(2) {
            self.add_feature(&mut vector, &format!("{} {}", pair[0], pair[1]), 0.5);
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|v| *v /= norm);
        }
        vector
    }

    fn add_feature(&self, vector: &mut [f32], feature: &str, weight: f32) {
        let hash = fnv1a(feature.as_bytes());
        let index = (hash % self.dimension as u64) as usize;
        let sign = if (hash >> 63) & 1 == 0 { 1.0 } else { -1.0 };
        vector[index] += sign * weight;
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for b in bytes {
        hash ^= *b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

#[async_trait]
impl Embedder for HashingEmbedder {
    async fn embed(&self, text: &str) -> Result<Embedding> {
        Ok(self.embed_sync(text))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        "hashing"
    }
}

/// Embedding client using the OpenAI-compatible embeddings API
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    provider: LlmProviderKind,
    api_key: String,
    base_url: String,
    model: String,
    api_version: String,
    dimension: usize,
}

impl OpenAiEmbedder {
    pub fn new(config: &LlmConfig, api_key: String, dimension: usize) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| BiError::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            provider: config.provider,
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.embedding_model.clone(),
            api_version: config.api_version.clone(),
            dimension,
        })
    }

    fn request(&self) -> reqwest::RequestBuilder {
        match self.provider {
            LlmProviderKind::OpenAi => self
                .client
                .post(format!("{}/embeddings", self.base_url))
                .header("Authorization", format!("Bearer {}", self.api_key)),
            LlmProviderKind::AzureOpenAi => self
                .client
                .post(format!(
                    "{}/openai/deployments/{}/embeddings?api-version={}",
                    self.base_url, self.model, self.api_version
                ))
                .header("api-key", &self.api_key),
        }
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Embedding> {
        let mut body = serde_json::json!({ "input": text });
        if self.provider == LlmProviderKind::OpenAi {
            body["model"] = serde_json::Value::String(self.model.clone());
            body["dimensions"] = serde_json::Value::from(self.dimension);
        }

        let response = self
            .request()
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(status_error(status, &text));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| BiError::Llm(format!("Failed to parse embeddings response: {}", e)))?;

        let embedding: Embedding = json["data"][0]["embedding"]
            .as_array()
            .ok_or_else(|| BiError::Llm("Embeddings response has no data".to_string()))?
            .iter()
            .filter_map(|v| v.as_f64().map(|f| f as f32))
            .collect();

        if embedding.is_empty() {
            return Err(BiError::Llm("Empty embedding returned".to_string()));
        }
        Ok(embedding)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        &self.model
    }
}
