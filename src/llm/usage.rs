//! Per-model token and cost accounting.

use super::provider::LlmCompletion;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Mutex;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelUsage {
    pub model: String,
    pub requests: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub estimated_cost_usd: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageReport {
    pub models: Vec<ModelUsage>,
    pub total_requests: u64,
    pub total_tokens: u64,
    pub total_cost_usd: f64,
}

pub struct LlmUsageTracker {
    prompt_cost_per_1k: f64,
    completion_cost_per_1k: f64,
    models: Mutex<BTreeMap<String, ModelUsage>>,
}

impl LlmUsageTracker {
    pub fn new(prompt_cost_per_1k: f64, completion_cost_per_1k: f64) -> Self {
        Self {
            prompt_cost_per_1k,
            completion_cost_per_1k,
            models: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn record(&self, completion: &LlmCompletion) {
        let cost = completion.prompt_tokens as f64 / 1000.0 * self.prompt_cost_per_1k
            + completion.completion_tokens as f64 / 1000.0 * self.completion_cost_per_1k;

        let mut models = self.models.lock().unwrap_or_else(|e| e.into_inner());
        let usage = models
            .entry(completion.model.clone())
            .or_insert_with(|| ModelUsage {
                model: completion.model.clone(),
                ..ModelUsage::default()
            });
        usage.requests += 1;
        usage.prompt_tokens += completion.prompt_tokens as u64;
        usage.completion_tokens += completion.completion_tokens as u64;
        usage.estimated_cost_usd += cost;
    }

    pub fn report(&self) -> UsageReport {
        let models: Vec<ModelUsage> = self
            .models
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();
        UsageReport {
            total_requests: models.iter().map(|m| m.requests).sum(),
            total_tokens: models
                .iter()
                .map(|m| m.prompt_tokens + m.completion_tokens)
                .sum(),
            total_cost_usd: models.iter().map(|m| m.estimated_cost_usd).sum(),
            models,
        }
    }
}
