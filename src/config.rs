//! Application configuration.
//!
//! Layering: built-in defaults, then an optional TOML file, then environment
//! variables. Every section and field has a default so a bare deployment
//! starts with `AppConfig::default()`.

use crate::error::{BiError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub llm: LlmConfig,
    pub database: DatabaseConfig,
    pub cache: CacheConfig,
    pub resilience: ResilienceConfig,
    pub retrieval: RetrievalConfig,
    pub prompt: PromptConfig,
    pub migration: MigrationConfig,
    pub processing: ProcessingConfig,
    pub rate_limit: RateLimitConfig,
    pub metadata: MetadataConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: String,
    /// `production` hides error kinds in problem details.
    pub environment: String,
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            environment: "development".to_string(),
            log_level: "info".to_string(),
        }
    }
}

impl ServerConfig {
    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProviderKind {
    OpenAi,
    AzureOpenAi,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: LlmProviderKind,
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub embedding_model: String,
    /// Azure only.
    pub api_version: String,
    pub temperature: f32,
    pub max_completion_tokens: u32,
    pub timeout_secs: u64,
    /// USD per 1K tokens, used for usage cost estimates.
    pub prompt_cost_per_1k: f64,
    pub completion_cost_per_1k: f64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: LlmProviderKind::OpenAi,
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: None,
            model: "gpt-4".to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
            api_version: "2024-02-01".to_string(),
            temperature: 0.1,
            max_completion_tokens: 1000,
            timeout_secs: 60,
            prompt_cost_per_1k: 0.03,
            completion_cost_per_1k: 0.06,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub max_connections: u32,
    pub acquire_timeout_secs: u64,
    pub statement_timeout_secs: u64,
    pub max_rows: usize,
    /// Load business metadata from the database instead of `metadata.dir`.
    pub metadata_from_db: bool,
    pub record_history: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 10,
            acquire_timeout_secs: 30,
            statement_timeout_secs: 60,
            max_rows: 5000,
            metadata_from_db: false,
            record_history: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheBackend {
    Memory,
    Sqlite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub backend: CacheBackend,
    pub sqlite_path: PathBuf,
    pub similarity_threshold: f32,
    pub max_results: usize,
    pub ttl_secs: u64,
    pub max_entries: usize,
    pub sweep_interval_secs: u64,
    pub embedding_dimension: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            backend: CacheBackend::Memory,
            sqlite_path: PathBuf::from("semantic_cache.db"),
            similarity_threshold: 0.85,
            max_results: 5,
            ttl_secs: 24 * 60 * 60,
            max_entries: 10_000,
            sweep_interval_secs: 300,
            embedding_dimension: 256,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
    pub max_retries: usize,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub failure_rate_threshold: f64,
    /// Calls needed in the sampling window before the failure rate counts.
    pub minimum_throughput: usize,
    pub sampling_window_secs: u64,
    pub break_duration_secs: u64,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 100,
            max_delay_ms: 10_000,
            backoff_multiplier: 2.0,
            failure_rate_threshold: 0.5,
            minimum_throughput: 5,
            sampling_window_secs: 60,
            break_duration_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub max_tables: usize,
    pub max_tokens: usize,
    pub max_columns_per_table: usize,
    pub max_join_depth: usize,
    pub min_relevance: f64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            max_tables: 5,
            max_tokens: 4000,
            max_columns_per_table: 12,
            max_join_depth: 4,
            min_relevance: 0.1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptConfig {
    pub max_tokens: usize,
    pub include_examples: bool,
    pub max_examples: usize,
    pub sql_dialect: String,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            max_tokens: 6000,
            include_examples: true,
            max_examples: 3,
            sql_dialect: "PostgreSQL".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationConfig {
    /// Global kill switch: `false` routes every request to the legacy path.
    pub enhanced_enabled: bool,
    pub rollout_percentage: u8,
    pub allow_list: HashSet<String>,
    pub admin_users: HashSet<String>,
    pub fallback_to_legacy: bool,
    pub comparison_enabled: bool,
    pub comparison_sample_percentage: f64,
    pub auto_migration: AutoMigrationConfig,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            enhanced_enabled: true,
            rollout_percentage: 100,
            allow_list: HashSet::new(),
            admin_users: HashSet::new(),
            fallback_to_legacy: true,
            comparison_enabled: false,
            comparison_sample_percentage: 10.0,
            auto_migration: AutoMigrationConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoMigrationConfig {
    pub enabled: bool,
    pub evaluation_interval_secs: u64,
    pub window_secs: u64,
    pub min_samples: usize,
    pub improvement_threshold: f64,
    pub regression_threshold: f64,
    /// Consecutive evaluations in the same direction before acting.
    pub sustained_evaluations: u32,
    pub step_percentage: u8,
}

impl Default for AutoMigrationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            evaluation_interval_secs: 600,
            window_secs: 3600,
            min_samples: 20,
            improvement_threshold: 0.05,
            regression_threshold: 0.05,
            sustained_evaluations: 3,
            step_percentage: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    pub timeout_secs: u64,
    pub health_timeout_secs: u64,
    pub max_question_length: usize,
    pub conversation_turns: usize,
    /// Idle time after which a user's conversation is forgotten.
    pub conversation_ttl_secs: u64,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 300,
            health_timeout_secs: 5,
            max_question_length: 2000,
            conversation_turns: 5,
            conversation_ttl_secs: 1800,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub requests_per_minute: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            requests_per_minute: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetadataConfig {
    pub dir: PathBuf,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("metadata"),
        }
    }
}

impl AppConfig {
    /// Defaults, then `path` (if given), then environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            BiError::Config(format!("Failed to read config {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| BiError::Config(format!("Invalid config: {}", e)))
    }

    fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    /// Environment overrides, with the lookup injected for tests.
    pub fn apply_env_from(&mut self, get: impl Fn(&str) -> Option<String>) {
        if let Some(key) = get("OPENAI_API_KEY").or_else(|| get("BI_LLM_API_KEY")) {
            if !key.is_empty() {
                self.llm.api_key = Some(key);
            }
        }
        if let Some(url) = get("BI_LLM_BASE_URL") {
            self.llm.base_url = url;
        }
        if let Some(model) = get("BI_LLM_MODEL") {
            self.llm.model = model;
        }
        if let Some(url) = get("DATABASE_URL") {
            if !url.is_empty() {
                self.database.url = Some(url);
            }
        }
        if let Some(addr) = get("BI_BIND_ADDR") {
            self.server.bind_addr = addr;
        }
        if let Some(env) = get("BI_ENVIRONMENT") {
            self.server.environment = env;
        }
        if let Some(level) = get("BI_LOG_LEVEL") {
            self.server.log_level = level;
        }
        if let Some(dir) = get("BI_METADATA_DIR") {
            self.metadata.dir = PathBuf::from(dir);
        }
        if let Some(pct) = get("BI_ROLLOUT_PERCENTAGE").and_then(|v| v.parse::<u8>().ok()) {
            self.migration.rollout_percentage = pct;
        }
        if let Some(flag) = get("BI_ENHANCED_ENABLED").and_then(|v| v.parse::<bool>().ok()) {
            self.migration.enhanced_enabled = flag;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.migration.rollout_percentage > 100 {
            return Err(BiError::Config(format!(
                "migration.rollout_percentage must be <= 100, got {}",
                self.migration.rollout_percentage
            )));
        }
        if !(0.0..=100.0).contains(&self.migration.comparison_sample_percentage) {
            return Err(BiError::Config(
                "migration.comparison_sample_percentage must be within 0..=100".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.cache.similarity_threshold) {
            return Err(BiError::Config(
                "cache.similarity_threshold must be within 0..=1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.resilience.failure_rate_threshold) {
            return Err(BiError::Config(
                "resilience.failure_rate_threshold must be within 0..=1".to_string(),
            ));
        }
        if self.retrieval.max_tables == 0 || self.retrieval.max_tokens == 0 {
            return Err(BiError::Config(
                "retrieval budgets must be greater than zero".to_string(),
            ));
        }
        if self.prompt.max_tokens == 0 {
            return Err(BiError::Config("prompt.max_tokens must be greater than zero".to_string()));
        }
        if self.cache.embedding_dimension == 0 {
            return Err(BiError::Config(
                "cache.embedding_dimension must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.retrieval.max_tables, 5);
        assert_eq!(config.retrieval.max_tokens, 4000);
        assert_eq!(config.resilience.max_retries, 3);
        assert_eq!(config.processing.timeout_secs, 300);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = AppConfig::from_toml_str(
            r#"
            [cache]
            similarity_threshold = 0.9
            backend = "sqlite"

            [migration]
            rollout_percentage = 25
            allow_list = ["alice"]
            "#,
        )
        .unwrap();
        assert_eq!(config.cache.similarity_threshold, 0.9);
        assert_eq!(config.cache.backend, CacheBackend::Sqlite);
        assert_eq!(config.cache.max_results, 5);
        assert_eq!(config.migration.rollout_percentage, 25);
        assert!(config.migration.allow_list.contains("alice"));
        assert!(config.migration.enhanced_enabled);
    }

    #[test]
    fn test_invalid_rollout_rejected() {
        let mut config = AppConfig::default();
        config.migration.rollout_percentage = 150;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("OPENAI_API_KEY", "sk-test"),
            ("DATABASE_URL", "postgres://localhost/bi"),
            ("BI_ROLLOUT_PERCENTAGE", "40"),
            ("BI_ENHANCED_ENABLED", "false"),
        ]
        .into_iter()
        .collect();
        let mut config = AppConfig::default();
        config.apply_env_from(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(config.llm.api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.database.url.as_deref(), Some("postgres://localhost/bi"));
        assert_eq!(config.migration.rollout_percentage, 40);
        assert!(!config.migration.enhanced_enabled);
    }

    #[test]
    fn test_example_config_parses() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config.example.toml");
        let config = AppConfig::from_file(&path).unwrap();
        assert_eq!(config.cache.backend, CacheBackend::Sqlite);
        assert!(config.validate().is_ok());
    }
}
