pub mod provider;
pub mod sql_generator;
pub mod usage;

pub use provider::{LlmCompletion, LlmProvider, OpenAiProvider};
pub use sql_generator::{extract_sql, GeneratedSql, SqlGenerator};
pub use usage::{LlmUsageTracker, ModelUsage, UsageReport};
