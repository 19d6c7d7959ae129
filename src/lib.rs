//! Business-context-aware natural-language-to-SQL query engine.
//!
//! A question flows through [`context`] (intent, domain, entities),
//! [`schema_rag`] (relevant tables, columns and join paths), [`prompt`]
//! (token-budgeted prompt), [`llm`] (SQL generation) and [`execution`]
//! (guarded, retried, circuit-broken execution). [`cache`] short-circuits
//! semantically equivalent questions and [`migration`] routes traffic between
//! the legacy and enhanced processors in [`pipeline`].

pub mod api;
pub mod cache;
pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod execution;
pub mod fuzzy_matcher;
pub mod jobs;
pub mod llm;
pub mod logging;
pub mod metadata;
pub mod migration;
pub mod pipeline;
pub mod prompt;
pub mod resilience;
pub mod schema_rag;

pub use config::AppConfig;
pub use error::{BiError, ErrorKind, Result};
pub use metadata::Metadata;
