//! PostgreSQL connectivity: pool, metadata repository and query history.

pub mod connection;
pub mod metadata_repo;
pub mod query_history;

pub use connection::{init_pool, DbPool};
pub use metadata_repo::MetadataRepository;
pub use query_history::QueryHistoryRepository;
