pub mod semantic_cache;
pub mod sqlite_store;
pub mod store;

pub use semantic_cache::{normalize_query, query_hash, CacheHit, CacheStats, OptimizeReport, SemanticCache};
pub use sqlite_store::SqliteCacheStore;
pub use store::{CacheStore, InMemoryCacheStore, SemanticCacheEntry};
