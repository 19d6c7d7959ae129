//! Cache storage backends.

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// One cached answer. Written once; only access bookkeeping changes later.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SemanticCacheEntry {
    pub query_hash: String,
    pub normalized_query: String,
    pub original_question: String,
    pub sql: String,
    pub response: serde_json::Value,
    #[serde(skip_serializing)]
    pub embedding: Vec<f32>,
    pub access_count: u64,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl SemanticCacheEntry {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, query_hash: &str) -> Result<Option<SemanticCacheEntry>>;

    /// Insert, replacing any entry with the same hash.
    async fn upsert(&self, entry: SemanticCacheEntry) -> Result<()>;

    /// All entries that have not expired at `now`.
    async fn live_entries(&self, now: DateTime<Utc>) -> Result<Vec<SemanticCacheEntry>>;

    /// Record a hit.
    async fn touch(&self, query_hash: &str, at: DateTime<Utc>) -> Result<()>;

    async fn remove_expired(&self, now: DateTime<Utc>) -> Result<usize>;

    /// Evict least recently used entries until at most `max_entries` remain.
    async fn evict_lru(&self, max_entries: usize) -> Result<usize>;

    async fn len(&self) -> Result<usize>;

    async fn clear(&self) -> Result<()>;

    fn backend(&self) -> &'static str;
}

#[derive(Default)]
pub struct InMemoryCacheStore {
    entries: DashMap<String, SemanticCacheEntry>,
}

impl InMemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStore for InMemoryCacheStore {
    async fn get(&self, query_hash: &str) -> Result<Option<SemanticCacheEntry>> {
        Ok(self.entries.get(query_hash).map(|e| e.value().clone()))
    }

    async fn upsert(&self, entry: SemanticCacheEntry) -> Result<()> {
        self.entries.insert(entry.query_hash.clone(), entry);
        Ok(())
    }

    async fn live_entries(&self, now: DateTime<Utc>) -> Result<Vec<SemanticCacheEntry>> {
        Ok(self
            .entries
            .iter()
            .filter(|e| !e.value().is_expired(now))
            .map(|e| e.value().clone())
            .collect())
    }

    async fn touch(&self, query_hash: &str, at: DateTime<Utc>) -> Result<()> {
        if let Some(mut entry) = self.entries.get_mut(query_hash) {
            entry.access_count += 1;
            entry.last_accessed_at = at;
        }
        Ok(())
    }

    async fn remove_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let before = self.entries.len();
        self.entries.retain(|_, e| !e.is_expired(now));
        Ok(before.saturating_sub(self.entries.len()))
    }

    async fn evict_lru(&self, max_entries: usize) -> Result<usize> {
        let len = self.entries.len();
        if len <= max_entries {
            return Ok(0);
        }
        let mut by_access: Vec<(DateTime<Utc>, String)> = self
            .entries
            .iter()
            .map(|e| (e.value().last_accessed_at, e.key().clone()))
            .collect();
        by_access.sort();

        let excess = len - max_entries;
        for (_, key) in by_access.into_iter().take(excess) {
            self.entries.remove(&key);
        }
        Ok(excess)
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.entries.len())
    }

    async fn clear(&self) -> Result<()> {
        self.entries.clear();
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
