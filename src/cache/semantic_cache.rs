//! Semantic cache.
//!
//! Entries are keyed by a SHA-256 of the normalized question and matched by
//! cosine similarity of question embeddings. Every store failure is logged
//! and treated as a miss, so answers never depend on the cache being up.

use super::store::{CacheStore, SemanticCacheEntry};
use crate::config::CacheConfig;
use crate::error::Result;
use crate::fuzzy_matcher::FuzzyMatcher;
use crate::schema_rag::{cosine_similarity, Embedder};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Slack for float rounding when comparing against the threshold.
const SIMILARITY_EPSILON: f32 = 1e-6;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheHit {
    pub entry: SemanticCacheEntry,
    pub similarity: f32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizeReport {
    pub expired_removed: usize,
    pub evicted: usize,
    pub remaining: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub enabled: bool,
    pub backend: String,
    pub entries: Option<usize>,
    pub hits: u64,
    pub misses: u64,
    pub stores: u64,
    pub errors: u64,
    pub hit_rate: f64,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    stores: AtomicU64,
    errors: AtomicU64,
}

pub struct SemanticCache {
    store: Arc<dyn CacheStore>,
    embedder: Arc<dyn Embedder>,
    config: CacheConfig,
    counters: Counters,
}

/// Lowercase, strip punctuation, collapse whitespace.
pub fn normalize_query(query: &str) -> String {
    FuzzyMatcher::normalize_term(query)
}

pub fn query_hash(normalized: &str) -> String {
    hex::encode(Sha256::digest(normalized.as_bytes()))
}

fn normalize_sql(sql: &str) -> String {
    sql.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim_end_matches(';')
        .to_lowercase()
}

impl SemanticCache {
    pub fn new(store: Arc<dyn CacheStore>, embedder: Arc<dyn Embedder>, config: CacheConfig) -> Self {
        Self {
            store,
            embedder,
            config,
            counters: Counters::default(),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Lookup with the configured threshold and result limit.
    pub async fn lookup_default(&self, query: &str) -> Option<CacheHit> {
        self.lookup(query, None, self.config.similarity_threshold, self.config.max_results)
            .await
    }

    /// Best entry with similarity >= `threshold` among the top `max_results`.
    /// When `sql_candidate` is given only entries with the same SQL qualify.
    pub async fn lookup(
        &self,
        query: &str,
        sql_candidate: Option<&str>,
        threshold: f32,
        max_results: usize,
    ) -> Option<CacheHit> {
        if !self.config.enabled {
            return None;
        }
        match self.try_lookup(query, sql_candidate, threshold, max_results, Utc::now()).await {
            Ok(Some(hit)) => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                debug!(similarity = hit.similarity, hash = %hit.entry.query_hash, "Semantic cache hit");
                Some(hit)
            }
            Ok(None) => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            Err(e) => {
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "Semantic cache lookup failed, treating as miss");
                None
            }
        }
    }

    async fn try_lookup(
        &self,
        query: &str,
        sql_candidate: Option<&str>,
        threshold: f32,
        max_results: usize,
        now: DateTime<Utc>,
    ) -> Result<Option<CacheHit>> {
        let normalized = normalize_query(query);
        if normalized.is_empty() || max_results == 0 {
            return Ok(None);
        }
        let hash = query_hash(&normalized);
        let wanted_sql = sql_candidate.map(normalize_sql);
        let sql_matches =
            |entry: &SemanticCacheEntry| wanted_sql.as_ref().map_or(true, |s| *s == normalize_sql(&entry.sql));

        // Identical normalized text is an exact hit.
        if let Some(entry) = self.store.get(&hash).await? {
            if !entry.is_expired(now) && sql_matches(&entry) {
                return self.record_hit(entry, 1.0, now).await.map(Some);
            }
        }

        let embedding = self.embedder.embed(&normalized).await?;
        let mut scored: Vec<(f32, SemanticCacheEntry)> = self
            .store
            .live_entries(now)
            .await?
            .into_iter()
            .filter(|e| sql_matches(e))
            .map(|e| (cosine_similarity(&embedding, &e.embedding), e))
            .filter(|(sim, _)| *sim + SIMILARITY_EPSILON >= threshold)
            .collect();

        scored.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.1.last_accessed_at.cmp(&a.1.last_accessed_at))
                .then_with(|| a.1.query_hash.cmp(&b.1.query_hash))
        });
        scored.truncate(max_results);

        match scored.into_iter().next() {
            Some((similarity, entry)) => self.record_hit(entry, similarity.min(1.0), now).await.map(Some),
            None => Ok(None),
        }
    }

    async fn record_hit(
        &self,
        mut entry: SemanticCacheEntry,
        similarity: f32,
        now: DateTime<Utc>,
    ) -> Result<CacheHit> {
        self.store.touch(&entry.query_hash, now).await?;
        entry.access_count += 1;
        entry.last_accessed_at = now;
        Ok(CacheHit { entry, similarity })
    }

    /// Store an answer. A previous entry for the same normalized query is
    /// replaced. Returns whether the write succeeded.
    pub async fn store(
        &self,
        query: &str,
        sql: &str,
        response: &serde_json::Value,
        ttl: Option<std::time::Duration>,
    ) -> bool {
        if !self.config.enabled {
            return false;
        }
        match self.try_store(query, sql, response, ttl, Utc::now()).await {
            Ok(()) => {
                self.counters.stores.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(e) => {
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "Semantic cache store failed");
                false
            }
        }
    }

    async fn try_store(
        &self,
        query: &str,
        sql: &str,
        response: &serde_json::Value,
        ttl: Option<std::time::Duration>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let normalized = normalize_query(query);
        if normalized.is_empty() {
            return Ok(());
        }
        let ttl = ttl.unwrap_or(std::time::Duration::from_secs(self.config.ttl_secs));
        let ttl = Duration::from_std(ttl).unwrap_or_else(|_| Duration::seconds(self.config.ttl_secs as i64));
        let embedding = self.embedder.embed(&normalized).await?;

        let entry = SemanticCacheEntry {
            query_hash: query_hash(&normalized),
            normalized_query: normalized,
            original_question: query.to_string(),
            sql: sql.to_string(),
            response: response.clone(),
            embedding,
            access_count: 0,
            created_at: now,
            last_accessed_at: now,
            expires_at: now + ttl,
        };
        self.store.upsert(entry).await
    }

    /// Drop expired entries, then evict least recently used down to the size budget.
    pub async fn optimize(&self) -> Result<OptimizeReport> {
        self.optimize_at(Utc::now()).await
    }

    pub async fn optimize_at(&self, now: DateTime<Utc>) -> Result<OptimizeReport> {
        let expired_removed = self.store.remove_expired(now).await?;
        let evicted = self.store.evict_lru(self.config.max_entries).await?;
        let remaining = self.store.len().await?;
        if expired_removed + evicted > 0 {
            info!(expired_removed, evicted, remaining, "Semantic cache optimized");
        }
        Ok(OptimizeReport {
            expired_removed,
            evicted,
            remaining,
        })
    }

    pub async fn clear(&self) -> Result<()> {
        self.store.clear().await
    }

    pub async fn stats(&self) -> CacheStats {
        let hits = self.counters.hits.load(Ordering::Relaxed);
        let misses = self.counters.misses.load(Ordering::Relaxed);
        let entries = match self.store.len().await {
            Ok(n) => Some(n),
            Err(e) => {
                warn!(error = %e, "Failed to count cache entries");
                None
            }
        };
        CacheStats {
            enabled: self.config.enabled,
            backend: self.store.backend().to_string(),
            entries,
            hits,
            misses,
            stores: self.counters.stores.load(Ordering::Relaxed),
            errors: self.counters.errors.load(Ordering::Relaxed),
            hit_rate: if hits + misses == 0 {
                0.0
            } else {
                hits as f64 / (hits + misses) as f64
            },
        }
    }

    /// Cheap store round-trip for health checks.
    pub async fn ping(&self) -> Result<usize> {
        self.store.len().await
    }
}
