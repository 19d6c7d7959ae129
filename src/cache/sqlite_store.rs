//! SQLite-backed cache store for caches that survive restarts.

use super::store::{CacheStore, SemanticCacheEntry};
use crate::error::{BiError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::info;

pub struct SqliteCacheStore {
    db: Mutex<Connection>,
}

impl SqliteCacheStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let db = Connection::open(path)
            .map_err(|e| BiError::Cache(format!("Failed to open cache database: {}", e)))?;
        let store = Self { db: Mutex::new(db) };
        store.init_schema()?;
        info!(path = %path.display(), "Opened SQLite semantic cache");
        Ok(store)
    }

    pub fn in_memory() -> Result<Self> {
        let db = Connection::open_in_memory()
            .map_err(|e| BiError::Cache(format!("Failed to open cache database: {}", e)))?;
        let store = Self { db: Mutex::new(db) };
        store.init_schema()?;
        Ok(store)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.db.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn init_schema(&self) -> Result<()> {
        let db = self.conn();
        db.execute(
            r#"
            CREATE TABLE IF NOT EXISTS semantic_cache (
                query_hash TEXT PRIMARY KEY,
                normalized_query TEXT NOT NULL,
                original_question TEXT NOT NULL,
                sql TEXT NOT NULL,
                response TEXT NOT NULL,
                embedding TEXT NOT NULL,
                access_count INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                last_accessed_at TEXT NOT NULL,
                expires_at TEXT NOT NULL
            )
            "#,
            [],
        )?;
        db.execute(
            "CREATE INDEX IF NOT EXISTS idx_semantic_cache_expires ON semantic_cache(expires_at)",
            [],
        )?;
        db.execute(
            "CREATE INDEX IF NOT EXISTS idx_semantic_cache_accessed ON semantic_cache(last_accessed_at)",
            [],
        )?;
        Ok(())
    }

    fn row_to_entry(row: &Row<'_>) -> rusqlite::Result<(SemanticCacheEntry, String, String)> {
        Ok((
            SemanticCacheEntry {
                query_hash: row.get(0)?,
                normalized_query: row.get(1)?,
                original_question: row.get(2)?,
                sql: row.get(3)?,
                response: serde_json::Value::Null,
                embedding: Vec::new(),
                access_count: row.get::<_, i64>(6)? as u64,
                created_at: row.get(7)?,
                last_accessed_at: row.get(8)?,
                expires_at: row.get(9)?,
            },
            row.get(4)?,
            row.get(5)?,
        ))
    }

    fn decode(raw: (SemanticCacheEntry, String, String)) -> Result<SemanticCacheEntry> {
        let (mut entry, response, embedding) = raw;
        entry.response = serde_json::from_str(&response)?;
        entry.embedding = serde_json::from_str(&embedding)?;
        Ok(entry)
    }
}

const SELECT_COLUMNS: &str = "SELECT query_hash, normalized_query, original_question, sql, response, \
     embedding, access_count, created_at, last_accessed_at, expires_at FROM semantic_cache";

#[async_trait]
impl CacheStore for SqliteCacheStore {
    async fn get(&self, query_hash: &str) -> Result<Option<SemanticCacheEntry>> {
        let raw = {
            let db = self.conn();
            db.query_row(
                &format!("{} WHERE query_hash = ?1", SELECT_COLUMNS),
                params![query_hash],
                Self::row_to_entry,
            )
            .optional()?
        };
        raw.map(Self::decode).transpose()
    }

    async fn upsert(&self, entry: SemanticCacheEntry) -> Result<()> {
        let response = serde_json::to_string(&entry.response)?;
        let embedding = serde_json::to_string(&entry.embedding)?;
        let db = self.conn();
        db.execute(
            r#"
            INSERT OR REPLACE INTO semantic_cache
            (query_hash, normalized_query, original_question, sql, response, embedding,
             access_count, created_at, last_accessed_at, expires_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
            params![
                entry.query_hash,
                entry.normalized_query,
                entry.original_question,
                entry.sql,
                response,
                embedding,
                entry.access_count as i64,
                entry.created_at,
                entry.last_accessed_at,
                entry.expires_at,
            ],
        )?;
        Ok(())
    }

    async fn live_entries(&self, now: DateTime<Utc>) -> Result<Vec<SemanticCacheEntry>> {
        let raw = {
            let db = self.conn();
            let mut stmt = db.prepare(&format!("{} WHERE expires_at > ?1", SELECT_COLUMNS))?;
            let rows = stmt.query_map(params![now], Self::row_to_entry)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };
        raw.into_iter().map(Self::decode).collect()
    }

    async fn touch(&self, query_hash: &str, at: DateTime<Utc>) -> Result<()> {
        let db = self.conn();
        db.execute(
            "UPDATE semantic_cache SET access_count = access_count + 1, last_accessed_at = ?2 WHERE query_hash = ?1",
            params![query_hash, at],
        )?;
        Ok(())
    }

    async fn remove_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let db = self.conn();
        Ok(db.execute("DELETE FROM semantic_cache WHERE expires_at <= ?1", params![now])?)
    }

    async fn evict_lru(&self, max_entries: usize) -> Result<usize> {
        let db = self.conn();
        let count: i64 = db.query_row("SELECT COUNT(*) FROM semantic_cache", [], |row| row.get(0))?;
        let excess = (count as usize).saturating_sub(max_entries);
        if excess == 0 {
            return Ok(0);
        }
        Ok(db.execute(
            r#"
            DELETE FROM semantic_cache WHERE query_hash IN (
                SELECT query_hash FROM semantic_cache ORDER BY last_accessed_at ASC LIMIT ?1
            )
            "#,
            params![excess as i64],
        )?)
    }

    async fn len(&self) -> Result<usize> {
        let db = self.conn();
        let count: i64 = db.query_row("SELECT COUNT(*) FROM semantic_cache", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    async fn clear(&self) -> Result<()> {
        let db = self.conn();
        db.execute("DELETE FROM semantic_cache", [])?;
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "sqlite"
    }
}
