//! Metadata repository for PostgreSQL.
//!
//! Each metadata kind lives in its own table with a `definition JSONB`
//! column holding the same shape as the JSON files read by
//! [`Metadata::load`].

use crate::error::{BiError, Result};
use crate::metadata::Metadata;
use serde::de::DeserializeOwned;
use sqlx::PgPool;
use tracing::info;

pub struct MetadataRepository {
    pool: PgPool,
}

impl MetadataRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Load all metadata from PostgreSQL
    pub async fn load_all(&self) -> Result<Metadata> {
        let tables = self.load_definitions("bi_tables").await?;
        let relationships = self.load_definitions("bi_relationships").await?;
        let glossary = self.load_definitions("bi_glossary").await?;
        let business_rules = self.load_definitions("bi_business_rules").await?;
        let examples = self.load_definitions("bi_query_examples").await?;
        let domains = self.load_definitions("bi_domains").await?;

        let metadata = Metadata::new(tables, relationships, glossary, business_rules, examples, domains);
        metadata.validate()?;
        info!(
            tables = metadata.tables.len(),
            relationships = metadata.relationships.len(),
            glossary = metadata.glossary.len(),
            "Loaded metadata from database"
        );
        Ok(metadata)
    }

    async fn load_definitions<T: DeserializeOwned>(&self, table: &str) -> Result<Vec<T>> {
        let rows: Vec<serde_json::Value> =
            sqlx::query_scalar(&format!("SELECT definition FROM {} ORDER BY id", table))
                .fetch_all(&self.pool)
                .await
                .map_err(|e| BiError::Metadata(format!("Failed to load {}: {}", table, e)))?;

        rows.into_iter()
            .map(|row| {
                serde_json::from_value(row)
                    .map_err(|e| BiError::Metadata(format!("Invalid row in {}: {}", table, e)))
            })
            .collect()
    }

    /// Bump the usage counter of every relationship used by a successful query.
    pub async fn record_join_usage(&self, from_table: &str, to_table: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE bi_relationships
            SET definition = jsonb_set(definition, '{usage_count}',
                to_jsonb(COALESCE((definition->>'usage_count')::bigint, 0) + 1))
            WHERE (definition->>'from_table' = $1 AND definition->>'to_table' = $2)
               OR (definition->>'from_table' = $2 AND definition->>'to_table' = $1)
            "#,
        )
        .bind(from_table)
        .bind(to_table)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
