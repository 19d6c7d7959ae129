//! Query history repository for storing processed questions

use crate::error::Result;
use crate::pipeline::types::QueryResponse;
use sqlx::PgPool;
use uuid::Uuid;

pub struct QueryHistoryRepository {
    pool: PgPool,
}

impl QueryHistoryRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn record(&self, user_id: &str, question: &str, response: &QueryResponse) -> Result<Uuid> {
        let id = Uuid::new_v4();
        let error_message = response.error.as_ref().map(|e| e.message.clone());

        sqlx::query(
            r#"
            INSERT INTO bi_query_history
                (id, user_id, question, generated_sql, success, confidence,
                 processor, from_cache, elapsed_ms, error_message, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, NOW())
            "#,
        )
        .bind(id)
        .bind(user_id)
        .bind(question)
        .bind(response.sql.as_deref())
        .bind(response.success)
        .bind(response.confidence)
        .bind(response.processor.to_string())
        .bind(response.from_cache)
        .bind(response.elapsed_ms as i64)
        .bind(error_message)
        .execute(&self.pool)
        .await?;

        Ok(id)
    }
}
