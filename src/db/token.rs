//! SQLite-backed refresh store.
//!
//! Only refresh tokens are stored. Access tokens are stateless and short-lived.

use async_trait::async_trait;
use sqlx::sqlite::SqlitePool;

use super::{RefreshEntry, RefreshStore, StoreError};

/// Store for refresh tokens in the `refresh_tokens` table.
#[derive(Clone)]
pub struct SqliteRefreshStore {
    pool: SqlitePool,
}

impl SqliteRefreshStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RefreshStore for SqliteRefreshStore {
    async fn insert(&self, token: &str, entry: RefreshEntry) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO refresh_tokens (token, subject_id, issued_at, expires_at) VALUES (?, ?, ?, ?)",
        )
        .bind(token)
        .bind(&entry.subject_id)
        .bind(entry.issued_at as i64)
        .bind(entry.expires_at as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, token: &str) -> Result<Option<RefreshEntry>, StoreError> {
        let row: Option<(String, i64, i64)> = sqlx::query_as(
            "SELECT subject_id, issued_at, expires_at FROM refresh_tokens WHERE token = ?",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(subject_id, issued_at, expires_at)| RefreshEntry {
            subject_id,
            issued_at: issued_at as u64,
            expires_at: expires_at as u64,
        }))
    }

    async fn remove(&self, token: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE token = ?")
            .bind(token)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn sweep_expired(&self, now: u64) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE expires_at < ?")
            .bind(now as i64)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn len(&self) -> Result<u64, StoreError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM refresh_tokens")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }
}
