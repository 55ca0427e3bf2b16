//! Refresh token validity store.
//!
//! A refresh token value is present if and only if it has been issued and
//! not yet consumed, invalidated, or swept after expiry. Protocol code only
//! sees the [`RefreshStore`] trait; the backing is chosen at startup.

mod memory;
mod token;

use async_trait::async_trait;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

pub use memory::MemoryRefreshStore;
pub use token::SqliteRefreshStore;

/// What the store knows about an issued refresh token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshEntry {
    pub subject_id: String,
    /// Unix seconds
    pub issued_at: u64,
    /// Unix seconds; entries past this are swept by the cleanup task
    pub expires_at: u64,
}

#[derive(Debug)]
pub enum StoreError {
    Database(sqlx::Error),
    /// A lock holder panicked mid-update.
    Poisoned,
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Database(e) => write!(f, "Database error: {}", e),
            StoreError::Poisoned => write!(f, "Store lock poisoned"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Database(e)
    }
}

/// Mapping of refresh token value to its entry.
///
/// `remove` must be atomic with respect to concurrent callers: when several
/// tasks remove the same value, exactly one of them observes `true`.
#[async_trait]
pub trait RefreshStore: Send + Sync {
    async fn insert(&self, token: &str, entry: RefreshEntry) -> Result<(), StoreError>;

    async fn get(&self, token: &str) -> Result<Option<RefreshEntry>, StoreError>;

    /// Remove an entry. Returns whether this call removed it.
    async fn remove(&self, token: &str) -> Result<bool, StoreError>;

    /// Remove every entry that expired before `now`. Returns the count removed.
    async fn sweep_expired(&self, now: u64) -> Result<u64, StoreError>;

    /// Number of live entries.
    async fn len(&self) -> Result<u64, StoreError>;
}

/// SQLite database holding the refresh token table.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open or create a database at the given path.
    /// Use ":memory:" for an in-memory database.
    pub async fn open(path: &str) -> Result<Self, sqlx::Error> {
        let in_memory = path == ":memory:";
        let url = if in_memory {
            "sqlite::memory:".to_string()
        } else {
            format!("sqlite:{}?mode=rwc", path)
        };

        // Each SQLite connection to ":memory:" is its own database.
        let options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };

        let pool = options.connect(&url).await?;

        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    /// Get the current schema version.
    async fn get_version(&self) -> Result<i32, sqlx::Error> {
        let result: Option<(i32,)> = sqlx::query_as("SELECT version FROM schema_version LIMIT 1")
            .fetch_optional(&self.pool)
            .await?;
        Ok(result.map(|r| r.0).unwrap_or(0))
    }

    /// Set the schema version within a transaction.
    async fn set_version(
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        version: i32,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM schema_version")
            .execute(&mut **tx)
            .await?;
        sqlx::query("INSERT INTO schema_version (version) VALUES (?)")
            .bind(version)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    async fn migrate(&self) -> Result<(), sqlx::Error> {
        sqlx::query("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)")
            .execute(&self.pool)
            .await?;

        let version = self.get_version().await?;

        if version < 1 {
            self.migrate_v1().await?;
        }

        Ok(())
    }

    /// Execute a list of queries in a transaction, then set the version.
    async fn run_migration(
        &self,
        version: i32,
        queries: &[&'static str],
    ) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        for query in queries {
            sqlx::query(*query).execute(&mut *tx).await?;
        }
        Self::set_version(&mut tx, version).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn migrate_v1(&self) -> Result<(), sqlx::Error> {
        self.run_migration(
            1,
            &[
                "CREATE TABLE refresh_tokens (
                    token TEXT PRIMARY KEY NOT NULL,
                    subject_id TEXT NOT NULL,
                    issued_at INTEGER NOT NULL,
                    expires_at INTEGER NOT NULL
                )",
                "CREATE INDEX idx_refresh_tokens_expires_at ON refresh_tokens(expires_at)",
                "CREATE INDEX idx_refresh_tokens_subject_id ON refresh_tokens(subject_id)",
            ],
        )
        .await
    }

    /// Get the refresh token store.
    pub fn refresh_tokens(&self) -> SqliteRefreshStore {
        SqliteRefreshStore::new(self.pool.clone())
    }

    /// Get the underlying connection pool (for tests that need raw SQL access).
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
