//! Storage backend seam and the SQLite implementation.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tracing::info;

use crate::error::StoreError;

/// File name of the collection database inside a run's work directory.
pub const DATABASE_FILE: &str = "collections.db";

/// What the write queue and schema manager need from a database.
#[async_trait]
pub trait StoreBackend: Send + Sync {
    /// Run one statement, returning the number of affected rows.
    async fn execute(&self, statement: &str) -> Result<u64, StoreError>;

    /// Column names of `table`, empty when the table does not exist.
    async fn table_columns(&self, table: &str) -> Result<Vec<String>, StoreError>;

    async fn close(&self) {}
}

#[async_trait]
impl<T: StoreBackend + ?Sized> StoreBackend for Arc<T> {
    async fn execute(&self, statement: &str) -> Result<u64, StoreError> {
        (**self).execute(statement).await
    }

    async fn table_columns(&self, table: &str) -> Result<Vec<String>, StoreError> {
        (**self).table_columns(table).await
    }

    async fn close(&self) {
        (**self).close().await
    }
}

/// SQLite database behind a single-connection pool.
///
/// One connection keeps every write serialized on the same handle, which is
/// also what lets an in-memory database survive between queries.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    path: Option<PathBuf>,
}

impl SqliteStore {
    /// Open (creating if needed) `collections.db` inside `dir`.
    pub async fn open(dir: &Path) -> Result<Self, StoreError> {
        let path = dir.join(DATABASE_FILE);
        let options = SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        info!(path = %path.display(), "opened collection database");
        Ok(Self {
            pool,
            path: Some(path),
        })
    }

    pub async fn in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        Ok(Self { pool, path: None })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

#[async_trait]
impl StoreBackend for SqliteStore {
    async fn execute(&self, statement: &str) -> Result<u64, StoreError> {
        let result = sqlx::query(statement).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn table_columns(&self, table: &str) -> Result<Vec<String>, StoreError> {
        let columns = sqlx::query_scalar::<_, String>("SELECT name FROM pragma_table_info(?1)")
            .bind(table)
            .fetch_all(&self.pool)
            .await?;
        Ok(columns)
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
