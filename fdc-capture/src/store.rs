//! Device-local key-value store
//!
//! The offline queue, the autosave snapshot and the duplicate log each live
//! under their own namespaced key, like entries of a browser's local storage.
//! Values are JSON strings; the owning component encodes and decodes them.
//!
//! Two backends:
//! - [`SqliteStore`]: durable, one row per key in `local_store`
//! - [`MemoryStore`]: in-process, for tests and dry runs
//!
//! Both enforce an optional byte quota over the sum of all values, reported
//! as [`StoreError::Capacity`].
//!
//! Read-modify-write goes through [`LocalStore::update`], which is atomic
//! against every other writer of the same store, including other processes
//! sharing the device database.

use crate::error::StoreError;
use async_trait::async_trait;
use sqlx::{SqliteConnection, SqlitePool};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::debug;

/// Key prefix for everything this engine stores
pub const KEY_PREFIX: &str = "fdc:";

/// Offline queue (JSON array of pending submissions)
pub const OFFLINE_QUEUE_KEY: &str = "fdc:offline_queue";

/// Autosave snapshot (JSON object with `saved_at`)
pub const AUTOSAVE_KEY: &str = "fdc:autosave";

/// Duplicate log key for one operator (JSON array of timestamps)
pub fn duplicate_log_key(operator_id: &str) -> String {
    format!("{}duplicate_log:{}", KEY_PREFIX, operator_id)
}

/// Async key-value storage
#[async_trait]
pub trait LocalStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    async fn remove(&self, key: &str) -> Result<(), StoreError>;

    /// Replace the value under `key` with `apply(current)` atomically
    ///
    /// `apply` returns the new value, or `None` to delete the key. An error
    /// from `apply` leaves the stored value untouched.
    async fn update(
        &self,
        key: &str,
        apply: &mut (dyn FnMut(Option<String>) -> Result<Option<String>, StoreError> + Send),
    ) -> Result<(), StoreError>;
}

fn check_quota(quota: Option<u64>, others: u64, incoming: u64) -> Result<(), StoreError> {
    match quota {
        Some(limit) if others + incoming > limit => Err(StoreError::Capacity(format!(
            "{} bytes requested, {} of {} bytes in use",
            incoming, others, limit
        ))),
        _ => Ok(()),
    }
}

// ========================================
// SQLite backend
// ========================================

/// Durable store backed by the device database
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    quota_bytes: Option<u64>,
}

impl SqliteStore {
    /// Create the `local_store` table if needed and wrap the pool
    pub async fn new(pool: SqlitePool, quota_bytes: Option<u64>) -> Result<Self, StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS local_store (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool, quota_bytes })
    }

}

/// Bytes used by all values except `key`
async fn bytes_used_excluding(conn: &mut SqliteConnection, key: &str) -> Result<u64, StoreError> {
    let used: i64 = sqlx::query_scalar(
        "SELECT COALESCE(SUM(LENGTH(CAST(value AS BLOB))), 0) FROM local_store WHERE key != ?",
    )
    .bind(key)
    .fetch_one(&mut *conn)
    .await?;
    Ok(used.max(0) as u64)
}

#[async_trait]
impl LocalStore for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let value: Option<String> = sqlx::query_scalar("SELECT value FROM local_store WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.update(key, &mut |_| Ok(Some(value.to_string()))).await
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM local_store WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update(
        &self,
        key: &str,
        apply: &mut (dyn FnMut(Option<String>) -> Result<Option<String>, StoreError> + Send),
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        // A write as the first statement takes the database write lock
        // (waiting out the busy timeout) before anything is read, the same
        // as BEGIN IMMEDIATE. Concurrent updaters serialize here.
        sqlx::query("UPDATE local_store SET updated_at = updated_at WHERE key = ?")
            .bind(key)
            .execute(&mut *tx)
            .await?;

        let current: Option<String> =
            sqlx::query_scalar("SELECT value FROM local_store WHERE key = ?")
                .bind(key)
                .fetch_optional(&mut *tx)
                .await?;

        // Dropping `tx` on any early return rolls back
        match apply(current)? {
            Some(value) => {
                if self.quota_bytes.is_some() {
                    let others = bytes_used_excluding(&mut tx, key).await?;
                    check_quota(self.quota_bytes, others, value.len() as u64)?;
                }
                sqlx::query(
                    r#"
                    INSERT INTO local_store (key, value, updated_at)
                    VALUES (?, ?, CURRENT_TIMESTAMP)
                    ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
                    "#,
                )
                .bind(key)
                .bind(&value)
                .execute(&mut *tx)
                .await?;
                debug!(key, bytes = value.len(), "Stored local value");
            }
            None => {
                sqlx::query("DELETE FROM local_store WHERE key = ?")
                    .bind(key)
                    .execute(&mut *tx)
                    .await?;
                debug!(key, "Removed local value");
            }
        }

        tx.commit().await?;
        Ok(())
    }
}

// ========================================
// In-memory backend
// ========================================

/// Volatile store
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
    quota_bytes: Option<u64>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store limited to `quota_bytes` across all values
    pub fn with_quota(quota_bytes: u64) -> Self {
        Self {
            values: Mutex::new(HashMap::new()),
            quota_bytes: Some(quota_bytes),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>, StoreError> {
        self.values
            .lock()
            .map_err(|_| StoreError::Backend("memory store lock poisoned".to_string()))
    }
}

#[async_trait]
impl LocalStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.lock()?.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.update(key, &mut |_| Ok(Some(value.to_string()))).await
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.lock()?.remove(key);
        Ok(())
    }

    async fn update(
        &self,
        key: &str,
        apply: &mut (dyn FnMut(Option<String>) -> Result<Option<String>, StoreError> + Send),
    ) -> Result<(), StoreError> {
        let mut values = self.lock()?;
        match apply(values.get(key).cloned())? {
            Some(value) => {
                let others: u64 = values
                    .iter()
                    .filter(|(k, _)| k.as_str() != key)
                    .map(|(_, v)| v.len() as u64)
                    .sum();
                check_quota(self.quota_bytes, others, value.len() as u64)?;
                values.insert(key.to_string(), value);
            }
            None => {
                values.remove(key);
            }
        }
        Ok(())
    }
}
