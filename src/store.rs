use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::CacheError;

/// Byte-oriented key-value store with optional absolute expiry.
///
/// Reads at or past `expires_at` behave as if the key was never written.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;
    async fn set(&self, key: &str, value: &[u8], expires_at: Option<DateTime<Utc>>) -> Result<(), CacheError>;
    async fn delete(&self, key: &str) -> Result<(), CacheError>;
    /// Drop expired entries. Returns the number removed.
    async fn purge_expired(&self) -> Result<u64, CacheError>;
    async fn close(&self) {}
}

pub struct SqliteKvStore {
    pool: SqlitePool,
}

impl SqliteKvStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl KvStore for SqliteKvStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let row: Option<(Vec<u8>,)> = sqlx::query_as(
            "SELECT value FROM kv_entries WHERE key = ? AND (expires_at IS NULL OR expires_at > ?)",
        )
        .bind(key)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(value,)| value))
    }

    async fn set(&self, key: &str, value: &[u8], expires_at: Option<DateTime<Utc>>) -> Result<(), CacheError> {
        sqlx::query(
            "INSERT INTO kv_entries (key, value, expires_at) VALUES (?, ?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at,
             updated_at = strftime('%Y-%m-%dT%H:%M:%SZ', 'now')",
        )
        .bind(key)
        .bind(value)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;
        debug!(key = %key, expires_at = ?expires_at, "kv entry written");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        sqlx::query("DELETE FROM kv_entries WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn purge_expired(&self) -> Result<u64, CacheError> {
        let result = sqlx::query("DELETE FROM kv_entries WHERE expires_at IS NOT NULL AND expires_at <= ?")
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

type MemoryEntry = (Vec<u8>, Option<DateTime<Utc>>);

#[derive(Default)]
pub struct MemoryKvStore {
    entries: RwLock<HashMap<String, MemoryEntry>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn is_live(expires_at: &Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    expires_at.is_none_or(|at| at > now)
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(key)
            .filter(|(_, expires_at)| is_live(expires_at, Utc::now()))
            .map(|(value, _)| value.clone()))
    }

    async fn set(&self, key: &str, value: &[u8], expires_at: Option<DateTime<Utc>>) -> Result<(), CacheError> {
        self.entries
            .write()
            .await
            .insert(key.to_string(), (value.to_vec(), expires_at));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn purge_expired(&self) -> Result<u64, CacheError> {
        let now = Utc::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, (_, expires_at)| is_live(expires_at, now));
        Ok((before - entries.len()) as u64)
    }
}

/// Read a persistent string setting (no expiry).
pub async fn get_setting(store: &dyn KvStore, name: &str) -> Result<Option<String>, CacheError> {
    let value = store.get(&format!("setting:{name}")).await?;
    Ok(value.and_then(|bytes| String::from_utf8(bytes).ok()))
}

pub async fn set_setting(store: &dyn KvStore, name: &str, value: &str) -> Result<(), CacheError> {
    store.set(&format!("setting:{name}"), value.as_bytes(), None).await
}
