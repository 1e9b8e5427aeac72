use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Executor, SqlitePool};
use tracing::{debug, info};

use crate::config::Config;

/// Schema steps in apply order. Names are recorded once applied.
const MIGRATIONS: &[(&str, &str)] = &[(
    "20261014_000001_kv_store",
    include_str!("../migrations/20261014_000001_kv_store.sql"),
)];

/// Open the cache database configured under `[store]`.
pub async fn create_pool(config: &Config) -> Result<SqlitePool> {
    let pool = open(&config.db_path()).await?;
    run_migrations(&pool).await?;
    Ok(pool)
}

/// Connect to the SQLite file at `path`, creating it and its directory if needed.
pub async fn open(path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).with_context(|| format!("creating data directory: {}", parent.display()))?;
    }

    // Cache writes tolerate losing the last transaction on power loss.
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(4)
        .connect_with(options)
        .await
        .with_context(|| format!("opening cache database: {}", path.display()))?;

    info!(path = %path.display(), "cache database opened");
    Ok(pool)
}

/// Apply every migration not yet recorded in `schema_migrations`.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    pool.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            name        TEXT PRIMARY KEY NOT NULL,
            applied_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
        )",
    )
    .await
    .context("creating schema_migrations")?;

    let mut applied = 0;
    for &(name, sql) in MIGRATIONS {
        let done: Option<(String,)> = sqlx::query_as("SELECT name FROM schema_migrations WHERE name = ?")
            .bind(name)
            .fetch_optional(pool)
            .await
            .with_context(|| format!("checking migration {name}"))?;
        if done.is_some() {
            debug!(migration = name, "migration already applied");
            continue;
        }

        let mut tx = pool.begin().await.context("starting migration transaction")?;
        (&mut *tx)
            .execute(sql)
            .await
            .with_context(|| format!("applying migration {name}"))?;
        sqlx::query("INSERT INTO schema_migrations (name) VALUES (?)")
            .bind(name)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("recording migration {name}"))?;
        tx.commit().await.with_context(|| format!("committing migration {name}"))?;
        applied += 1;
    }

    info!(applied, total = MIGRATIONS.len(), "database schema up to date");
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::store::{KvStore, SqliteKvStore};

    #[tokio::test]
    async fn reopening_keeps_entries_and_skips_applied_migrations() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("cache.db");

        let pool = open(&path).await.unwrap();
        run_migrations(&pool).await.unwrap();
        let store = SqliteKvStore::new(pool.clone());
        store
            .set("permit:alice", b"[]", Some(Utc::now() + chrono::Duration::minutes(5)))
            .await
            .unwrap();
        pool.close().await;

        let pool = open(&path).await.unwrap();
        run_migrations(&pool).await.unwrap();
        run_migrations(&pool).await.unwrap();

        let (recorded,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM schema_migrations")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(recorded, MIGRATIONS.len() as i64);

        let store = SqliteKvStore::new(pool);
        assert_eq!(store.get("permit:alice").await.unwrap().as_deref(), Some(&b"[]"[..]));
    }
}
