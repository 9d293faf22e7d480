use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

use super::KvStore;

/// SQLite-backed key-value store with per-entry expiry
#[derive(Clone)]
pub struct SqliteKv {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteKv {
    /// Open or create the database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;

        // journal_mode PRAGMA always returns the resulting mode, so use query_row
        let _: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;

        // Migrate on the raw connection before it goes behind the async Mutex
        Self::run_migrations(&conn)?;

        info!("Dedup store initialized at: {}", path.display());
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory database (for testing)
    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::run_migrations(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn run_migrations(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                expires_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_kv_expires_at ON kv(expires_at);
            ",
        )
        .context("Failed to run dedup store migrations")?;
        Ok(())
    }

    /// Delete every expired entry, returning how many were removed
    pub async fn purge_expired(&self) -> Result<usize> {
        let now = Utc::now().timestamp();
        let conn = self.conn.lock().await;
        let removed = conn
            .execute(
                "DELETE FROM kv WHERE expires_at <= ?1",
                rusqlite::params![now],
            )
            .context("Failed to purge expired entries")?;
        Ok(removed)
    }
}

#[async_trait]
impl KvStore for SqliteKv {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = Utc::now().timestamp();
        let conn = self.conn.lock().await;
        conn.query_row(
            "SELECT value FROM kv WHERE key = ?1 AND expires_at > ?2",
            rusqlite::params![key, now],
            |row| row.get(0),
        )
        .optional()
        .with_context(|| format!("Failed to read key {}", key))
    }

    async fn set(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()> {
        let ttl = i64::try_from(ttl_secs).unwrap_or(i64::MAX);
        let expires_at = Utc::now().timestamp().saturating_add(ttl);
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO kv (key, value, expires_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                expires_at = excluded.expires_at",
            rusqlite::params![key, value, expires_at],
        )
        .with_context(|| format!("Failed to write key {}", key))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_and_get() {
        let kv = SqliteKv::open_in_memory().unwrap();
        kv.set("message_processed_1", "done", 60).await.unwrap();
        assert_eq!(
            kv.get("message_processed_1").await.unwrap().as_deref(),
            Some("done")
        );
    }

    #[tokio::test]
    async fn test_missing_key() {
        let kv = SqliteKv::open_in_memory().unwrap();
        assert!(kv.get("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_last_write_wins() {
        let kv = SqliteKv::open_in_memory().unwrap();
        kv.set("k", "first", 60).await.unwrap();
        kv.set("k", "second", 60).await.unwrap();
        assert_eq!(kv.get("k").await.unwrap().as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn test_expired_entries_are_invisible_and_purged() {
        let kv = SqliteKv::open_in_memory().unwrap();
        kv.set("stale", "x", 0).await.unwrap();
        kv.set("fresh", "y", 3600).await.unwrap();

        assert!(kv.get("stale").await.unwrap().is_none());
        assert_eq!(kv.purge_expired().await.unwrap(), 1);
        assert_eq!(kv.get("fresh").await.unwrap().as_deref(), Some("y"));
    }
}
