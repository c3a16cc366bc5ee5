//! Storage gateway for podsync
//!
//! Typed operations over the durable store. Records are JSON values stored
//! under versioned keys (`podsync/v1/...`) in a single SQLite key-value
//! table, so the on-disk format can evolve. Key namespaces:
//!
//! - `feed/<feedID>` - feed record
//! - `episode/<feedID>/<episodeID>` - episode record
//! - `history/<historyID>` - history entry
//! - `history_feed/<feedID>/<historyID>` - index value holding the history ID
//!
//! History IDs are `<unix_seconds>-<uuid>`, so lexicographic key order equals
//! chronological order and a descending range scan yields newest-first.
//!
//! ## Submodules
//!
//! Methods on [`Storage`] are organized by domain:
//! - [`feeds`] - feed record CRUD and scans
//! - [`episodes`] - episode record CRUD and scans
//! - [`history`] - history entries, the feed index, and retention cleanup

use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool};
use sqlx::SqliteConnection;
use std::path::Path;

mod episodes;
mod feeds;
mod history;

/// Storage format version embedded in every key
const CURRENT_VERSION: u32 = 1;

/// Handle to the durable store
pub struct Storage {
    pool: SqlitePool,
}

impl Storage {
    /// Open (or create) the store in `dir` and run migrations
    pub async fn open(dir: &Path) -> Result<Self> {
        tokio::fs::create_dir_all(dir).await.map_err(|e| {
            Error::Io(std::io::Error::new(
                e.kind(),
                format!("failed to create database dir {}: {e}", dir.display()),
            ))
        })?;

        let options = SqliteConnectOptions::new()
            .filename(dir.join("podsync.db"))
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePool::connect_with(options).await?;

        let storage = Self { pool };
        storage.run_migrations().await?;

        Ok(storage)
    }

    /// Close the underlying connection pool
    pub async fn close(&self) {
        tracing::debug!("closing database");
        self.pool.close().await;
    }

    async fn run_migrations(&self) -> Result<()> {
        let mut conn = self.pool.acquire().await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&mut *conn)
        .await?;

        let current: Option<i64> = sqlx::query_scalar("SELECT MAX(version) FROM schema_version")
            .fetch_one(&mut *conn)
            .await?;
        let current = current.unwrap_or(0);

        if current < 1 {
            tracing::info!("applying storage migration v1");
            sqlx::query(
                r#"
                CREATE TABLE IF NOT EXISTS kv (
                    key TEXT PRIMARY KEY,
                    value TEXT NOT NULL
                )
                "#,
            )
            .execute(&mut *conn)
            .await?;

            sqlx::query("INSERT INTO schema_version (version, applied_at) VALUES (1, unixepoch())")
                .execute(&mut *conn)
                .await?;
        }

        Ok(())
    }

    /// Begin a transaction; every multi-step operation runs inside one
    pub(crate) async fn begin(&self) -> Result<sqlx::Transaction<'_, sqlx::Sqlite>> {
        Ok(self.pool.begin().await?)
    }

    // --- key builders -------------------------------------------------------

    fn key(path: impl AsRef<str>) -> String {
        format!("podsync/v{CURRENT_VERSION}/{}", path.as_ref())
    }

    pub(crate) fn feed_key(feed_id: &str) -> String {
        Self::key(format!("feed/{feed_id}"))
    }

    pub(crate) fn feed_prefix() -> String {
        Self::key("feed/")
    }

    pub(crate) fn episode_key(feed_id: &str, episode_id: &str) -> String {
        Self::key(format!("episode/{feed_id}/{episode_id}"))
    }

    pub(crate) fn episode_prefix(feed_id: &str) -> String {
        Self::key(format!("episode/{feed_id}/"))
    }

    pub(crate) fn history_key(history_id: &str) -> String {
        Self::key(format!("history/{history_id}"))
    }

    pub(crate) fn history_prefix() -> String {
        Self::key("history/")
    }

    pub(crate) fn history_feed_key(feed_id: &str, history_id: &str) -> String {
        Self::key(format!("history_feed/{feed_id}/{history_id}"))
    }

    pub(crate) fn history_feed_prefix(feed_id: &str) -> String {
        Self::key(format!("history_feed/{feed_id}/"))
    }

    /// Exclusive upper bound for a prefix range scan.
    ///
    /// U+10FFFF is the highest code point, so `prefix..prefix+U+10FFFF`
    /// covers every key starting with the prefix (keys are ASCII-safe IDs).
    /// This is the SQL equivalent of seeking to `prefix || 0xFF` in an
    /// iterator-based store.
    fn prefix_end(prefix: &str) -> String {
        format!("{prefix}\u{10FFFF}")
    }

    // --- kv primitives ------------------------------------------------------

    pub(crate) async fn kv_put<T: Serialize>(
        conn: &mut SqliteConnection,
        key: &str,
        value: &T,
    ) -> Result<()> {
        let data = serde_json::to_string(value)?;
        sqlx::query(
            "INSERT INTO kv (key, value) VALUES (?, ?) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(key)
        .bind(data)
        .execute(conn)
        .await?;
        Ok(())
    }

    /// Insert-if-absent; refuses to overwrite an existing key
    pub(crate) async fn kv_insert<T: Serialize>(
        conn: &mut SqliteConnection,
        key: &str,
        value: &T,
    ) -> Result<()> {
        let data = serde_json::to_string(value)?;
        let result = sqlx::query("INSERT INTO kv (key, value) VALUES (?, ?) ON CONFLICT DO NOTHING")
            .bind(key)
            .bind(data)
            .execute(conn)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::AlreadyExists(key.to_string()));
        }
        Ok(())
    }

    pub(crate) async fn kv_get<T: DeserializeOwned>(
        conn: &mut SqliteConnection,
        key: &str,
    ) -> Result<T> {
        let row: Option<String> = sqlx::query_scalar("SELECT value FROM kv WHERE key = ?")
            .bind(key)
            .fetch_optional(conn)
            .await?;

        match row {
            Some(data) => Ok(serde_json::from_str(&data)?),
            None => Err(Error::NotFound(key.to_string())),
        }
    }

    pub(crate) async fn kv_delete(conn: &mut SqliteConnection, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM kv WHERE key = ?")
            .bind(key)
            .execute(conn)
            .await?;
        Ok(())
    }

    /// Range scan over every key starting with `prefix`, in key order.
    ///
    /// Returns `(key, value)` pairs; `reverse` scans from the end of the
    /// prefix range so callers see newest-first for chronological IDs.
    pub(crate) async fn kv_scan(
        conn: &mut SqliteConnection,
        prefix: &str,
        reverse: bool,
    ) -> Result<Vec<(String, String)>> {
        let sql = if reverse {
            "SELECT key, value FROM kv WHERE key >= ? AND key < ? ORDER BY key DESC"
        } else {
            "SELECT key, value FROM kv WHERE key >= ? AND key < ? ORDER BY key ASC"
        };

        let rows: Vec<(String, String)> = sqlx::query_as(sql)
            .bind(prefix)
            .bind(Self::prefix_end(prefix))
            .fetch_all(conn)
            .await?;

        Ok(rows)
    }

    pub(crate) async fn kv_delete_prefix(conn: &mut SqliteConnection, prefix: &str) -> Result<()> {
        sqlx::query("DELETE FROM kv WHERE key >= ? AND key < ?")
            .bind(prefix)
            .bind(Self::prefix_end(prefix))
            .execute(conn)
            .await?;
        Ok(())
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
