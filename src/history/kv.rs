//! Key-value store with per-key expiry
//!
//! `SqliteKvStore` backs production; `MemoryKvStore` is for tests and
//! single-process development.

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum KvError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type KvResult<T> = Result<T, KvError>;

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Store `value` under `key`, replacing any previous value, expiring after `ttl`
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> KvResult<()>;

    /// Fetch a live value; expired keys read as absent
    async fn get(&self, key: &str) -> KvResult<Option<String>>;

    /// Remove a key. Absent keys are not an error.
    async fn del(&self, key: &str) -> KvResult<()>;

    /// Drop expired rows, returning how many were removed
    async fn purge_expired(&self) -> KvResult<usize>;
}

fn expiry_millis(ttl: Duration) -> i64 {
    let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
    Utc::now().timestamp_millis().saturating_add(ttl_ms)
}

const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS kv (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    expires_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_kv_expires ON kv(expires_at);
";

/// SQLite-backed store
#[derive(Clone)]
pub struct SqliteKvStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteKvStore {
    /// Open or create the store at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> KvResult<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// Open an in-memory store (for testing)
    #[allow(dead_code)] // Used in tests
    pub fn open_in_memory() -> KvResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> KvResult<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl KeyValueStore for SqliteKvStore {
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> KvResult<()> {
        self.conn().execute(
            "INSERT INTO kv (key, value, expires_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at",
            params![key, value, expiry_millis(ttl)],
        )?;
        Ok(())
    }

    async fn get(&self, key: &str) -> KvResult<Option<String>> {
        let value = self
            .conn()
            .query_row(
                "SELECT value FROM kv WHERE key = ?1 AND expires_at > ?2",
                params![key, Utc::now().timestamp_millis()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    async fn del(&self, key: &str) -> KvResult<()> {
        self.conn()
            .execute("DELETE FROM kv WHERE key = ?1", params![key])?;
        Ok(())
    }

    async fn purge_expired(&self) -> KvResult<usize> {
        let removed = self.conn().execute(
            "DELETE FROM kv WHERE expires_at <= ?1",
            params![Utc::now().timestamp_millis()],
        )?;
        Ok(removed)
    }
}

/// In-process store
#[derive(Default)]
pub struct MemoryKvStore {
    entries: Mutex<HashMap<String, (String, i64)>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, (String, i64)>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Overwrite a stored value in place, keeping its expiry (for tamper tests)
    #[cfg(test)]
    pub fn corrupt(&self, key: &str, f: impl FnOnce(&mut String)) {
        if let Some((value, _)) = self.entries().get_mut(key) {
            f(value);
        }
    }
}

#[async_trait]
impl KeyValueStore for MemoryKvStore {
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> KvResult<()> {
        self.entries()
            .insert(key.to_string(), (value.to_string(), expiry_millis(ttl)));
        Ok(())
    }

    async fn get(&self, key: &str) -> KvResult<Option<String>> {
        let now = Utc::now().timestamp_millis();
        let mut entries = self.entries();
        let live = entries
            .get(key)
            .filter(|(_, expires_at)| *expires_at > now)
            .map(|(value, _)| value.clone());
        if live.is_none() {
            entries.remove(key);
        }
        Ok(live)
    }

    async fn del(&self, key: &str) -> KvResult<()> {
        self.entries().remove(key);
        Ok(())
    }

    async fn purge_expired(&self) -> KvResult<usize> {
        let now = Utc::now().timestamp_millis();
        let mut entries = self.entries();
        let before = entries.len();
        entries.retain(|_, (_, expires_at)| *expires_at > now);
        Ok(before - entries.len())
    }
}
