//! Persistent key-value storage for cache envelopes.
//!
//! Values are opaque strings (JSON envelopes written by the refresh cache).
//! Each data domain owns its own key, so no cross-key coordination happens here.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use tunecast_core::{RusqliteErrorExt, StorageError};

use crate::types::StorageResult;

/// Async key-value store.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> StorageResult<Option<String>>;

    async fn set(&self, key: &str, value: String) -> StorageResult<()>;
}

/// In-process store, used for tests and ephemeral sessions.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> StorageResult<()> {
        self.entries.lock().insert(key.to_string(), value);
        Ok(())
    }
}

/// SQLite-backed store that survives restarts.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open or create the database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> StorageResult<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StorageError::Unavailable(e.to_string()))?;
        }
        let conn = Connection::open(path).map_err(|e| StorageError::Unavailable(e.to_string()))?;
        Self::with_connection(conn)
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> StorageResult<Self> {
        let conn =
            Connection::open_in_memory().map_err(|e| StorageError::Unavailable(e.to_string()))?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> StorageResult<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );
            "#,
        )
        .map_err(RusqliteErrorExt::into_storage_error)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn get_blocking(conn: &Connection, key: &str) -> StorageResult<Option<String>> {
        conn.query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
            row.get(0)
        })
        .optional()
        .map_err(RusqliteErrorExt::into_storage_error)
    }

    fn set_blocking(conn: &Connection, key: &str, value: &str) -> StorageResult<()> {
        conn.execute(
            "INSERT OR REPLACE INTO kv (key, value, updated_at) VALUES (?1, ?2, ?3)",
            params![key, value, Utc::now().timestamp_millis()],
        )
        .map_err(|e| StorageError::WriteFailed(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for SqliteStore {
    async fn get(&self, key: &str) -> StorageResult<Option<String>> {
        let conn = self.conn.clone();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || Self::get_blocking(&conn.lock(), &key))
            .await
            .map_err(|e| StorageError::ReadFailed(e.to_string()))?
    }

    async fn set(&self, key: &str, value: String) -> StorageResult<()> {
        let conn = self.conn.clone();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || Self::set_blocking(&conn.lock(), &key, &value))
            .await
            .map_err(|e| StorageError::WriteFailed(e.to_string()))?
    }
}
