//! Durable key-value substrate for the translation memory.
//! Hosts provide a `MemoryBackend`; `SqliteMemory` is the bundled default
//! and `EphemeralMemory` backs tests and hosts without durable storage.
//! Payloads are JSON lists of `[durable key, entry]` pairs, one list per
//! storage key.

use std::collections::HashMap;
use std::path::Path;

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::info;

use crate::translate::store::PersistentEntry;

#[derive(Debug)]
pub enum MemoryError {
    Io(String),
    Corrupt(String),
}

impl std::fmt::Display for MemoryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MemoryError::Io(msg) => write!(f, "storage IO error: {msg}"),
            MemoryError::Corrupt(msg) => write!(f, "storage payload corrupt: {msg}"),
        }
    }
}

/// Durable get/set of entry lists. Absent keys read as `None`; corrupt
/// payloads surface as `Corrupt` and are absorbed upstream as empty.
pub trait MemoryBackend: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<(String, PersistentEntry)>>, MemoryError>;
    fn set(&self, key: &str, entries: &[(String, PersistentEntry)]) -> Result<(), MemoryError>;
}

/// SQLite-backed store: one row per storage key, JSON payload column.
pub struct SqliteMemory {
    conn: Mutex<Connection>,
}

impl SqliteMemory {
    /// Open (or create) the database at the given path.
    pub fn open(db_path: &Path) -> Result<Self, MemoryError> {
        let conn = Connection::open(db_path)
            .map_err(|e| MemoryError::Io(format!("failed to open memory DB: {e}")))?;

        // WAL mode for better concurrent read performance
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(|e| MemoryError::Io(format!("PRAGMA failed: {e}")))?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS translation_memory (
                storage_key TEXT PRIMARY KEY,
                payload TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );",
        )
        .map_err(|e| MemoryError::Io(format!("create table failed: {e}")))?;

        info!(path = %db_path.display(), "translation memory DB opened");

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl MemoryBackend for SqliteMemory {
    fn get(&self, key: &str) -> Result<Option<Vec<(String, PersistentEntry)>>, MemoryError> {
        let conn = self.conn.lock();
        let payload: Option<String> = conn
            .query_row(
                "SELECT payload FROM translation_memory WHERE storage_key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| MemoryError::Io(e.to_string()))?;

        match payload {
            None => Ok(None),
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| MemoryError::Corrupt(e.to_string())),
        }
    }

    fn set(&self, key: &str, entries: &[(String, PersistentEntry)]) -> Result<(), MemoryError> {
        let payload =
            serde_json::to_string(entries).map_err(|e| MemoryError::Corrupt(e.to_string()))?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO translation_memory (storage_key, payload, updated_at)
             VALUES (?1, ?2, ?3)",
            params![key, payload, now_unix_ms()],
        )
        .map_err(|e| MemoryError::Io(e.to_string()))?;
        Ok(())
    }
}

/// In-memory backend for tests and hosts without durable storage.
#[derive(Default)]
pub struct EphemeralMemory {
    map: Mutex<HashMap<String, Vec<(String, PersistentEntry)>>>,
}

impl EphemeralMemory {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MemoryBackend for EphemeralMemory {
    fn get(&self, key: &str) -> Result<Option<Vec<(String, PersistentEntry)>>, MemoryError> {
        Ok(self.map.lock().get(key).cloned())
    }

    fn set(&self, key: &str, entries: &[(String, PersistentEntry)]) -> Result<(), MemoryError> {
        self.map.lock().insert(key.to_string(), entries.to_vec());
        Ok(())
    }
}

/// Current wall-clock time in milliseconds.
fn now_unix_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
