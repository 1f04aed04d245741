//! Persistence layer (§4.H): a single SQLite-backed connection shared by
//! the audit repository and the memory repository.
//!
//! Grounded on `db/connection.py`'s `Database` wrapper: one schema script
//! run at startup, one connection, repository objects layered on top.
//! `rusqlite::Connection` is `!Sync`, so the connection is held behind a
//! `tokio::sync::Mutex` per §5 ("single owner... must serialize writes");
//! callers `.lock().await` then issue the (synchronous, fast, local-file)
//! rusqlite call inline rather than round-tripping through
//! `spawn_blocking`, matching the scale of a single-operator database.

pub mod audit;
pub mod memory;

use std::path::Path;
use std::sync::Arc;

use rusqlite::Connection;
use tokio::sync::Mutex;

use crate::error::Result;

pub use audit::{AuditEntry, AuditRepository, ToolExecutionEntry};
pub use memory::{Memory, MemoryRepository};

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS audit_logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp TEXT NOT NULL DEFAULT (datetime('now')),
    source TEXT NOT NULL,
    user_id TEXT,
    session_id TEXT,
    message_type TEXT NOT NULL,
    content TEXT NOT NULL,
    metadata TEXT
);

CREATE TABLE IF NOT EXISTS tool_executions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    audit_log_id INTEGER,
    timestamp TEXT NOT NULL DEFAULT (datetime('now')),
    tool_name TEXT NOT NULL,
    parameters TEXT NOT NULL,
    result TEXT,
    duration_ms INTEGER,
    success INTEGER NOT NULL,
    error_message TEXT,
    FOREIGN KEY (audit_log_id) REFERENCES audit_logs(id)
);

CREATE INDEX IF NOT EXISTS idx_audit_timestamp ON audit_logs(timestamp);
CREATE INDEX IF NOT EXISTS idx_audit_source ON audit_logs(source);
CREATE INDEX IF NOT EXISTS idx_audit_message_type ON audit_logs(message_type);
CREATE INDEX IF NOT EXISTS idx_tool_name ON tool_executions(tool_name);
CREATE INDEX IF NOT EXISTS idx_tool_timestamp ON tool_executions(timestamp);

CREATE TABLE IF NOT EXISTS memories (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
    category TEXT NOT NULL,
    content TEXT NOT NULL,
    source TEXT,
    user_id TEXT
);

CREATE INDEX IF NOT EXISTS idx_memories_category ON memories(category);
CREATE INDEX IF NOT EXISTS idx_memories_created ON memories(created_at);
";

/// Shared handle to the one SQLite connection both repositories write
/// through. Cloning is cheap (it's an `Arc`); every clone serializes on
/// the same mutex.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (creating if absent) the database at `path` and apply the
    /// schema. `:memory:`-style paths work too, for tests.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| crate::error::Error::other(format!("creating database directory: {e}")))?;
            }
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA_SQL)?;
        tracing::info!(path = %path.display(), "database initialized");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory database, schema applied, for tests and ephemeral runs.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub(crate) fn handle(&self) -> Arc<Mutex<Connection>> {
        self.conn.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn open_in_memory_creates_schema() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.handle();
        let guard = conn.lock().await;
        let count: i64 = guard
            .query_row(
                "SELECT count(*) FROM sqlite_master WHERE type='table' AND name IN ('audit_logs','tool_executions','memories')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 3);
    }
}
