//! Async-safe SQLite store.
//!
//! `rusqlite::Connection` is not Send + Sync, so the connection lives in an
//! `Arc<Mutex<_>>` and all access goes through `spawn_blocking`. Writers
//! serialize at this boundary; WAL mode keeps readers parallel.

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;

use rusqlite::Connection;
use tokio::task::spawn_blocking;

use crate::error::IndexErr;
use crate::error::Result;

/// WAL auto-checkpoint threshold, in pages.
const WAL_AUTOCHECKPOINT_PAGES: i64 = 1000;

/// Page cache size: 64 MiB (negative value = KiB units in SQLite).
const PAGE_CACHE_KIB: i64 = -65536;

/// Checkpoint modes supported by the helper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointMode {
    Passive,
    Full,
    Restart,
    Truncate,
}

impl CheckpointMode {
    fn as_sql(&self) -> &'static str {
        match self {
            Self::Passive => "PASSIVE",
            Self::Full => "FULL",
            Self::Restart => "RESTART",
            Self::Truncate => "TRUNCATE",
        }
    }
}

/// Result of an explicit WAL checkpoint.
#[derive(Debug, Clone, Copy)]
pub struct CheckpointResult {
    /// True when another connection blocked the checkpoint.
    pub busy: bool,
    /// Total WAL frames at checkpoint time.
    pub wal_frames: i64,
    /// Frames moved back into the database.
    pub checkpointed_frames: i64,
}

/// Async-safe SQLite store with the engine's pragma profile.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    path: PathBuf,
}

impl SqliteStore {
    /// Open or create the database, apply pragmas, run the schema batch.
    pub fn open(path: &Path) -> Result<Self> {
        let path_buf = path.to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| IndexErr::sqlite(&path_buf, format!("create dir: {e}")))?;
        }
        let conn = Connection::open(path).map_err(|e| IndexErr::sqlite(&path_buf, e))?;
        Self::apply_pragmas(&conn, &path_buf)?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| IndexErr::sqlite(&path_buf, format!("schema init failed: {e}")))?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: path_buf,
        })
    }

    /// Open an in-memory store (tests and throwaway indexes).
    pub fn open_in_memory() -> Result<Self> {
        let path = PathBuf::from(":memory:");
        let conn = Connection::open_in_memory().map_err(|e| IndexErr::sqlite(&path, e))?;
        // WAL does not apply in memory; the rest of the profile does.
        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(|e| IndexErr::sqlite(&path, e))?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| IndexErr::sqlite(&path, format!("schema init failed: {e}")))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path,
        })
    }

    fn apply_pragmas(conn: &Connection, path: &PathBuf) -> Result<()> {
        let pragma = |name: &str, value: &str| -> Result<()> {
            conn.pragma_update(None, name, value)
                .map_err(|e| IndexErr::sqlite(path, format!("pragma {name}: {e}")))
        };
        pragma("journal_mode", "WAL")?;
        pragma("synchronous", "NORMAL")?;
        pragma("cache_size", &PAGE_CACHE_KIB.to_string())?;
        pragma("temp_store", "MEMORY")?;
        pragma("foreign_keys", "ON")?;
        pragma("wal_autocheckpoint", &WAL_AUTOCHECKPOINT_PAGES.to_string())?;
        Ok(())
    }

    /// Get the database path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run a read/write closure on the blocking pool.
    pub async fn query<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        let path = self.path.clone();

        spawn_blocking(move || {
            let guard = conn.lock().unwrap_or_else(|poisoned| {
                tracing::warn!(path = %path.display(), "store mutex poisoned, recovering");
                let inner = poisoned.into_inner();
                if !inner.is_autocommit() {
                    if let Err(e) = inner.execute("ROLLBACK", []) {
                        tracing::error!(path = %path.display(), error = %e, "rollback after poisoning failed");
                    }
                }
                inner
            });
            f(&guard)
        })
        .await
        .map_err(|e| IndexErr::sqlite(&self.path, format!("spawn_blocking failed: {e}")))?
    }

    /// Run a closure inside a transaction on the blocking pool.
    ///
    /// FTS triggers fire inside the same transaction, so full-text rows are
    /// never observed half-updated.
    pub async fn transaction<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        let path = self.path.clone();

        spawn_blocking(move || {
            let mut guard = conn.lock().unwrap_or_else(|poisoned| {
                tracing::warn!(path = %path.display(), "store mutex poisoned in transaction, recovering");
                poisoned.into_inner()
            });
            let tx = guard
                .transaction()
                .map_err(|e| IndexErr::sqlite(&path, format!("transaction start failed: {e}")))?;
            let result = f(&tx)?;
            tx.commit()
                .map_err(|e| IndexErr::sqlite(&path, format!("transaction commit failed: {e}")))?;
            Ok(result)
        })
        .await
        .map_err(|e| IndexErr::sqlite(&self.path, format!("spawn_blocking failed: {e}")))?
    }

    /// Perform an explicit WAL checkpoint.
    pub async fn checkpoint(&self, mode: CheckpointMode) -> Result<CheckpointResult> {
        let sql = format!("PRAGMA wal_checkpoint({})", mode.as_sql());
        self.query(move |conn| {
            let (busy, wal_frames, checkpointed_frames): (i64, i64, i64) = conn
                .query_row(&sql, [], |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?))
                })?;
            Ok(CheckpointResult {
                busy: busy != 0,
                wal_frames,
                checkpointed_frames,
            })
        })
        .await
    }

    /// Force a truncating checkpoint when the WAL companion file exceeds
    /// `max_wal_bytes`.
    pub async fn checkpoint_if_oversized(&self, max_wal_bytes: u64) -> Result<Option<CheckpointResult>> {
        let wal_path = PathBuf::from(format!("{}-wal", self.path.display()));
        let size = std::fs::metadata(&wal_path).map(|m| m.len()).unwrap_or(0);
        if size <= max_wal_bytes {
            return Ok(None);
        }
        tracing::info!(
            wal_bytes = size,
            limit = max_wal_bytes,
            "WAL oversized, forcing truncate checkpoint"
        );
        Ok(Some(self.checkpoint(CheckpointMode::Truncate).await?))
    }
}

/// Extension trait converting no-row results to `None`.
pub trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(v) => Ok(Some(v)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// Schema for the index database.
const SCHEMA: &str = r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at INTEGER NOT NULL
);
INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, strftime('%s', 'now'));

-- File catalog. One active record per canonical path; deletes are soft so
-- cascades can still locate dependent rows.
CREATE TABLE IF NOT EXISTS files (
    id INTEGER PRIMARY KEY,
    path TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    language TEXT NOT NULL,
    size_bytes INTEGER NOT NULL DEFAULT 0,
    mtime INTEGER NOT NULL DEFAULT 0,
    indexed_at INTEGER NOT NULL DEFAULT 0,
    deleted_at INTEGER
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_files_active_path ON files(path) WHERE deleted_at IS NULL;
CREATE INDEX IF NOT EXISTS idx_files_hash ON files(content_hash);

-- Logical code chunks keyed by stable content hash.
CREATE TABLE IF NOT EXISTS chunks (
    id INTEGER PRIMARY KEY,
    chunk_hash TEXT NOT NULL UNIQUE,
    file_id INTEGER NOT NULL REFERENCES files(id),
    kind TEXT NOT NULL,
    name TEXT NOT NULL,
    content TEXT NOT NULL,
    normalized_content TEXT NOT NULL,
    start_line INTEGER NOT NULL,
    end_line INTEGER NOT NULL,
    start_byte INTEGER NOT NULL,
    end_byte INTEGER NOT NULL,
    language TEXT NOT NULL,
    class_name TEXT,
    class_inheritance TEXT NOT NULL DEFAULT '[]',
    module_path TEXT NOT NULL,
    namespace TEXT,
    method_signature TEXT,
    is_top_level INTEGER NOT NULL DEFAULT 1,
    parent_chunk_hash TEXT,
    documentation TEXT,
    signature TEXT,
    line_count INTEGER NOT NULL,
    char_count INTEGER NOT NULL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    UNIQUE(file_id, start_line)
);
CREATE INDEX IF NOT EXISTS idx_chunks_file ON chunks(file_id);
CREATE INDEX IF NOT EXISTS idx_chunks_kind ON chunks(kind);
CREATE INDEX IF NOT EXISTS idx_chunks_language ON chunks(language);
CREATE INDEX IF NOT EXISTS idx_chunks_name ON chunks(name);

-- Full-text index over chunk fields, porter-stemmed.
CREATE VIRTUAL TABLE IF NOT EXISTS chunks_fts USING fts5(
    name,
    content,
    documentation,
    signature,
    content=chunks,
    content_rowid=id,
    tokenize='porter unicode61'
);

-- Triggers keep chunks_fts consistent within the writing transaction.
CREATE TRIGGER IF NOT EXISTS chunks_ai AFTER INSERT ON chunks BEGIN
    INSERT INTO chunks_fts(rowid, name, content, documentation, signature)
    VALUES (new.id, new.name, new.content, new.documentation, new.signature);
END;

CREATE TRIGGER IF NOT EXISTS chunks_ad AFTER DELETE ON chunks BEGIN
    INSERT INTO chunks_fts(chunks_fts, rowid, name, content, documentation, signature)
    VALUES ('delete', old.id, old.name, old.content, old.documentation, old.signature);
END;

CREATE TRIGGER IF NOT EXISTS chunks_au AFTER UPDATE ON chunks BEGIN
    INSERT INTO chunks_fts(chunks_fts, rowid, name, content, documentation, signature)
    VALUES ('delete', old.id, old.name, old.content, old.documentation, old.signature);
    INSERT INTO chunks_fts(rowid, name, content, documentation, signature)
    VALUES (new.id, new.name, new.content, new.documentation, new.signature);
END;

-- Symbol rows backing find_def / symbols.
CREATE TABLE IF NOT EXISTS symbols (
    id INTEGER PRIMARY KEY,
    file_id INTEGER NOT NULL REFERENCES files(id),
    name TEXT NOT NULL,
    kind TEXT NOT NULL,
    start_line INTEGER NOT NULL,
    end_line INTEGER NOT NULL,
    signature TEXT,
    docs TEXT,
    UNIQUE(file_id, name, start_line)
);
CREATE INDEX IF NOT EXISTS idx_symbols_name ON symbols(name);
CREATE INDEX IF NOT EXISTS idx_symbols_kind ON symbols(kind);

-- Second FTS table: file-level lexical search.
CREATE VIRTUAL TABLE IF NOT EXISTS files_fts USING fts5(
    path,
    content,
    tokenize='porter unicode61'
);

-- Dense embedding rows, one per (chunk, model).
CREATE TABLE IF NOT EXISTS embeddings (
    id INTEGER PRIMARY KEY,
    chunk_id INTEGER NOT NULL REFERENCES chunks(id) ON DELETE CASCADE,
    model_id TEXT NOT NULL,
    model_version TEXT NOT NULL,
    dimensions INTEGER NOT NULL,
    vector BLOB NOT NULL,
    chunk_hash TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    UNIQUE(chunk_id, model_id)
);
CREATE INDEX IF NOT EXISTS idx_embeddings_model ON embeddings(model_id);
"#;
