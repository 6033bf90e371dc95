//! File catalog: one active record per canonical path, soft deletes,
//! rename handling, and the file-level FTS table.

use std::sync::Arc;

use rusqlite::Row;
use rusqlite::params;

use crate::error::Result;
use crate::storage::sqlite::OptionalExt;
use crate::storage::sqlite::SqliteStore;
use crate::types::FileRecord;

/// File-record persistence over the shared store.
#[derive(Clone)]
pub struct FileStore {
    store: Arc<SqliteStore>,
}

const FILE_COLUMNS: &str =
    "id, path, content_hash, language, size_bytes, mtime, indexed_at, deleted_at";

impl FileStore {
    pub fn new(store: Arc<SqliteStore>) -> Self {
        Self { store }
    }

    /// Upsert the active record for `path`.
    ///
    /// A soft-deleted record for the same path is revived rather than
    /// duplicated, preserving its id for chunk rows that still reference it.
    pub async fn upsert(
        &self,
        path: &str,
        content_hash: &str,
        language: &str,
        size_bytes: i64,
        mtime: i64,
    ) -> Result<FileRecord> {
        let path = path.to_string();
        let content_hash = content_hash.to_string();
        let language = language.to_string();
        self.store
            .transaction(move |conn| {
                let now = chrono::Utc::now().timestamp();
                let existing: Option<i64> = conn
                    .query_row(
                        "SELECT id FROM files WHERE path = ? ORDER BY deleted_at IS NOT NULL LIMIT 1",
                        params![path],
                        |row| row.get(0),
                    )
                    .optional()?;

                let id = match existing {
                    Some(id) => {
                        conn.execute(
                            "UPDATE files SET content_hash = ?, language = ?, size_bytes = ?, \
                             mtime = ?, indexed_at = ?, deleted_at = NULL WHERE id = ?",
                            params![content_hash, language, size_bytes, mtime, now, id],
                        )?;
                        id
                    }
                    None => {
                        conn.execute(
                            "INSERT INTO files (path, content_hash, language, size_bytes, mtime, indexed_at) \
                             VALUES (?, ?, ?, ?, ?, ?)",
                            params![path, content_hash, language, size_bytes, mtime, now],
                        )?;
                        conn.last_insert_rowid()
                    }
                };
                conn.query_row(
                    &format!("SELECT {FILE_COLUMNS} FROM files WHERE id = ?"),
                    params![id],
                    file_from_row,
                )
                .map_err(Into::into)
            })
            .await
    }

    /// Find the active record for a path.
    pub async fn find_active(&self, path: &str) -> Result<Option<FileRecord>> {
        let path = path.to_string();
        self.store
            .query(move |conn| {
                conn.query_row(
                    &format!(
                        "SELECT {FILE_COLUMNS} FROM files WHERE path = ? AND deleted_at IS NULL"
                    ),
                    params![path],
                    file_from_row,
                )
                .optional()
            })
            .await
    }

    pub async fn find_by_id(&self, id: i64) -> Result<Option<FileRecord>> {
        self.store
            .query(move |conn| {
                conn.query_row(
                    &format!("SELECT {FILE_COLUMNS} FROM files WHERE id = ?"),
                    params![id],
                    file_from_row,
                )
                .optional()
            })
            .await
    }

    /// All active records.
    pub async fn all_active(&self) -> Result<Vec<FileRecord>> {
        self.store
            .query(|conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {FILE_COLUMNS} FROM files WHERE deleted_at IS NULL ORDER BY path"
                ))?;
                let rows = stmt.query_map([], file_from_row)?;
                Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
            })
            .await
    }

    /// Soft-delete the active record; history is preserved for cascades.
    pub async fn soft_delete(&self, path: &str) -> Result<Option<i64>> {
        let path = path.to_string();
        self.store
            .transaction(move |conn| {
                let id: Option<i64> = conn
                    .query_row(
                        "SELECT id FROM files WHERE path = ? AND deleted_at IS NULL",
                        params![path],
                        |row| row.get(0),
                    )
                    .optional()?;
                if let Some(id) = id {
                    let now = chrono::Utc::now().timestamp();
                    conn.execute(
                        "UPDATE files SET deleted_at = ? WHERE id = ?",
                        params![now, id],
                    )?;
                    conn.execute(
                        "DELETE FROM files_fts WHERE path = ?",
                        params![path],
                    )?;
                }
                Ok(id)
            })
            .await
    }

    /// Update the path of an active record (rename). Content is unchanged,
    /// so no re-parse is required when the hash still matches.
    pub async fn rename(&self, old_path: &str, new_path: &str) -> Result<bool> {
        let old_path = old_path.to_string();
        let new_path = new_path.to_string();
        self.store
            .transaction(move |conn| {
                let changed = conn.execute(
                    "UPDATE files SET path = ? WHERE path = ? AND deleted_at IS NULL",
                    params![new_path, old_path],
                )?;
                if changed > 0 {
                    conn.execute(
                        "UPDATE files_fts SET path = ? WHERE path = ?",
                        params![new_path, old_path],
                    )?;
                }
                Ok(changed > 0)
            })
            .await
    }

    /// File-level lexical search over `files_fts`, relevance ordered.
    pub async fn search_content(&self, text: &str, limit: u32) -> Result<Vec<String>> {
        let expr = crate::storage::chunks::fts_match_expr(text);
        self.store
            .query(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT path FROM files_fts WHERE files_fts MATCH ? ORDER BY rank LIMIT ?",
                )?;
                let rows = stmt.query_map(params![expr, limit], |row| row.get::<_, String>(0))?;
                Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
            })
            .await
    }

    /// Replace the file-level FTS row for lexical file search.
    pub async fn index_content(&self, path: &str, content: &str) -> Result<()> {
        let path = path.to_string();
        let content = content.to_string();
        self.store
            .transaction(move |conn| {
                conn.execute("DELETE FROM files_fts WHERE path = ?", params![path])?;
                conn.execute(
                    "INSERT INTO files_fts (path, content) VALUES (?, ?)",
                    params![path, content],
                )?;
                Ok(())
            })
            .await
    }
}

fn file_from_row(row: &Row<'_>) -> rusqlite::Result<FileRecord> {
    Ok(FileRecord {
        id: row.get(0)?,
        path: row.get(1)?,
        content_hash: row.get(2)?,
        language: row.get(3)?,
        size_bytes: row.get(4)?,
        mtime: row.get(5)?,
        indexed_at: row.get(6)?,
        deleted_at: row.get(7)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn open() -> (TempDir, FileStore) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(SqliteStore::open(&dir.path().join("index.db")).unwrap());
        (dir, FileStore::new(store))
    }

    #[tokio::test]
    async fn test_upsert_and_find() {
        let (_dir, files) = open().await;
        let record = files.upsert("src/a.ts", "h1", "typescript", 10, 100).await.unwrap();
        assert!(record.id > 0);
        assert!(record.deleted_at.is_none());

        let found = files.find_active("src/a.ts").await.unwrap().unwrap();
        assert_eq!(found.id, record.id);
    }

    #[tokio::test]
    async fn test_upsert_same_path_keeps_one_active_record() {
        let (_dir, files) = open().await;
        let first = files.upsert("src/a.ts", "h1", "typescript", 10, 100).await.unwrap();
        let second = files.upsert("src/a.ts", "h2", "typescript", 12, 200).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.content_hash, "h2");
        assert_eq!(files.all_active().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_soft_delete_then_revive() {
        let (_dir, files) = open().await;
        let record = files.upsert("src/a.ts", "h1", "typescript", 10, 100).await.unwrap();
        let deleted_id = files.soft_delete("src/a.ts").await.unwrap();
        assert_eq!(deleted_id, Some(record.id));
        assert!(files.find_active("src/a.ts").await.unwrap().is_none());

        // History remains for cascades.
        let history = files.find_by_id(record.id).await.unwrap().unwrap();
        assert!(history.deleted_at.is_some());

        // Re-creating the file revives the same row.
        let revived = files.upsert("src/a.ts", "h3", "typescript", 9, 300).await.unwrap();
        assert_eq!(revived.id, record.id);
        assert!(revived.deleted_at.is_none());
    }

    #[tokio::test]
    async fn test_rename_updates_path() {
        let (_dir, files) = open().await;
        let record = files.upsert("src/old.ts", "h1", "typescript", 10, 100).await.unwrap();
        assert!(files.rename("src/old.ts", "src/new.ts").await.unwrap());

        assert!(files.find_active("src/old.ts").await.unwrap().is_none());
        let renamed = files.find_active("src/new.ts").await.unwrap().unwrap();
        assert_eq!(renamed.id, record.id);
        assert_eq!(renamed.content_hash, "h1");
    }
}
