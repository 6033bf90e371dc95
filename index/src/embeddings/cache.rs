//! Byte-level vector cache.
//!
//! Stores float32 vectors as blobs in a dedicated SQLite file, keyed by
//! `(content_hash, model_id, model_version, dimensions)`. A model or
//! dimension change invalidates only the matching rows.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::Connection;
use rusqlite::params;

use crate::error::IndexErr;
use crate::error::Result;
use crate::storage::OptionalExt;

/// Aggregate cache statistics.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct CacheStatistics {
    pub total_entries: u64,
    pub total_bytes: u64,
    /// Oldest entry creation time, Unix seconds.
    pub oldest: Option<i64>,
    pub newest: Option<i64>,
    /// `accessed_in_window / total_entries`.
    pub hit_rate: f64,
}

/// SQLite-backed vector cache.
pub struct VectorCache {
    conn: Mutex<Connection>,
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS vectors (
    content_hash TEXT NOT NULL,
    model_id TEXT NOT NULL,
    model_version TEXT NOT NULL,
    dimensions INTEGER NOT NULL,
    vector BLOB NOT NULL,
    created_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),
    last_accessed INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),
    PRIMARY KEY (content_hash, model_id, model_version, dimensions)
);
CREATE INDEX IF NOT EXISTS idx_vectors_model ON vectors(model_id, dimensions);
"#;

impl VectorCache {
    /// Open or create the cache database.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| IndexErr::sqlite(path, format!("create dir: {e}")))?;
        }
        let conn = Connection::open(path).map_err(|e| IndexErr::sqlite(path, e))?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| IndexErr::sqlite(path, format!("cache schema: {e}")))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory cache for tests.
    pub fn open_in_memory() -> Result<Self> {
        let path = Path::new(":memory:");
        let conn = Connection::open_in_memory().map_err(|e| IndexErr::sqlite(path, e))?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| IndexErr::sqlite(path, format!("cache schema: {e}")))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| IndexErr::SqliteOp {
            operation: "lock vector cache".to_string(),
            cause: "mutex poisoned".to_string(),
        })
    }

    /// Fetch a cached vector and bump its last-accessed timestamp.
    pub fn get(
        &self,
        content_hash: &str,
        model_id: &str,
        model_version: &str,
        dimensions: u32,
    ) -> Result<Option<Vec<f32>>> {
        let conn = self.lock()?;
        let row: Option<Vec<u8>> = conn
            .query_row(
                "SELECT vector FROM vectors WHERE content_hash = ? AND model_id = ? \
                 AND model_version = ? AND dimensions = ?",
                params![content_hash, model_id, model_version, dimensions],
                |row| row.get(0),
            )
            .optional()?;

        let Some(bytes) = row else {
            return Ok(None);
        };
        conn.execute(
            "UPDATE vectors SET last_accessed = strftime('%s', 'now') \
             WHERE content_hash = ? AND model_id = ? AND model_version = ? AND dimensions = ?",
            params![content_hash, model_id, model_version, dimensions],
        )?;
        Ok(Some(bytes_to_f32(&bytes)))
    }

    /// Store a vector; the blob length must be `4 × dimensions`.
    pub fn put(
        &self,
        content_hash: &str,
        model_id: &str,
        model_version: &str,
        vector: &[f32],
    ) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO vectors \
             (content_hash, model_id, model_version, dimensions, vector) \
             VALUES (?, ?, ?, ?, ?)",
            params![
                content_hash,
                model_id,
                model_version,
                vector.len() as u32,
                f32_to_bytes(vector)
            ],
        )?;
        Ok(())
    }

    /// Delete every row with the given dimensionality.
    pub fn invalidate_by_dimensions(&self, dimensions: u32) -> Result<usize> {
        let conn = self.lock()?;
        Ok(conn.execute(
            "DELETE FROM vectors WHERE dimensions = ?",
            params![dimensions],
        )?)
    }

    /// Delete rows for a model; `dimensions` narrows the sweep when given.
    pub fn invalidate_by_model(&self, model_id: &str, dimensions: Option<u32>) -> Result<usize> {
        let conn = self.lock()?;
        let deleted = match dimensions {
            Some(d) => conn.execute(
                "DELETE FROM vectors WHERE model_id = ? AND dimensions = ?",
                params![model_id, d],
            )?,
            None => conn.execute("DELETE FROM vectors WHERE model_id = ?", params![model_id])?,
        };
        Ok(deleted)
    }

    /// Aggregate statistics; the hit rate counts entries accessed within
    /// `window_secs` of now.
    pub fn statistics(&self, window_secs: i64) -> Result<CacheStatistics> {
        let conn = self.lock()?;
        let (total_entries, total_bytes, oldest, newest): (i64, Option<i64>, Option<i64>, Option<i64>) =
            conn.query_row(
                "SELECT COUNT(*), SUM(LENGTH(vector)), MIN(created_at), MAX(created_at) FROM vectors",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )?;

        let accessed_in_window: i64 = conn.query_row(
            "SELECT COUNT(*) FROM vectors WHERE last_accessed >= strftime('%s', 'now') - ?",
            params![window_secs],
            |row| row.get(0),
        )?;

        Ok(CacheStatistics {
            total_entries: total_entries as u64,
            total_bytes: total_bytes.unwrap_or(0) as u64,
            oldest,
            newest,
            hit_rate: if total_entries > 0 {
                accessed_in_window as f64 / total_entries as f64
            } else {
                0.0
            },
        })
    }
}

fn f32_to_bytes(floats: &[f32]) -> Vec<u8> {
    floats.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn bytes_to_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_get_round_trip() {
        let cache = VectorCache::open_in_memory().unwrap();
        let vector = vec![0.25f32, -1.5, 3.0];
        cache.put("hash1", "model-a", "1", &vector).unwrap();

        let got = cache.get("hash1", "model-a", "1", 3).unwrap().unwrap();
        assert_eq!(got, vector);
    }

    #[test]
    fn test_key_isolation() {
        let cache = VectorCache::open_in_memory().unwrap();
        cache.put("hash1", "model-a", "1", &[1.0, 2.0]).unwrap();

        assert!(cache.get("hash1", "model-b", "1", 2).unwrap().is_none());
        assert!(cache.get("hash1", "model-a", "2", 2).unwrap().is_none());
        assert!(cache.get("hash1", "model-a", "1", 3).unwrap().is_none());
        assert!(cache.get("hash1", "model-a", "1", 2).unwrap().is_some());
    }

    #[test]
    fn test_invalidate_by_dimensions() {
        let cache = VectorCache::open_in_memory().unwrap();
        cache.put("h1", "m", "1", &[1.0, 2.0]).unwrap();
        cache.put("h2", "m", "1", &[1.0, 2.0, 3.0]).unwrap();

        let deleted = cache.invalidate_by_dimensions(2).unwrap();
        assert_eq!(deleted, 1);
        assert!(cache.get("h1", "m", "1", 2).unwrap().is_none());
        assert!(cache.get("h2", "m", "1", 3).unwrap().is_some());
    }

    #[test]
    fn test_invalidate_by_model() {
        let cache = VectorCache::open_in_memory().unwrap();
        cache.put("h1", "m1", "1", &[1.0]).unwrap();
        cache.put("h2", "m2", "1", &[1.0]).unwrap();

        assert_eq!(cache.invalidate_by_model("m1", None).unwrap(), 1);
        assert!(cache.get("h1", "m1", "1", 1).unwrap().is_none());
        assert!(cache.get("h2", "m2", "1", 1).unwrap().is_some());
    }

    #[test]
    fn test_statistics() {
        let cache = VectorCache::open_in_memory().unwrap();
        cache.put("h1", "m", "1", &[1.0, 2.0]).unwrap();
        cache.put("h2", "m", "1", &[3.0, 4.0]).unwrap();
        cache.get("h1", "m", "1", 2).unwrap();

        let stats = cache.statistics(3600).unwrap();
        assert_eq!(stats.total_entries, 2);
        assert_eq!(stats.total_bytes, 16);
        assert!(stats.oldest.is_some());
        assert!(stats.hit_rate > 0.0);
    }
}
