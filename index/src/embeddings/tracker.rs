//! Hash-tracked re-embed scheduling.
//!
//! A chunk is fresh for a model iff an embedding row exists whose stored
//! chunk hash equals the chunk's current hash. The tracker reports the
//! missing set, the stale set, and their union.

use std::sync::Arc;

use rusqlite::params;

use crate::error::Result;
use crate::storage::SqliteStore;

/// A chunk the embedder still owes a vector for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingChunk {
    pub chunk_id: i64,
    pub chunk_hash: String,
}

/// Status totals for one model.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct TrackerTotals {
    pub total_chunks: u64,
    pub fresh: u64,
    pub stale: u64,
    pub missing: u64,
}

/// Re-embed tracker over the shared store.
#[derive(Clone)]
pub struct ReembedTracker {
    store: Arc<SqliteStore>,
}

impl ReembedTracker {
    pub fn new(store: Arc<SqliteStore>) -> Self {
        Self { store }
    }

    /// Chunks with no embedding row for the model.
    pub async fn chunks_without_embeddings(&self, model_id: &str) -> Result<Vec<PendingChunk>> {
        let model_id = model_id.to_string();
        self.store
            .query(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT c.id, c.chunk_hash FROM chunks c \
                     LEFT JOIN embeddings e ON e.chunk_id = c.id AND e.model_id = ? \
                     WHERE e.id IS NULL ORDER BY c.id",
                )?;
                let rows = stmt.query_map(params![model_id], |row| {
                    Ok(PendingChunk {
                        chunk_id: row.get(0)?,
                        chunk_hash: row.get(1)?,
                    })
                })?;
                Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
            })
            .await
    }

    /// Chunks whose stored embedding hash no longer matches the chunk.
    pub async fn chunks_needing_reembed(&self, model_id: &str) -> Result<Vec<PendingChunk>> {
        let model_id = model_id.to_string();
        self.store
            .query(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT c.id, c.chunk_hash FROM chunks c \
                     JOIN embeddings e ON e.chunk_id = c.id AND e.model_id = ? \
                     WHERE e.chunk_hash != c.chunk_hash ORDER BY c.id",
                )?;
                let rows = stmt.query_map(params![model_id], |row| {
                    Ok(PendingChunk {
                        chunk_id: row.get(0)?,
                        chunk_hash: row.get(1)?,
                    })
                })?;
                Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
            })
            .await
    }

    /// Union of the missing and stale sets, ordered by chunk id.
    pub async fn pending(&self, model_id: &str) -> Result<Vec<PendingChunk>> {
        let model_id = model_id.to_string();
        self.store
            .query(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT c.id, c.chunk_hash FROM chunks c \
                     LEFT JOIN embeddings e ON e.chunk_id = c.id AND e.model_id = ? \
                     WHERE e.id IS NULL OR e.chunk_hash != c.chunk_hash ORDER BY c.id",
                )?;
                let rows = stmt.query_map(params![model_id], |row| {
                    Ok(PendingChunk {
                        chunk_id: row.get(0)?,
                        chunk_hash: row.get(1)?,
                    })
                })?;
                Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
            })
            .await
    }

    /// Whether a chunk is fresh for the model.
    pub async fn is_fresh(&self, chunk_id: i64, model_id: &str) -> Result<bool> {
        let model_id = model_id.to_string();
        self.store
            .query(move |conn| {
                let fresh: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM chunks c \
                     JOIN embeddings e ON e.chunk_id = c.id AND e.model_id = ? \
                     WHERE c.id = ? AND e.chunk_hash = c.chunk_hash",
                    params![model_id, chunk_id],
                    |row| row.get(0),
                )?;
                Ok(fresh > 0)
            })
            .await
    }

    /// Upsert the embedding row for `(chunk, model)`.
    pub async fn record_embedding(
        &self,
        chunk_id: i64,
        model_id: &str,
        model_version: &str,
        vector: &[f32],
        chunk_hash: &str,
    ) -> Result<()> {
        let model_id = model_id.to_string();
        let model_version = model_version.to_string();
        let chunk_hash = chunk_hash.to_string();
        let blob: Vec<u8> = vector.iter().flat_map(|f| f.to_le_bytes()).collect();
        let dimensions = vector.len() as u32;
        self.store
            .transaction(move |conn| {
                conn.execute(
                    "INSERT INTO embeddings \
                     (chunk_id, model_id, model_version, dimensions, vector, chunk_hash, created_at) \
                     VALUES (?, ?, ?, ?, ?, ?, strftime('%s', 'now')) \
                     ON CONFLICT(chunk_id, model_id) DO UPDATE SET \
                         model_version = excluded.model_version, \
                         dimensions = excluded.dimensions, \
                         vector = excluded.vector, \
                         chunk_hash = excluded.chunk_hash, \
                         created_at = excluded.created_at",
                    params![chunk_id, model_id, model_version, dimensions, blob, chunk_hash],
                )?;
                Ok(())
            })
            .await
    }

    /// Status totals for one model.
    pub async fn totals(&self, model_id: &str) -> Result<TrackerTotals> {
        let model_id = model_id.to_string();
        self.store
            .query(move |conn| {
                let total_chunks: i64 =
                    conn.query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))?;
                let fresh: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM chunks c \
                     JOIN embeddings e ON e.chunk_id = c.id AND e.model_id = ? \
                     WHERE e.chunk_hash = c.chunk_hash",
                    params![model_id],
                    |row| row.get(0),
                )?;
                let stale: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM chunks c \
                     JOIN embeddings e ON e.chunk_id = c.id AND e.model_id = ? \
                     WHERE e.chunk_hash != c.chunk_hash",
                    params![model_id],
                    |row| row.get(0),
                )?;
                Ok(TrackerTotals {
                    total_chunks: total_chunks as u64,
                    fresh: fresh as u64,
                    stale: stale as u64,
                    missing: (total_chunks - fresh - stale) as u64,
                })
            })
            .await
    }
}
