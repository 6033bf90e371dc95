//! Chunk table operations: hash-keyed upserts, filtered queries over the
//! FTS index, and store statistics.

use std::collections::BTreeMap;
use std::sync::Arc;

use rusqlite::Connection;
use rusqlite::Row;
use rusqlite::params;
use rusqlite::types::Value;

use crate::error::IndexErr;
use crate::error::Result;
use crate::storage::sqlite::OptionalExt;
use crate::storage::sqlite::SqliteStore;
use crate::types::Chunk;
use crate::types::ChunkContext;
use crate::types::ChunkKind;

/// Default page size for chunk queries.
pub const DEFAULT_QUERY_LIMIT: u32 = 100;

/// Filtered, paginated chunk query.
#[derive(Debug, Clone)]
pub struct ChunkQuery {
    pub kinds: Vec<ChunkKind>,
    pub languages: Vec<String>,
    pub file_id: Option<i64>,
    pub min_line_count: Option<u32>,
    pub max_line_count: Option<u32>,
    /// Full-text match over (name, content, documentation, signature).
    pub search_text: Option<String>,
    pub limit: u32,
    pub offset: u32,
}

impl Default for ChunkQuery {
    fn default() -> Self {
        Self {
            kinds: Vec::new(),
            languages: Vec::new(),
            file_id: None,
            min_line_count: None,
            max_line_count: None,
            search_text: None,
            limit: DEFAULT_QUERY_LIMIT,
            offset: 0,
        }
    }
}

/// One page of query results with the pre-pagination total.
#[derive(Debug, Default)]
pub struct ChunkPage {
    pub chunks: Vec<Chunk>,
    pub total_count: u64,
}

/// Aggregate statistics over the chunk table.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ChunkStatistics {
    pub total_chunks: u64,
    pub by_language: BTreeMap<String, u64>,
    pub by_kind: BTreeMap<String, u64>,
    pub average_chunk_chars: f64,
    /// Chunks whose line count exceeds the large-chunk threshold.
    pub oversized_count: u64,
    pub last_updated: Option<i64>,
}

/// Chunk persistence over the shared store.
#[derive(Clone)]
pub struct ChunkStore {
    store: Arc<SqliteStore>,
}

const CHUNK_COLUMNS: &str = "id, chunk_hash, file_id, kind, name, content, normalized_content, \
     start_line, end_line, start_byte, end_byte, language, class_name, class_inheritance, \
     module_path, namespace, method_signature, is_top_level, parent_chunk_hash, documentation, \
     signature, line_count, char_count, created_at, updated_at";

impl ChunkStore {
    pub fn new(store: Arc<SqliteStore>) -> Self {
        Self { store }
    }

    /// Upsert one chunk keyed by `chunk_hash`; returns the stored row.
    pub async fn save_chunk(&self, chunk: Chunk) -> Result<Chunk> {
        chunk.check_invariants()?;
        self.store
            .transaction(move |conn| upsert_chunk(conn, &chunk))
            .await
    }

    /// Replace a file's chunk set in one transaction.
    ///
    /// Rows whose hash still exists keep their id (re-indexing an unchanged
    /// file writes zero new rows); stale rows are deleted first so position
    /// uniqueness cannot collide.
    pub async fn replace_file_chunks(&self, file_id: i64, chunks: Vec<Chunk>) -> Result<Vec<Chunk>> {
        for chunk in &chunks {
            chunk.check_invariants()?;
        }
        self.store
            .transaction(move |conn| {
                let hashes: Vec<String> = chunks.iter().map(|c| c.chunk_hash.clone()).collect();
                let placeholders = vec!["?"; hashes.len()].join(",");
                let sql = if hashes.is_empty() {
                    "DELETE FROM chunks WHERE file_id = ?".to_string()
                } else {
                    format!(
                        "DELETE FROM chunks WHERE file_id = ? AND chunk_hash NOT IN ({placeholders})"
                    )
                };
                let mut args: Vec<Value> = vec![Value::Integer(file_id)];
                args.extend(hashes.into_iter().map(Value::Text));
                conn.execute(&sql, rusqlite::params_from_iter(args))?;

                let mut stored = Vec::with_capacity(chunks.len());
                for chunk in chunks {
                    stored.push(upsert_chunk(conn, &chunk)?);
                }
                Ok(stored)
            })
            .await
    }

    pub async fn find_by_hash(&self, hash: &str) -> Result<Option<Chunk>> {
        if !crate::types::is_valid_chunk_hash(hash) {
            return Err(IndexErr::InvalidChunkHash {
                hash: hash.to_string(),
            });
        }
        let hash = hash.to_string();
        self.store
            .query(move |conn| {
                conn.query_row(
                    &format!("SELECT {CHUNK_COLUMNS} FROM chunks WHERE chunk_hash = ?"),
                    params![hash],
                    chunk_from_row,
                )
                .optional()
            })
            .await
    }

    pub async fn find_by_id(&self, id: i64) -> Result<Option<Chunk>> {
        self.store
            .query(move |conn| {
                conn.query_row(
                    &format!("SELECT {CHUNK_COLUMNS} FROM chunks WHERE id = ?"),
                    params![id],
                    chunk_from_row,
                )
                .optional()
            })
            .await
    }

    /// Every chunk row, ordered by id. Used for hybrid-index rebuilds.
    pub async fn all(&self) -> Result<Vec<Chunk>> {
        self.store
            .query(|conn| {
                let mut stmt =
                    conn.prepare(&format!("SELECT {CHUNK_COLUMNS} FROM chunks ORDER BY id"))?;
                let rows = stmt.query_map([], chunk_from_row)?;
                Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
            })
            .await
    }

    pub async fn find_by_file_id(&self, file_id: i64) -> Result<Vec<Chunk>> {
        self.store
            .query(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {CHUNK_COLUMNS} FROM chunks WHERE file_id = ? ORDER BY start_line"
                ))?;
                let rows = stmt.query_map(params![file_id], chunk_from_row)?;
                Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
            })
            .await
    }

    pub async fn delete_by_file_id(&self, file_id: i64) -> Result<usize> {
        self.store
            .transaction(move |conn| {
                Ok(conn.execute("DELETE FROM chunks WHERE file_id = ?", params![file_id])?)
            })
            .await
    }

    pub async fn delete_by_id(&self, id: i64) -> Result<bool> {
        self.store
            .transaction(move |conn| {
                Ok(conn.execute("DELETE FROM chunks WHERE id = ?", params![id])? > 0)
            })
            .await
    }

    /// Filtered query with `total_count` computed before pagination.
    ///
    /// Results are ordered by full-text relevance when `search_text` is set,
    /// otherwise by `(file_id, start_line)`.
    pub async fn query(&self, query: ChunkQuery) -> Result<ChunkPage> {
        self.store
            .query(move |conn| {
                let (join, where_clause, args) = build_filter(&query);

                let count_sql =
                    format!("SELECT COUNT(*) FROM chunks c {join} {where_clause}");
                let total_count: i64 = conn.query_row(
                    &count_sql,
                    rusqlite::params_from_iter(args.clone()),
                    |row| row.get(0),
                )?;

                let order = if query.search_text.is_some() {
                    "ORDER BY chunks_fts.rank"
                } else {
                    "ORDER BY c.file_id, c.start_line"
                };
                let columns = qualified_columns();
                let page_sql = format!(
                    "SELECT {columns} FROM chunks c {join} {where_clause} {order} LIMIT ? OFFSET ?"
                );
                let mut page_args = args;
                page_args.push(Value::Integer(query.limit as i64));
                page_args.push(Value::Integer(query.offset as i64));

                let mut stmt = conn.prepare(&page_sql)?;
                let rows = stmt.query_map(rusqlite::params_from_iter(page_args), chunk_from_row)?;
                let chunks = rows.collect::<std::result::Result<Vec<_>, _>>()?;

                Ok(ChunkPage {
                    chunks,
                    total_count: total_count as u64,
                })
            })
            .await
    }

    /// Store-wide statistics.
    pub async fn get_statistics(&self, oversized_threshold: u32) -> Result<ChunkStatistics> {
        self.store
            .query(move |conn| {
                let mut stats = ChunkStatistics {
                    total_chunks: conn.query_row("SELECT COUNT(*) FROM chunks", [], |r| {
                        r.get::<_, i64>(0)
                    })? as u64,
                    ..Default::default()
                };

                let mut stmt =
                    conn.prepare("SELECT language, COUNT(*) FROM chunks GROUP BY language")?;
                let rows = stmt.query_map([], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
                })?;
                for row in rows {
                    let (language, count) = row?;
                    stats.by_language.insert(language, count as u64);
                }

                let mut stmt = conn.prepare("SELECT kind, COUNT(*) FROM chunks GROUP BY kind")?;
                let rows = stmt.query_map([], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
                })?;
                for row in rows {
                    let (kind, count) = row?;
                    stats.by_kind.insert(kind, count as u64);
                }

                stats.average_chunk_chars = conn
                    .query_row("SELECT AVG(char_count) FROM chunks", [], |row| {
                        row.get::<_, Option<f64>>(0)
                    })?
                    .unwrap_or(0.0);

                stats.oversized_count = conn.query_row(
                    "SELECT COUNT(*) FROM chunks WHERE line_count > ?",
                    params![oversized_threshold],
                    |row| row.get::<_, i64>(0),
                )? as u64;

                stats.last_updated = conn
                    .query_row("SELECT MAX(updated_at) FROM chunks", [], |row| {
                        row.get::<_, Option<i64>>(0)
                    })?;

                Ok(stats)
            })
            .await
    }
}

fn qualified_columns() -> String {
    CHUNK_COLUMNS
        .split(", ")
        .map(|c| format!("c.{}", c.trim()))
        .collect::<Vec<_>>()
        .join(", ")
}

fn build_filter(query: &ChunkQuery) -> (String, String, Vec<Value>) {
    let mut clauses: Vec<String> = Vec::new();
    let mut args: Vec<Value> = Vec::new();
    let mut join = String::new();

    if let Some(text) = &query.search_text {
        join = "JOIN chunks_fts ON chunks_fts.rowid = c.id".to_string();
        clauses.push("chunks_fts MATCH ?".to_string());
        args.push(Value::Text(fts_match_expr(text)));
    }
    if !query.kinds.is_empty() {
        let placeholders = vec!["?"; query.kinds.len()].join(",");
        clauses.push(format!("c.kind IN ({placeholders})"));
        args.extend(
            query
                .kinds
                .iter()
                .map(|k| Value::Text(k.as_str().to_string())),
        );
    }
    if !query.languages.is_empty() {
        let placeholders = vec!["?"; query.languages.len()].join(",");
        clauses.push(format!("c.language IN ({placeholders})"));
        args.extend(query.languages.iter().cloned().map(Value::Text));
    }
    if let Some(file_id) = query.file_id {
        clauses.push("c.file_id = ?".to_string());
        args.push(Value::Integer(file_id));
    }
    if let Some(min) = query.min_line_count {
        clauses.push("c.line_count >= ?".to_string());
        args.push(Value::Integer(min as i64));
    }
    if let Some(max) = query.max_line_count {
        clauses.push("c.line_count <= ?".to_string());
        args.push(Value::Integer(max as i64));
    }

    let where_clause = if clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", clauses.join(" AND "))
    };
    (join, where_clause, args)
}

/// Quote query tokens so FTS5 operators in user text cannot break the
/// MATCH expression.
pub fn fts_match_expr(text: &str) -> String {
    text.split_whitespace()
        .map(|token| format!("\"{}\"", token.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(" ")
}

fn upsert_chunk(conn: &Connection, chunk: &Chunk) -> Result<Chunk> {
    let inheritance = serde_json::to_string(&chunk.context.class_inheritance)
        .map_err(|e| IndexErr::SqliteOp {
            operation: "serialize inheritance".to_string(),
            cause: e.to_string(),
        })?;
    let now = chrono::Utc::now().timestamp();

    let (id, created_at, updated_at) = conn.query_row(
        "INSERT INTO chunks (
            chunk_hash, file_id, kind, name, content, normalized_content,
            start_line, end_line, start_byte, end_byte, language, class_name,
            class_inheritance, module_path, namespace, method_signature,
            is_top_level, parent_chunk_hash, documentation, signature,
            line_count, char_count, created_at, updated_at
        ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19,?20,?21,?22,?23,?23)
        ON CONFLICT(chunk_hash) DO UPDATE SET
            file_id = excluded.file_id,
            kind = excluded.kind,
            name = excluded.name,
            content = excluded.content,
            normalized_content = excluded.normalized_content,
            start_line = excluded.start_line,
            end_line = excluded.end_line,
            start_byte = excluded.start_byte,
            end_byte = excluded.end_byte,
            language = excluded.language,
            class_name = excluded.class_name,
            class_inheritance = excluded.class_inheritance,
            module_path = excluded.module_path,
            namespace = excluded.namespace,
            method_signature = excluded.method_signature,
            is_top_level = excluded.is_top_level,
            parent_chunk_hash = excluded.parent_chunk_hash,
            documentation = excluded.documentation,
            signature = excluded.signature,
            line_count = excluded.line_count,
            char_count = excluded.char_count,
            updated_at = excluded.updated_at
        RETURNING id, created_at, updated_at",
        params![
            chunk.chunk_hash,
            chunk.file_id,
            chunk.kind.as_str(),
            chunk.name,
            chunk.content,
            chunk.normalized_content,
            chunk.start_line,
            chunk.end_line,
            chunk.start_byte,
            chunk.end_byte,
            chunk.language,
            chunk.context.class_name,
            inheritance,
            chunk.context.module_path,
            chunk.context.namespace,
            chunk.context.method_signature,
            chunk.context.is_top_level,
            chunk.context.parent_chunk_hash,
            chunk.documentation,
            chunk.signature,
            chunk.line_count,
            chunk.char_count,
            now,
        ],
        |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, i64>(2)?,
            ))
        },
    )?;

    let mut stored = chunk.clone();
    stored.id = id;
    stored.created_at = created_at;
    stored.updated_at = updated_at;
    Ok(stored)
}

fn chunk_from_row(row: &Row<'_>) -> rusqlite::Result<Chunk> {
    let inheritance_json: String = row.get(13)?;
    let class_inheritance: Vec<String> =
        serde_json::from_str(&inheritance_json).unwrap_or_default();
    let kind_str: String = row.get(3)?;

    Ok(Chunk {
        id: row.get(0)?,
        chunk_hash: row.get(1)?,
        file_id: row.get(2)?,
        kind: ChunkKind::parse(&kind_str).unwrap_or(ChunkKind::Function),
        name: row.get(4)?,
        content: row.get(5)?,
        normalized_content: row.get(6)?,
        start_line: row.get(7)?,
        end_line: row.get(8)?,
        start_byte: row.get(9)?,
        end_byte: row.get(10)?,
        language: row.get(11)?,
        context: ChunkContext {
            class_name: row.get(12)?,
            class_inheritance,
            module_path: row.get(14)?,
            namespace: row.get(15)?,
            method_signature: row.get(16)?,
            is_top_level: row.get(17)?,
            parent_chunk_hash: row.get(18)?,
        },
        documentation: row.get(19)?,
        signature: row.get(20)?,
        line_count: row.get(21)?,
        char_count: row.get(22)?,
        created_at: row.get(23)?,
        updated_at: row.get(24)?,
    })
}
