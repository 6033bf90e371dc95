//! Hybrid vector index: row-aligned sparse and dense vectors.
//!
//! Sparse rows live in CSR form, dense rows packed row-major; `ids[i]`
//! names the chunk behind row `i`. A snapshot persists as four files that
//! save and load atomically; rebuilds swap the in-memory snapshot after
//! the new files are fsynced.

use std::io::Write;
use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;

use crate::embeddings::EmbedOptions;
use crate::embeddings::Embedder;
use crate::error::IndexErr;
use crate::error::Result;
use crate::sparse::CsrMatrix;
use crate::sparse::NUM_FEATURES;
use crate::sparse::SparseVector;
use crate::sparse::vectorize_text;

/// Snapshot file names under `.codeindex/vectors/`.
pub const SPARSE_FILE: &str = "sparse.csr";
pub const DENSE_FILE: &str = "dense.f32";
pub const IDS_FILE: &str = "ids.json";
pub const META_FILE: &str = "meta.json";

/// Default dense/sparse mix.
pub const DEFAULT_DENSE_WEIGHT: f32 = 0.6;
pub const DEFAULT_SPARSE_WEIGHT: f32 = 0.4;

/// Snapshot metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HybridMeta {
    /// Dense embedding dimension.
    pub dim: u32,
    /// Sparse feature count, fixed at 2^18.
    pub num_features: u32,
    pub num_items: u32,
    /// Unix seconds of the last rebuild.
    pub updated_at: i64,
}

/// One search hit with its component scores.
#[derive(Debug, Clone, PartialEq)]
pub struct HybridHit {
    pub id: i64,
    pub score: f32,
    pub dense_score: f32,
    pub sparse_score: f32,
}

/// Search options.
#[derive(Debug, Clone, Copy)]
pub struct HybridSearchOptions {
    pub limit: usize,
    pub dense_weight: f32,
    pub sparse_weight: f32,
}

impl Default for HybridSearchOptions {
    fn default() -> Self {
        Self {
            limit: 20,
            dense_weight: DEFAULT_DENSE_WEIGHT,
            sparse_weight: DEFAULT_SPARSE_WEIGHT,
        }
    }
}

/// In-memory hybrid index snapshot.
#[derive(Debug, Clone, Default)]
pub struct HybridIndex {
    ids: Vec<i64>,
    sparse: CsrMatrix,
    /// Row-major, `num_items × dim`.
    dense: Vec<f32>,
    dim: u32,
    updated_at: i64,
}

impl HybridIndex {
    /// Build a snapshot from aligned rows.
    ///
    /// Every dense row must have length `dim`; sparse and dense row counts
    /// must match `ids`.
    pub fn build(ids: Vec<i64>, sparse_rows: &[SparseVector], dense_rows: &[Vec<f32>], dim: u32) -> Result<Self> {
        if sparse_rows.len() != ids.len() || dense_rows.len() != ids.len() {
            return Err(IndexErr::Validation {
                rule: "hybrid.alignment".to_string(),
                cause: format!(
                    "ids {} / sparse {} / dense {} rows must align",
                    ids.len(),
                    sparse_rows.len(),
                    dense_rows.len()
                ),
            });
        }
        let mut dense = Vec::with_capacity(ids.len() * dim as usize);
        for row in dense_rows {
            if row.len() != dim as usize {
                return Err(IndexErr::Validation {
                    rule: "hybrid.dimension".to_string(),
                    cause: format!("dense row of {} values, expected {dim}", row.len()),
                });
            }
            dense.extend_from_slice(row);
        }
        Ok(Self {
            ids,
            sparse: CsrMatrix::from_rows(sparse_rows),
            dense,
            dim,
            updated_at: chrono::Utc::now().timestamp(),
        })
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn meta(&self) -> HybridMeta {
        HybridMeta {
            dim: self.dim,
            num_features: NUM_FEATURES,
            num_items: self.ids.len() as u32,
            updated_at: self.updated_at,
        }
    }

    fn dense_row(&self, i: usize) -> &[f32] {
        let dim = self.dim as usize;
        &self.dense[i * dim..(i + 1) * dim]
    }

    /// Score every row against precomputed query vectors and return the
    /// top hits. Rows and queries are L2-normalized at write time, so the
    /// dense dot product is cosine similarity.
    pub fn search_vectors(
        &self,
        sparse_query: &SparseVector,
        dense_query: &[f32],
        options: &HybridSearchOptions,
    ) -> Vec<HybridHit> {
        let mut hits: Vec<HybridHit> = (0..self.ids.len())
            .map(|i| {
                let sparse_score = sparse_query.cosine(&self.sparse.row(i));
                let dense_score = if dense_query.len() == self.dim as usize {
                    dot(dense_query, self.dense_row(i))
                } else {
                    0.0
                };
                HybridHit {
                    id: self.ids[i],
                    score: options.dense_weight * dense_score
                        + options.sparse_weight * sparse_score,
                    dense_score,
                    sparse_score,
                }
            })
            .collect();

        hits.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.id.cmp(&b.id)));
        hits.truncate(options.limit);
        hits
    }

    /// Full hybrid search: sparse query from the vectorizer, dense query
    /// from the active embedder.
    pub async fn search(
        &self,
        query_text: &str,
        embedder: &dyn Embedder,
        options: &HybridSearchOptions,
    ) -> Result<Vec<HybridHit>> {
        let sparse_query = vectorize_text(query_text);
        let embedded = embedder
            .embed(&[query_text.to_string()], &EmbedOptions::default())
            .await?;
        let dense_query = embedded.vectors.into_iter().next().unwrap_or_default();
        Ok(self.search_vectors(&sparse_query, &dense_query, options))
    }

    /// Persist the snapshot atomically: each file is written to a
    /// temporary sibling, fsynced, then renamed into place.
    pub fn save(&self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir).map_err(|e| IndexErr::HybridIndex {
            path: dir.to_path_buf(),
            cause: format!("create dir: {e}"),
        })?;

        let dense_bytes: Vec<u8> = self.dense.iter().flat_map(|f| f.to_le_bytes()).collect();
        let ids_json = serde_json::to_vec(&self.ids).map_err(|e| IndexErr::HybridIndex {
            path: dir.join(IDS_FILE),
            cause: e.to_string(),
        })?;
        let meta_json = serde_json::to_vec_pretty(&self.meta()).map_err(|e| IndexErr::HybridIndex {
            path: dir.join(META_FILE),
            cause: e.to_string(),
        })?;

        write_atomic(&dir.join(SPARSE_FILE), &self.sparse.encode())?;
        write_atomic(&dir.join(DENSE_FILE), &dense_bytes)?;
        write_atomic(&dir.join(IDS_FILE), &ids_json)?;
        write_atomic(&dir.join(META_FILE), &meta_json)?;
        Ok(())
    }

    /// Load a snapshot saved by [`HybridIndex::save`].
    pub fn load(dir: &Path) -> Result<Self> {
        let read = |name: &str| -> Result<Vec<u8>> {
            std::fs::read(dir.join(name)).map_err(|e| IndexErr::HybridIndex {
                path: dir.join(name),
                cause: e.to_string(),
            })
        };

        let meta: HybridMeta =
            serde_json::from_slice(&read(META_FILE)?).map_err(|e| IndexErr::HybridIndex {
                path: dir.join(META_FILE),
                cause: format!("meta parse: {e}"),
            })?;
        let ids: Vec<i64> =
            serde_json::from_slice(&read(IDS_FILE)?).map_err(|e| IndexErr::HybridIndex {
                path: dir.join(IDS_FILE),
                cause: format!("ids parse: {e}"),
            })?;
        let sparse = CsrMatrix::decode(&read(SPARSE_FILE)?)?;

        let dense_bytes = read(DENSE_FILE)?;
        if dense_bytes.len() % 4 != 0 {
            return Err(IndexErr::HybridIndex {
                path: dir.join(DENSE_FILE),
                cause: "dense file length not a multiple of 4".to_string(),
            });
        }
        let dense: Vec<f32> = dense_bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();

        let expected_dense = meta.num_items as usize * meta.dim as usize;
        if dense.len() != expected_dense || ids.len() != meta.num_items as usize {
            return Err(IndexErr::HybridIndex {
                path: dir.to_path_buf(),
                cause: format!(
                    "snapshot misaligned: {} ids, {} dense values, meta {}x{}",
                    ids.len(),
                    dense.len(),
                    meta.num_items,
                    meta.dim
                ),
            });
        }

        Ok(Self {
            ids,
            sparse,
            dense,
            dim: meta.dim,
            updated_at: meta.updated_at,
        })
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn write_atomic(path: &PathBuf, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    let io_err = |e: std::io::Error| IndexErr::HybridIndex {
        path: path.clone(),
        cause: e.to_string(),
    };

    let mut file = std::fs::File::create(&tmp).map_err(io_err)?;
    file.write_all(bytes).map_err(io_err)?;
    file.sync_all().map_err(io_err)?;
    std::fs::rename(&tmp, path).map_err(io_err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::HashEmbedder;
    use tempfile::TempDir;

    async fn sample_index(embedder: &HashEmbedder) -> HybridIndex {
        let texts: Vec<String> = [
            "function parseConfig(file) load json settings",
            "function renderWidget(tree) draw pixels",
            "class ConfigLoader reads configuration files",
        ]
        .iter()
        .map(|t| t.to_string())
        .collect();
        let sparse: Vec<SparseVector> = texts.iter().map(|t| vectorize_text(t)).collect();
        let dense = embedder
            .embed(&texts, &EmbedOptions::default())
            .await
            .unwrap()
            .vectors;
        HybridIndex::build(vec![10, 20, 30], &sparse, &dense, embedder.dimensions()).unwrap()
    }

    #[tokio::test]
    async fn test_search_ranks_relevant_first() {
        let embedder = HashEmbedder::default_local();
        let index = sample_index(&embedder).await;

        let hits = index
            .search("parse config settings", &embedder, &HybridSearchOptions::default())
            .await
            .unwrap();
        assert_eq!(hits.len(), 3);
        assert!(
            hits[0].id == 10 || hits[0].id == 30,
            "config-related rows outrank rendering, got {}",
            hits[0].id
        );
        // Sub-scores are populated.
        assert!(hits[0].sparse_score > 0.0);
    }

    #[test]
    fn test_alignment_validation() {
        let err = HybridIndex::build(vec![1, 2], &[SparseVector::default()], &[vec![0.0]], 1)
            .unwrap_err();
        assert!(matches!(err, IndexErr::Validation { .. }));

        let err =
            HybridIndex::build(vec![1], &[SparseVector::default()], &[vec![0.0, 0.0]], 1)
                .unwrap_err();
        assert!(matches!(err, IndexErr::Validation { .. }));
    }

    #[tokio::test]
    async fn test_save_load_round_trip() {
        let embedder = HashEmbedder::default_local();
        let index = sample_index(&embedder).await;
        let dir = TempDir::new().unwrap();

        index.save(dir.path()).unwrap();
        for name in [SPARSE_FILE, DENSE_FILE, IDS_FILE, META_FILE] {
            assert!(dir.path().join(name).exists(), "{name} written");
        }

        let loaded = HybridIndex::load(dir.path()).unwrap();
        assert_eq!(loaded.ids, index.ids);
        assert_eq!(loaded.dense, index.dense);
        assert_eq!(loaded.sparse, index.sparse);
        assert_eq!(loaded.meta().dim, index.meta().dim);
        assert_eq!(loaded.meta().num_features, NUM_FEATURES);
    }

    #[tokio::test]
    async fn test_load_rejects_misaligned_snapshot() {
        let embedder = HashEmbedder::default_local();
        let index = sample_index(&embedder).await;
        let dir = TempDir::new().unwrap();
        index.save(dir.path()).unwrap();

        // Corrupt the ids file: one id too few.
        std::fs::write(dir.path().join(IDS_FILE), b"[10,20]").unwrap();
        assert!(HybridIndex::load(dir.path()).is_err());
    }

    #[test]
    fn test_empty_index_searches_empty() {
        let index = HybridIndex::default();
        let hits = index.search_vectors(
            &vectorize_text("anything"),
            &[],
            &HybridSearchOptions::default(),
        );
        assert!(hits.is_empty());
    }
}
