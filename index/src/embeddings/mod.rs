//! Embedding adapter layer: the unified embedder contract, factory
//! registry, fallback chain, re-embed tracking, and the byte-level vector
//! cache.

pub mod cache;
pub mod fallback;
pub mod hash;
pub mod profile;
pub mod registry;
pub mod remote;
pub mod tracker;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;

pub use cache::CacheStatistics;
pub use cache::VectorCache;
pub use fallback::FallbackAction;
pub use fallback::FallbackChain;
pub use hash::HashEmbedder;
pub use profile::AdapterProfile;
pub use registry::EmbedderFactory;
pub use registry::EmbedderRegistry;
pub use remote::RemoteEmbedder;
pub use tracker::ReembedTracker;

/// What an embedder can do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmbedderCapabilities {
    pub batching: bool,
    pub requires_network: bool,
    pub concurrent: bool,
    /// `None` means unbounded.
    pub max_batch_size: Option<u32>,
}

/// Timing and throughput for one embed call.
#[derive(Debug, Clone, Default)]
pub struct EmbedStats {
    pub total_texts: u32,
    pub duration_ms: u64,
    pub tokens_processed: u64,
    /// Texts per second.
    pub throughput: f64,
}

/// Per-item metadata returned alongside vectors.
#[derive(Debug, Clone)]
pub struct EmbedItemMeta {
    pub index: usize,
    pub chars: usize,
    pub from_cache: bool,
}

/// Result of one embed call; `vectors[i]` corresponds to `texts[i]`.
#[derive(Debug, Clone, Default)]
pub struct EmbedResult {
    pub vectors: Vec<Vec<f32>>,
    pub per_item: Vec<EmbedItemMeta>,
    pub stats: EmbedStats,
}

impl Default for EmbedItemMeta {
    fn default() -> Self {
        Self {
            index: 0,
            chars: 0,
            from_cache: false,
        }
    }
}

/// Progress callback: `(processed, total, rate_per_sec, eta_ms)`.
pub type ProgressCallback = Arc<dyn Fn(u32, u32, f64, u64) + Send + Sync>;

/// Options for one embed call.
#[derive(Clone, Default)]
pub struct EmbedOptions {
    pub batch_size: Option<u32>,
    pub timeout_ms: Option<u64>,
    pub progress: Option<ProgressCallback>,
}

impl std::fmt::Debug for EmbedOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbedOptions")
            .field("batch_size", &self.batch_size)
            .field("timeout_ms", &self.timeout_ms)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

/// Adapter health probe result.
#[derive(Debug, Clone, Default)]
pub struct HealthStatus {
    pub available: bool,
    pub latency_ms: Option<u64>,
    pub message: Option<String>,
}

/// Unified embedder contract.
///
/// Implementations are pluggable local or remote backends; failures carry
/// an [`crate::error::EmbeddingErrorCode`] so the fallback chain can pick a
/// degradation action.
#[async_trait]
pub trait Embedder: Send + Sync + std::fmt::Debug {
    fn id(&self) -> &str;
    fn name(&self) -> &str;
    fn dimensions(&self) -> u32;
    fn version(&self) -> &str;
    fn capabilities(&self) -> EmbedderCapabilities;

    async fn initialize(&self) -> Result<()>;
    async fn embed(&self, texts: &[String], options: &EmbedOptions) -> Result<EmbedResult>;
    async fn dispose(&self) -> Result<()>;
    async fn health_check(&self) -> Result<HealthStatus>;
}

/// Cache/DB identity of an embedding model: `(id, version, dimensions)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModelKey {
    pub model_id: String,
    pub model_version: String,
    pub dimensions: u32,
}

impl ModelKey {
    pub fn of(embedder: &dyn Embedder) -> Self {
        Self {
            model_id: embedder.id().to_string(),
            model_version: embedder.version().to_string(),
            dimensions: embedder.dimensions(),
        }
    }
}

/// Validate a model id: rejects path traversal and enforces the
/// `org/name` or bare-name shape used by model hubs.
pub fn validate_model_id(model_id: &str) -> Result<()> {
    use crate::error::IndexErr;

    if model_id.is_empty() {
        return Err(IndexErr::InvalidModelId {
            model_id: model_id.to_string(),
            cause: "empty".to_string(),
        });
    }
    if model_id.contains("..") || model_id.starts_with('/') || model_id.contains('\\') {
        return Err(IndexErr::InvalidModelId {
            model_id: model_id.to_string(),
            cause: "path traversal".to_string(),
        });
    }
    let segments: Vec<&str> = model_id.split('/').collect();
    if segments.len() > 2 || segments.iter().any(|s| s.is_empty()) {
        return Err(IndexErr::InvalidModelId {
            model_id: model_id.to_string(),
            cause: "expected `name` or `org/name`".to_string(),
        });
    }
    let valid_char =
        |c: char| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':');
    if !segments.iter().all(|s| s.chars().all(valid_char)) {
        return Err(IndexErr::InvalidModelId {
            model_id: model_id.to_string(),
            cause: "invalid characters".to_string(),
        });
    }
    Ok(())
}

/// L2-normalize a dense vector in place; zero vectors are left untouched.
pub fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
}
