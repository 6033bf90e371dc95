//! Deterministic local embedder.
//!
//! Projects character n-gram features into a fixed-dimension dense space
//! by hashing. No model download, no network: this is the terminal entry
//! of the fallback model list and the default for fully offline indexes.

use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Instant;

use async_trait::async_trait;

use crate::embeddings::EmbedItemMeta;
use crate::embeddings::EmbedOptions;
use crate::embeddings::EmbedResult;
use crate::embeddings::EmbedStats;
use crate::embeddings::Embedder;
use crate::embeddings::EmbedderCapabilities;
use crate::embeddings::HealthStatus;
use crate::embeddings::l2_normalize;
use crate::error::Result;
use crate::sparse::fnv1a;

/// Default dimensionality of the hashing embedder.
pub const DEFAULT_DIMENSIONS: u32 = 256;

/// Hashing projection embedder.
#[derive(Debug)]
pub struct HashEmbedder {
    id: String,
    dimensions: u32,
    disposed: AtomicBool,
}

impl HashEmbedder {
    pub fn new(id: &str, dimensions: u32) -> Self {
        Self {
            id: id.to_string(),
            dimensions,
            disposed: AtomicBool::new(false),
        }
    }

    /// Default instance used when no adapter is configured.
    pub fn default_local() -> Self {
        Self::new("hash-local", DEFAULT_DIMENSIONS)
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions as usize];
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();
        for n in 3..=5usize {
            if chars.len() < n {
                break;
            }
            for window in chars.windows(n) {
                let gram: String = window.iter().collect();
                let hash = fnv1a(gram.as_bytes());
                let bucket = (hash % self.dimensions) as usize;
                // Sign from a second hash bit decorrelates buckets.
                let sign = if hash & 0x8000_0000 == 0 { 1.0 } else { -1.0 };
                vector[bucket] += sign;
            }
        }
        l2_normalize(&mut vector);
        vector
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        "hashing projection"
    }

    fn dimensions(&self) -> u32 {
        self.dimensions
    }

    fn version(&self) -> &str {
        "1"
    }

    fn capabilities(&self) -> EmbedderCapabilities {
        EmbedderCapabilities {
            batching: true,
            requires_network: false,
            concurrent: true,
            max_batch_size: None,
        }
    }

    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    async fn embed(&self, texts: &[String], options: &EmbedOptions) -> Result<EmbedResult> {
        let started = Instant::now();
        let total = texts.len() as u32;
        let mut vectors = Vec::with_capacity(texts.len());
        let mut per_item = Vec::with_capacity(texts.len());

        for (index, text) in texts.iter().enumerate() {
            vectors.push(self.embed_one(text));
            per_item.push(EmbedItemMeta {
                index,
                chars: text.chars().count(),
                from_cache: false,
            });
            if let Some(progress) = &options.progress {
                let processed = index as u32 + 1;
                let elapsed = started.elapsed().as_secs_f64().max(1e-9);
                let rate = processed as f64 / elapsed;
                let remaining = (total - processed) as f64;
                progress(processed, total, rate, (remaining / rate * 1000.0) as u64);
            }
        }

        let duration_ms = started.elapsed().as_millis() as u64;
        let tokens_processed: u64 = texts.iter().map(|t| t.split_whitespace().count() as u64).sum();
        Ok(EmbedResult {
            vectors,
            per_item,
            stats: EmbedStats {
                total_texts: total,
                duration_ms,
                tokens_processed,
                throughput: total as f64 / started.elapsed().as_secs_f64().max(1e-9),
            },
        })
    }

    async fn dispose(&self) -> Result<()> {
        self.disposed.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn health_check(&self) -> Result<HealthStatus> {
        Ok(HealthStatus {
            available: !self.disposed.load(Ordering::SeqCst),
            latency_ms: Some(0),
            message: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_embed_is_deterministic_and_normalized() {
        let embedder = HashEmbedder::default_local();
        let texts = vec!["function parse() {}".to_string()];
        let a = embedder.embed(&texts, &EmbedOptions::default()).await.unwrap();
        let b = embedder.embed(&texts, &EmbedOptions::default()).await.unwrap();

        assert_eq!(a.vectors, b.vectors);
        assert_eq!(a.vectors[0].len(), DEFAULT_DIMENSIONS as usize);
        let norm: f32 = a.vectors[0].iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_similar_text_scores_higher() {
        let embedder = HashEmbedder::default_local();
        let texts = vec![
            "read configuration file".to_string(),
            "read config file".to_string(),
            "zebra quantum waffle".to_string(),
        ];
        let result = embedder.embed(&texts, &EmbedOptions::default()).await.unwrap();
        let dot = |a: &[f32], b: &[f32]| -> f32 { a.iter().zip(b).map(|(x, y)| x * y).sum() };

        let near = dot(&result.vectors[0], &result.vectors[1]);
        let far = dot(&result.vectors[0], &result.vectors[2]);
        assert!(near > far);
    }

    #[tokio::test]
    async fn test_progress_callback_fires() {
        use std::sync::Arc;
        use std::sync::atomic::AtomicU32;

        let embedder = HashEmbedder::default_local();
        let count = Arc::new(AtomicU32::new(0));
        let seen = count.clone();
        let options = EmbedOptions {
            progress: Some(Arc::new(move |processed, total, _, _| {
                seen.store(processed, Ordering::SeqCst);
                assert!(processed <= total);
            })),
            ..Default::default()
        };
        let texts: Vec<String> = (0..3).map(|i| format!("text {i}")).collect();
        embedder.embed(&texts, &options).await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_health_check_after_dispose() {
        let embedder = HashEmbedder::default_local();
        assert!(embedder.health_check().await.unwrap().available);
        embedder.dispose().await.unwrap();
        assert!(!embedder.health_check().await.unwrap().available);
    }
}
