//! Remote HTTP embedder.
//!
//! Speaks the common `{"model": ..., "input": [...]}` embeddings shape
//! used by hosted providers. Failures map onto the adapter error codes so
//! the fallback chain can classify them.

use std::time::Duration;
use std::time::Instant;

use async_trait::async_trait;
use serde::Deserialize;
use serde::Serialize;

use crate::embeddings::EmbedItemMeta;
use crate::embeddings::EmbedOptions;
use crate::embeddings::EmbedResult;
use crate::embeddings::EmbedStats;
use crate::embeddings::Embedder;
use crate::embeddings::EmbedderCapabilities;
use crate::embeddings::HealthStatus;
use crate::embeddings::l2_normalize;
use crate::embeddings::validate_model_id;
use crate::error::EmbeddingErrorCode;
use crate::error::IndexErr;
use crate::error::Result;

/// Default request timeout.
const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Default upstream batch cap.
const DEFAULT_MAX_BATCH: u32 = 128;

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    data: Vec<EmbedDatum>,
}

#[derive(Debug, Deserialize)]
struct EmbedDatum {
    embedding: Vec<f32>,
}

/// HTTP embedder against a hosted endpoint.
#[derive(Debug)]
pub struct RemoteEmbedder {
    id: String,
    model: String,
    endpoint: String,
    api_key: Option<String>,
    dimensions: u32,
    client: reqwest::Client,
}

impl RemoteEmbedder {
    pub fn new(
        id: &str,
        model: &str,
        endpoint: &str,
        api_key: Option<String>,
        dimensions: u32,
    ) -> Result<Self> {
        validate_model_id(model)?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(DEFAULT_TIMEOUT_MS))
            .build()
            .map_err(|e| IndexErr::Embedding {
                adapter: id.to_string(),
                code: EmbeddingErrorCode::InitFailed,
                message: format!("http client: {e}"),
            })?;
        Ok(Self {
            id: id.to_string(),
            model: model.to_string(),
            endpoint: endpoint.to_string(),
            api_key,
            dimensions,
            client,
        })
    }

    fn error(&self, code: EmbeddingErrorCode, message: impl Into<String>) -> IndexErr {
        IndexErr::Embedding {
            adapter: self.id.clone(),
            code,
            message: message.into(),
        }
    }

    async fn embed_batch(&self, batch: &[String], timeout_ms: u64) -> Result<Vec<Vec<f32>>> {
        let request = EmbedRequest {
            model: &self.model,
            input: batch,
        };
        let mut builder = self
            .client
            .post(&self.endpoint)
            .timeout(Duration::from_millis(timeout_ms))
            .json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                self.error(EmbeddingErrorCode::Timeout, e.to_string())
            } else {
                self.error(EmbeddingErrorCode::NetworkError, e.to_string())
            }
        })?;

        let status = response.status();
        if status.as_u16() == 429 {
            let retry_after_ms = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(|secs| secs * 1000);
            return Err(self.error(
                EmbeddingErrorCode::RateLimit,
                match retry_after_ms {
                    Some(ms) => format!("rate limited, retry after {ms} ms"),
                    None => "rate limited".to_string(),
                },
            ));
        }
        if !status.is_success() {
            let code = if status.is_client_error() {
                EmbeddingErrorCode::ValidationError
            } else {
                EmbeddingErrorCode::NetworkError
            };
            let body = response.text().await.unwrap_or_default();
            return Err(self.error(code, format!("status {status}: {body}")));
        }

        let parsed: EmbedResponse = response
            .json()
            .await
            .map_err(|e| self.error(EmbeddingErrorCode::ValidationError, e.to_string()))?;
        if parsed.data.len() != batch.len() {
            return Err(self.error(
                EmbeddingErrorCode::ValidationError,
                format!("expected {} vectors, got {}", batch.len(), parsed.data.len()),
            ));
        }

        let mut vectors = Vec::with_capacity(parsed.data.len());
        for datum in parsed.data {
            if datum.embedding.len() != self.dimensions as usize {
                return Err(self.error(
                    EmbeddingErrorCode::ValidationError,
                    format!(
                        "dimension mismatch: expected {}, got {}",
                        self.dimensions,
                        datum.embedding.len()
                    ),
                ));
            }
            let mut vector = datum.embedding;
            l2_normalize(&mut vector);
            vectors.push(vector);
        }
        Ok(vectors)
    }
}

#[async_trait]
impl Embedder for RemoteEmbedder {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> u32 {
        self.dimensions
    }

    fn version(&self) -> &str {
        "remote"
    }

    fn capabilities(&self) -> EmbedderCapabilities {
        EmbedderCapabilities {
            batching: true,
            requires_network: true,
            concurrent: true,
            max_batch_size: Some(DEFAULT_MAX_BATCH),
        }
    }

    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    async fn embed(&self, texts: &[String], options: &EmbedOptions) -> Result<EmbedResult> {
        let started = Instant::now();
        let total = texts.len() as u32;
        let batch_size = options
            .batch_size
            .unwrap_or(DEFAULT_MAX_BATCH)
            .clamp(1, DEFAULT_MAX_BATCH) as usize;
        let timeout_ms = options.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS);

        let mut vectors = Vec::with_capacity(texts.len());
        let mut per_item = Vec::with_capacity(texts.len());
        let mut processed = 0u32;

        for batch in texts.chunks(batch_size) {
            let batch_vectors = self.embed_batch(batch, timeout_ms).await?;
            for (offset, vector) in batch_vectors.into_iter().enumerate() {
                let index = vectors.len();
                per_item.push(EmbedItemMeta {
                    index,
                    chars: batch[offset].chars().count(),
                    from_cache: false,
                });
                vectors.push(vector);
            }
            processed += batch.len() as u32;
            if let Some(progress) = &options.progress {
                let elapsed = started.elapsed().as_secs_f64().max(1e-9);
                let rate = processed as f64 / elapsed;
                let remaining = (total - processed) as f64;
                progress(processed, total, rate, (remaining / rate * 1000.0) as u64);
            }
        }

        let tokens_processed: u64 = texts
            .iter()
            .map(|t| t.split_whitespace().count() as u64)
            .sum();
        Ok(EmbedResult {
            vectors,
            per_item,
            stats: EmbedStats {
                total_texts: total,
                duration_ms: started.elapsed().as_millis() as u64,
                tokens_processed,
                throughput: total as f64 / started.elapsed().as_secs_f64().max(1e-9),
            },
        })
    }

    async fn dispose(&self) -> Result<()> {
        Ok(())
    }

    async fn health_check(&self) -> Result<HealthStatus> {
        let started = Instant::now();
        let probe = self
            .embed_batch(&["health".to_string()], 5_000)
            .await;
        Ok(match probe {
            Ok(_) => HealthStatus {
                available: true,
                latency_ms: Some(started.elapsed().as_millis() as u64),
                message: None,
            },
            Err(e) => HealthStatus {
                available: false,
                latency_ms: None,
                message: Some(e.to_string()),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_invalid_model_id() {
        let err = RemoteEmbedder::new("r", "../evil", "http://localhost:1", None, 8).unwrap_err();
        assert!(matches!(err, IndexErr::InvalidModelId { .. }));
    }

    #[tokio::test]
    async fn test_network_error_is_retryable() {
        // Nothing listens on this port; the call must fail with a network
        // or timeout code, both retryable.
        let embedder =
            RemoteEmbedder::new("r", "test-model", "http://127.0.0.1:1/v1/embeddings", None, 8)
                .unwrap();
        let err = embedder
            .embed(&["x".to_string()], &EmbedOptions::default())
            .await
            .unwrap_err();
        assert!(err.retryable());
    }
}
