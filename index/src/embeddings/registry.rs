//! Embedder factory registry.
//!
//! Factories validate configuration and create embedder instances; the
//! registry caches instances per `(factory_id, instance_id)` and disposes
//! them when their factory is unregistered.

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use tokio::sync::Mutex;

use crate::embeddings::Embedder;
use crate::error::IndexErr;
use crate::error::Result;

/// Creates embedder instances from JSON configuration.
pub trait EmbedderFactory: Send + Sync {
    /// Stable factory identifier.
    fn id(&self) -> &str;

    /// Validate a configuration without instantiating.
    fn validate(&self, config: &serde_json::Value) -> Result<()>;

    /// Create an instance; `instance_id` distinguishes parallel configs of
    /// the same factory.
    fn create(
        &self,
        instance_id: &str,
        config: &serde_json::Value,
    ) -> Result<Arc<dyn Embedder>>;
}

/// Process-wide registry singleton.
static GLOBAL: Lazy<EmbedderRegistry> = Lazy::new(EmbedderRegistry::new);

/// Factory registry with per-instance caching.
pub struct EmbedderRegistry {
    factories: Mutex<HashMap<String, Arc<dyn EmbedderFactory>>>,
    instances: Mutex<HashMap<(String, String), Arc<dyn Embedder>>>,
}

impl Default for EmbedderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl EmbedderRegistry {
    /// Fresh registry for isolated use (tests, embedded callers).
    pub fn new() -> Self {
        Self {
            factories: Mutex::new(HashMap::new()),
            instances: Mutex::new(HashMap::new()),
        }
    }

    /// The process-wide registry.
    pub fn global() -> &'static EmbedderRegistry {
        &GLOBAL
    }

    pub async fn register(&self, factory: Arc<dyn EmbedderFactory>) {
        let id = factory.id().to_string();
        self.factories.lock().await.insert(id, factory);
    }

    /// Unregister a factory and dispose its cached instances.
    pub async fn unregister(&self, factory_id: &str) -> Result<()> {
        self.factories.lock().await.remove(factory_id);

        let mut instances = self.instances.lock().await;
        let doomed: Vec<(String, String)> = instances
            .keys()
            .filter(|(fid, _)| fid == factory_id)
            .cloned()
            .collect();
        for key in doomed {
            if let Some(embedder) = instances.remove(&key) {
                if let Err(e) = embedder.dispose().await {
                    tracing::warn!(
                        factory = %key.0,
                        instance = %key.1,
                        error = %e,
                        "embedder dispose failed during unregister"
                    );
                }
            }
        }
        Ok(())
    }

    pub async fn has_factory(&self, factory_id: &str) -> bool {
        self.factories.lock().await.contains_key(factory_id)
    }

    /// Get the cached instance or validate config, create, initialize, and
    /// cache a new one.
    pub async fn get_or_create(
        &self,
        factory_id: &str,
        instance_id: &str,
        config: &serde_json::Value,
    ) -> Result<Arc<dyn Embedder>> {
        let key = (factory_id.to_string(), instance_id.to_string());
        if let Some(existing) = self.instances.lock().await.get(&key) {
            return Ok(existing.clone());
        }

        let factory = self
            .factories
            .lock()
            .await
            .get(factory_id)
            .cloned()
            .ok_or_else(|| IndexErr::Validation {
                rule: "registry.factory".to_string(),
                cause: format!("unknown factory {factory_id:?}"),
            })?;

        factory.validate(config)?;
        let embedder = factory.create(instance_id, config)?;
        embedder.initialize().await?;

        self.instances.lock().await.insert(key, embedder.clone());
        Ok(embedder)
    }

    /// Dispose every cached instance and clear the registry.
    pub async fn dispose_all(&self) -> Result<()> {
        let mut instances = self.instances.lock().await;
        for ((factory, instance), embedder) in instances.drain() {
            if let Err(e) = embedder.dispose().await {
                tracing::warn!(%factory, %instance, error = %e, "embedder dispose failed");
            }
        }
        self.factories.lock().await.clear();
        Ok(())
    }

    pub async fn instance_count(&self) -> usize {
        self.instances.lock().await.len()
    }
}
