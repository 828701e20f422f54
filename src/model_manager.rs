use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use candle_core::Device;
use pylate_rs::ColBERT;

use crate::{
    error::{Error, Result},
    provider::{EMBEDDING, EmbeddingProvider},
};

pub const DEFAULT_MODEL_ID: &str = "lightonai/GTE-ModernColBERT-v1";
pub const MODEL_ENV_VAR: &str = "HOPNOTES_MODEL";

/// Select the best available compute device.
///
/// Uses CUDA when compiled with the `cuda` feature, Metal when compiled with
/// the `metal` feature, and falls back to CPU otherwise.
fn default_device() -> Device {
    #[cfg(feature = "cuda")]
    {
        if let Ok(device) = Device::new_cuda(0) {
            return device;
        }
    }

    #[cfg(feature = "metal")]
    {
        if let Ok(device) = Device::new_metal(0) {
            return device;
        }
    }

    Device::Cpu
}

/// Resolve the model id: explicit flag, then `HOPNOTES_MODEL`, then the
/// stored setting, then the default.
pub fn resolve_model_id(
    explicit: Option<&str>,
    stored: Option<String>,
) -> String {
    explicit
        .map(str::to_string)
        .or_else(|| std::env::var(MODEL_ENV_VAR).ok())
        .or(stored)
        .unwrap_or_else(|| DEFAULT_MODEL_ID.to_string())
}

/// Owns a ColBERT model, loaded lazily on first use.
///
/// ColBERT produces one vector per token; each text is reduced to a single
/// vector by averaging its token embeddings.
pub struct ModelManager {
    model: Option<ColBERT>,
    model_id: String,
}

impl ModelManager {
    pub fn with_model_id(model_id: String) -> Self {
        Self {
            model: None,
            model_id,
        }
    }

    /// Returns the model ID that will be (or has been) loaded.
    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    /// Returns `true` if the model has already been loaded into memory.
    pub fn is_loaded(&self) -> bool {
        self.model.is_some()
    }

    /// Ensures the model is loaded, downloading from HuggingFace Hub if needed.
    fn ensure_loaded(&mut self) -> Result<&mut ColBERT> {
        let model = match self.model.take() {
            Some(model) => model,
            None => {
                tracing::info!(model = %self.model_id, "loading embedding model");
                ColBERT::from(&self.model_id)
                    .with_device(default_device())
                    .try_into()
                    .map_err(|e| Error::provider(EMBEDDING, e))?
            }
        };
        Ok(self.model.insert(model))
    }

    /// Encode each text and mean-pool its token embeddings.
    pub fn encode_pooled(&mut self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let model = self.ensure_loaded()?;
        let mut pooled = Vec::with_capacity(texts.len());
        for text in texts {
            // [1, tokens, D] -> [tokens, D] -> [D]
            let vector = model
                .encode(std::slice::from_ref(text), false)
                .map_err(|e| Error::provider(EMBEDDING, e))?
                .squeeze(0)
                .and_then(|t| t.mean(0))
                .and_then(|t| t.to_vec1::<f32>())
                .map_err(|e| Error::provider(EMBEDDING, e))?;
            pooled.push(vector);
        }
        Ok(pooled)
    }
}

impl std::fmt::Debug for ModelManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelManager")
            .field("model_id", &self.model_id)
            .field("loaded", &self.is_loaded())
            .finish()
    }
}

/// [`EmbeddingProvider`] backed by an on-device [`ModelManager`].
///
/// Inference runs on tokio's blocking pool, one batch at a time.
#[derive(Debug, Clone)]
pub struct LocalEmbedder {
    manager: Arc<Mutex<ModelManager>>,
}

impl LocalEmbedder {
    pub fn new(model_id: String) -> Self {
        Self {
            manager: Arc::new(Mutex::new(ModelManager::with_model_id(model_id))),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for LocalEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let manager = Arc::clone(&self.manager);
        let texts = texts.to_vec();
        tokio::task::spawn_blocking(move || {
            let mut manager = manager
                .lock()
                .map_err(|_| Error::provider(EMBEDDING, "model lock poisoned"))?;
            manager.encode_pooled(&texts)
        })
        .await
        .map_err(|e| Error::provider(EMBEDDING, e))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn custom_model_id() {
        let manager = ModelManager::with_model_id("custom/model".to_string());
        assert_eq!(manager.model_id(), "custom/model");
        assert!(!manager.is_loaded());
    }

    #[test]
    fn explicit_model_wins() {
        let id = resolve_model_id(Some("flag/model"), Some("stored/model".into()));
        assert_eq!(id, "flag/model");
    }

    #[test]
    fn embedder_does_not_load_eagerly() {
        let embedder = LocalEmbedder::new(DEFAULT_MODEL_ID.to_string());
        let manager = embedder.manager.lock().unwrap();
        assert!(!manager.is_loaded());
        assert_eq!(manager.model_id(), DEFAULT_MODEL_ID);
    }
}
