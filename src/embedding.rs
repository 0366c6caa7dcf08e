//! Local embedding generation via fastembed
//!
//! Uses the multilingual-e5-small model by default (384 dimensions, ~90MB).
//! Model artifacts auto-download on first use. The loaded model is not safe
//! for concurrent invocation, so all computation is serialized through a
//! single lock, regardless of which collection it is for.

use crate::config::MemoryConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use fastembed::{InitOptions, TextEmbedding};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// Text-to-vector capability consumed by the store.
///
/// Implement this trait to plug in a different embedding provider.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    /// Load the model identified by `model_code`, replacing any held
    /// instance. A no-op when that model is already loaded. Safe to call
    /// before any embedding request.
    async fn prepare(&self, model_code: &str) -> Result<()>;

    /// Embed a batch of texts: one vector per input, in input order.
    async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>>;

    /// Embed a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut embeddings = self.embed_batch(vec![text.to_string()]).await?;
        if embeddings.is_empty() {
            return Err(Error::Model("no embedding returned".into()));
        }
        Ok(embeddings.remove(0))
    }

    /// Artifact file name of the loaded model, if one is loaded.
    fn model_file(&self) -> Option<String>;

    /// Embedding dimensions of the loaded model, if one is loaded.
    fn dimensions(&self) -> Option<usize>;
}

struct LoadedModel {
    model: TextEmbedding,
    code: String,
    file: String,
    dim: usize,
}

/// Local embedding service wrapping fastembed
#[derive(Clone)]
pub struct EmbeddingService {
    inner: Arc<Mutex<Option<LoadedModel>>>,
    cache_dir: Option<PathBuf>,
    show_download_progress: bool,
}

impl EmbeddingService {
    /// Create an embedding service with no model loaded yet.
    pub fn new(config: &MemoryConfig) -> Self {
        EmbeddingService {
            inner: Arc::new(Mutex::new(None)),
            cache_dir: config.model_cache_dir.clone(),
            show_download_progress: config.show_download_progress,
        }
    }

    fn loaded_code(&self) -> Option<String> {
        self.inner.lock().ok()?.as_ref().map(|m| m.code.clone())
    }
}

#[async_trait]
impl EmbeddingBackend for EmbeddingService {
    async fn prepare(&self, model_code: &str) -> Result<()> {
        if self.loaded_code().as_deref() == Some(model_code) {
            return Ok(());
        }

        // Accept a full registry code ("intfloat/multilingual-e5-small")
        // or its bare model name ("multilingual-e5-small").
        let wanted = model_code.to_lowercase();
        let info = TextEmbedding::list_supported_models()
            .into_iter()
            .find(|m| {
                let code = m.model_code.to_lowercase();
                code == wanted || code.ends_with(&format!("/{}", wanted))
            })
            .ok_or_else(|| Error::Model(format!("unsupported embedding model: {}", model_code)))?;

        let inner = self.inner.clone();
        let cache_dir = self.cache_dir.clone();
        let show_download_progress = self.show_download_progress;
        let code = model_code.to_string();

        tokio::task::spawn_blocking(move || {
            let mut options =
                InitOptions::new(info.model.clone()).with_show_download_progress(show_download_progress);
            if let Some(dir) = cache_dir {
                options = options.with_cache_dir(dir);
            }
            let model = TextEmbedding::try_new(options)
                .map_err(|e| Error::Model(format!("failed to init embedding model: {}", e)))?;

            let mut held = inner
                .lock()
                .map_err(|_| Error::Internal("embedding lock poisoned".into()))?;
            *held = Some(LoadedModel {
                model,
                code,
                file: info.model_file.clone(),
                dim: info.dim,
            });
            Ok(())
        })
        .await
        .map_err(|e| Error::Internal(format!("embedding task join error: {}", e)))?
    }

    async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let inner = self.inner.clone();

        tokio::task::spawn_blocking(move || {
            // Lock held for the whole computation: one embedding at a time.
            let mut held = inner
                .lock()
                .map_err(|_| Error::Internal("embedding lock poisoned".into()))?;
            let loaded = held
                .as_mut()
                .ok_or_else(|| Error::Model("no embedding model loaded; call prepare() first".into()))?;
            loaded
                .model
                .embed(texts, None)
                .map_err(|e| Error::Model(format!("embedding error: {}", e)))
        })
        .await
        .map_err(|e| Error::Internal(format!("embedding task join error: {}", e)))?
    }

    fn model_file(&self) -> Option<String> {
        self.inner.lock().ok()?.as_ref().map(|m| m.file.clone())
    }

    fn dimensions(&self) -> Option<usize> {
        self.inner.lock().ok()?.as_ref().map(|m| m.dim)
    }
}
