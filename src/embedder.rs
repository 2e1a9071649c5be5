//! Embedding provider abstraction and the local fastembed backend.
//!
//! The pipeline embeds text windows and search queries with a dense
//! sentence-embedding model loaded in-process (reference: all-minilm-l6-v2,
//! 384 dimensions). The model identity is pinned into every persisted
//! index and checked on load; mixing models is forbidden.
//!
//! The process holds a single model instance: initialized lazily on first
//! use via [`global_embedder`], never swapped under a running ingest.

use std::sync::{Arc, Mutex, OnceLock};

use anyhow::anyhow;
use async_trait::async_trait;

use crate::config::EmbeddingConfig;
use crate::error::PipelineError;

/// An embedding backend: maps texts to fixed-dimension vectors.
///
/// Object-safe so tests can inject a deterministic stub in place of the
/// fastembed model.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Model identifier recorded into persisted indexes (e.g.
    /// `"all-minilm-l6-v2"`).
    fn model_id(&self) -> &str;
    /// Vector dimensionality (e.g. `384`).
    fn dims(&self) -> usize;
    /// Embed a batch of texts, one vector per input, in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, PipelineError>;
}

/// Local embedding provider running fastembed under `spawn_blocking`.
///
/// The model is downloaded on first use and cached; after that no
/// network calls are needed. The forward pass is CPU-bound and
/// non-interactive, so it runs on the blocking thread pool.
pub struct LocalEmbedder {
    model_id: String,
    dims: usize,
    batch_size: usize,
    model: Arc<Mutex<fastembed::TextEmbedding>>,
}

impl LocalEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self, PipelineError> {
        let (fastembed_model, dims) = resolve_model(&config.model)?;
        let model = fastembed::TextEmbedding::try_new(
            fastembed::InitOptions::new(fastembed_model).with_show_download_progress(false),
        )
        .map_err(|e| PipelineError::EmbeddingModelUnavailable(e.to_string()))?;

        Ok(Self {
            model_id: config.model.clone(),
            dims,
            batch_size: config.batch_size,
            model: Arc::new(Mutex::new(model)),
        })
    }
}

#[async_trait]
impl Embedder for LocalEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, PipelineError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let model = Arc::clone(&self.model);
        let batch_size = self.batch_size;
        let texts = texts.to_vec();

        tokio::task::spawn_blocking(move || {
            let mut model = model.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            model
                .embed(texts, Some(batch_size))
                .map_err(|e| anyhow!("embedding forward pass failed: {}", e))
        })
        .await
        .map_err(|e| PipelineError::EmbeddingModelUnavailable(e.to_string()))?
        .map_err(|e| PipelineError::EmbeddingModelUnavailable(e.to_string()))
    }
}

fn resolve_model(name: &str) -> Result<(fastembed::EmbeddingModel, usize), PipelineError> {
    match name {
        "all-minilm-l6-v2" => Ok((fastembed::EmbeddingModel::AllMiniLML6V2, 384)),
        "bge-small-en-v1.5" => Ok((fastembed::EmbeddingModel::BGESmallENV15, 384)),
        "bge-base-en-v1.5" => Ok((fastembed::EmbeddingModel::BGEBaseENV15, 768)),
        "multilingual-e5-small" => Ok((fastembed::EmbeddingModel::MultilingualE5Small, 384)),
        other => Err(PipelineError::EmbeddingModelUnavailable(format!(
            "unknown embedding model: '{}'. Supported models: all-minilm-l6-v2, \
             bge-small-en-v1.5, bge-base-en-v1.5, multilingual-e5-small",
            other
        ))),
    }
}

static EMBEDDER: OnceLock<Arc<LocalEmbedder>> = OnceLock::new();

/// Process-wide embedder singleton. The first caller initializes the
/// model; later callers receive the same instance regardless of config.
pub fn global_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>, PipelineError> {
    if let Some(existing) = EMBEDDER.get() {
        return Ok(existing.clone());
    }
    let created = Arc::new(LocalEmbedder::new(config)?);
    Ok(EMBEDDER.get_or_init(|| created).clone())
}
