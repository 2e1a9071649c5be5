//! Flat L2 embedding index over the text windows of one source.
//!
//! Window counts for a novel are small (≤ a few thousand), so exhaustive
//! nearest-neighbor search is exact and fast enough; recall matters more
//! than latency here, which rules out approximate structures.
//!
//! # Persistence
//!
//! Two sidecar artifacts reconstruct a working index:
//!
//! - `<source_id>.index` — binary vector store: `SMIX` magic, format
//!   version, dims, count, the embedding model id, then the vectors as
//!   little-endian `f32`s.
//! - `<source_id>.index.meta` — JSON sidecar with the model id, dims,
//!   and the ordered window texts.
//!
//! Missing either file, a length misalignment, or a model-identity
//! mismatch fails with [`PipelineError::IndexCorrupt`]. The embedding
//! model is pinned for the lifetime of the index.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::embedder::Embedder;
use crate::error::PipelineError;

const MAGIC: &[u8; 4] = b"SMIX";
const FORMAT_VERSION: u32 = 1;

/// A window returned from a k-NN search, with its L2 distance and its
/// position in the original window order.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub text: String,
    pub distance: f32,
    pub position: usize,
}

/// In-memory embedding index: aligned vectors and window texts.
#[derive(Debug)]
pub struct EmbeddingIndex {
    model_id: String,
    dims: usize,
    vectors: Vec<Vec<f32>>,
    windows: Vec<String>,
}

#[derive(Serialize, Deserialize)]
struct IndexMeta {
    model: String,
    dims: usize,
    windows: Vec<String>,
}

impl EmbeddingIndex {
    /// Embed every window and build the index.
    pub async fn build(
        embedder: &dyn Embedder,
        windows: Vec<String>,
    ) -> Result<Self, PipelineError> {
        let vectors = embedder.embed(&windows).await?;
        if vectors.len() != windows.len() {
            return Err(PipelineError::EmbeddingModelUnavailable(format!(
                "embedder returned {} vectors for {} windows",
                vectors.len(),
                windows.len()
            )));
        }
        let dims = embedder.dims();
        for v in &vectors {
            if v.len() != dims {
                return Err(PipelineError::EmbeddingModelUnavailable(format!(
                    "embedder returned a {}-dim vector, expected {}",
                    v.len(),
                    dims
                )));
            }
        }
        Ok(Self {
            model_id: embedder.model_id().to_string(),
            dims,
            vectors,
            windows,
        })
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    /// The ordered window texts backing the index.
    pub fn windows(&self) -> &[String] {
        &self.windows
    }

    /// Embed the query and return the `k` nearest windows, ascending by
    /// L2 distance. When `k` exceeds the index size, every window is
    /// returned.
    pub async fn search(
        &self,
        embedder: &dyn Embedder,
        query: &str,
        k: usize,
    ) -> Result<Vec<SearchHit>, PipelineError> {
        if self.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        if embedder.model_id() != self.model_id {
            return Err(PipelineError::IndexCorrupt(format!(
                "index built with model '{}', queried with '{}'",
                self.model_id,
                embedder.model_id()
            )));
        }
        let query_vec = embedder
            .embed(&[query.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| {
                PipelineError::EmbeddingModelUnavailable("empty query embedding".to_string())
            })?;
        if query_vec.len() != self.dims {
            return Err(PipelineError::IndexCorrupt(format!(
                "query embedding has {} dims, index has {}",
                query_vec.len(),
                self.dims
            )));
        }

        let mut hits: Vec<SearchHit> = self
            .vectors
            .iter()
            .zip(self.windows.iter())
            .enumerate()
            .map(|(position, (vec, text))| SearchHit {
                text: text.clone(),
                distance: l2_distance(&query_vec, vec),
                position,
            })
            .collect();

        hits.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.position.cmp(&b.position))
        });
        hits.truncate(k);
        Ok(hits)
    }

    /// Persist the vector store and its window-text sidecar.
    pub fn save(&self, path: &Path) -> Result<(), PipelineError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| PipelineError::Persistence(e.to_string()))?;
        }

        let write_store = || -> std::io::Result<()> {
            let mut file = std::fs::File::create(path)?;
            file.write_all(MAGIC)?;
            file.write_all(&FORMAT_VERSION.to_le_bytes())?;
            file.write_all(&(self.dims as u32).to_le_bytes())?;
            file.write_all(&(self.vectors.len() as u32).to_le_bytes())?;
            file.write_all(&(self.model_id.len() as u32).to_le_bytes())?;
            file.write_all(self.model_id.as_bytes())?;
            for vec in &self.vectors {
                file.write_all(&vec_to_blob(vec))?;
            }
            Ok(())
        };
        write_store().map_err(|e| PipelineError::Persistence(e.to_string()))?;

        let meta = IndexMeta {
            model: self.model_id.clone(),
            dims: self.dims,
            windows: self.windows.clone(),
        };
        let meta_json = serde_json::to_string(&meta)
            .map_err(|e| PipelineError::Persistence(e.to_string()))?;
        std::fs::write(Self::meta_path(path), meta_json)
            .map_err(|e| PipelineError::Persistence(e.to_string()))?;

        Ok(())
    }

    /// Load a persisted index, verifying format, alignment, and the
    /// embedding-model identity.
    pub fn load(path: &Path, expected_model: &str) -> Result<Self, PipelineError> {
        let mut file = std::fs::File::open(path)
            .map_err(|e| PipelineError::IndexCorrupt(format!("{}: {}", path.display(), e)))?;

        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)
            .map_err(|e| PipelineError::IndexCorrupt(e.to_string()))?;
        if &magic != MAGIC {
            return Err(PipelineError::IndexCorrupt("bad magic".to_string()));
        }

        let version = read_u32(&mut file)?;
        if version != FORMAT_VERSION {
            return Err(PipelineError::IndexCorrupt(format!(
                "unsupported index format version {}",
                version
            )));
        }

        let dims = read_u32(&mut file)? as usize;
        let count = read_u32(&mut file)? as usize;
        let model_len = read_u32(&mut file)? as usize;
        let mut model_bytes = vec![0u8; model_len];
        file.read_exact(&mut model_bytes)
            .map_err(|e| PipelineError::IndexCorrupt(e.to_string()))?;
        let model_id = String::from_utf8(model_bytes)
            .map_err(|_| PipelineError::IndexCorrupt("model id is not UTF-8".to_string()))?;

        if model_id != expected_model {
            return Err(PipelineError::IndexCorrupt(format!(
                "index built with model '{}', configured model is '{}'",
                model_id, expected_model
            )));
        }

        let mut vectors = Vec::with_capacity(count);
        let mut blob = vec![0u8; dims * 4];
        for _ in 0..count {
            file.read_exact(&mut blob)
                .map_err(|e| PipelineError::IndexCorrupt(e.to_string()))?;
            vectors.push(blob_to_vec(&blob));
        }

        let meta_raw = std::fs::read_to_string(Self::meta_path(path)).map_err(|e| {
            PipelineError::IndexCorrupt(format!("missing window sidecar: {}", e))
        })?;
        let meta: IndexMeta = serde_json::from_str(&meta_raw)
            .map_err(|e| PipelineError::IndexCorrupt(format!("bad window sidecar: {}", e)))?;

        if meta.model != model_id || meta.dims != dims {
            return Err(PipelineError::IndexCorrupt(
                "sidecar metadata disagrees with vector store".to_string(),
            ));
        }
        if meta.windows.len() != vectors.len() {
            return Err(PipelineError::IndexCorrupt(format!(
                "{} windows for {} vectors",
                meta.windows.len(),
                vectors.len()
            )));
        }

        Ok(Self {
            model_id,
            dims,
            vectors,
            windows: meta.windows,
        })
    }

    /// Sidecar path for an index file: `<path>.meta`.
    pub fn meta_path(path: &Path) -> PathBuf {
        let mut os = path.as_os_str().to_os_string();
        os.push(".meta");
        PathBuf::from(os)
    }

    /// Best-effort removal of both index artifacts; missing files are
    /// not errors.
    pub fn remove_files(path: &Path) {
        std::fs::remove_file(path).ok();
        std::fs::remove_file(Self::meta_path(path)).ok();
    }
}

fn read_u32(file: &mut std::fs::File) -> Result<u32, PipelineError> {
    let mut buf = [0u8; 4];
    file.read_exact(&mut buf)
        .map_err(|e| PipelineError::IndexCorrupt(e.to_string()))?;
    Ok(u32::from_le_bytes(buf))
}

/// Encode a float vector as little-endian `f32` bytes.
fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode little-endian `f32` bytes back into a float vector.
fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

fn l2_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}
