//! Error taxonomy for the extraction pipeline.
//!
//! Components return typed errors so the orchestrator can distinguish
//! fatal ingest failures from per-character failures that are isolated
//! (skip and continue) and from image-provider failures that always
//! resolve to a placeholder.

/// Pipeline-level error raised by the core components.
#[derive(Debug)]
pub enum PipelineError {
    /// The file extension is not one of pdf, epub, txt.
    UnsupportedFormat(String),
    /// The file could not be read or yielded no extractable text.
    DocumentLoadFailed(String),
    /// The local embedding model could not be initialized or run.
    EmbeddingModelUnavailable(String),
    /// A persisted index is missing a sidecar, misaligned, or was built
    /// under a different embedding model.
    IndexCorrupt(String),
    /// The LLM's name-extraction response was not a parseable JSON array.
    ExtractionParse(String),
    /// The LLM provider rejected the call with a quota error.
    LlmQuota,
    /// A transient LLM failure: transport error, server error, or a
    /// content-filtered response.
    LlmTransient(String),
    /// Retrieval returned zero usable windows for a character.
    RetrievalEmpty(String),
    /// A metadata-store operation failed.
    Persistence(String),
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineError::UnsupportedFormat(ext) => {
                write!(f, "unsupported document format: {}", ext)
            }
            PipelineError::DocumentLoadFailed(reason) => {
                write!(f, "document load failed: {}", reason)
            }
            PipelineError::EmbeddingModelUnavailable(reason) => {
                write!(f, "embedding model unavailable: {}", reason)
            }
            PipelineError::IndexCorrupt(reason) => write!(f, "index corrupt: {}", reason),
            PipelineError::ExtractionParse(reason) => {
                write!(f, "name extraction response unparseable: {}", reason)
            }
            PipelineError::LlmQuota => write!(f, "LLM quota exceeded"),
            PipelineError::LlmTransient(reason) => write!(f, "LLM call failed: {}", reason),
            PipelineError::RetrievalEmpty(name) => {
                write!(f, "no windows retrieved for character: {}", name)
            }
            PipelineError::Persistence(reason) => write!(f, "persistence error: {}", reason),
        }
    }
}

impl std::error::Error for PipelineError {}

impl From<sqlx::Error> for PipelineError {
    fn from(e: sqlx::Error) -> Self {
        PipelineError::Persistence(e.to_string())
    }
}

/// Error returned by a [`crate::llm::ChatModel`] call.
#[derive(Debug)]
pub enum LlmError {
    /// HTTP 429 from the provider.
    Quota,
    /// The provider refused the completion on safety grounds.
    ContentFiltered,
    /// Network failure, server error, or malformed response.
    Transport(String),
}

impl std::fmt::Display for LlmError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LlmError::Quota => write!(f, "LLM quota exceeded"),
            LlmError::ContentFiltered => write!(f, "LLM response content-filtered"),
            LlmError::Transport(reason) => write!(f, "LLM transport error: {}", reason),
        }
    }
}

impl std::error::Error for LlmError {}

impl From<LlmError> for PipelineError {
    fn from(e: LlmError) -> Self {
        match e {
            LlmError::Quota => PipelineError::LlmQuota,
            LlmError::ContentFiltered => {
                PipelineError::LlmTransient("content-filtered".to_string())
            }
            LlmError::Transport(reason) => PipelineError::LlmTransient(reason),
        }
    }
}

/// Error returned by an [`crate::imagegen::ImageModel`] call.
///
/// Every variant resolves to the placeholder path in the caller; none of
/// these abort the pipeline.
#[derive(Debug)]
pub enum ImageError {
    /// The provider returned a structured "no image" response.
    Refusal,
    /// HTTP 429 from the provider.
    Quota,
    /// The provider filtered the prompt or the output.
    ContentFiltered,
    /// Network failure, server error, or malformed response.
    Transport(String),
}

impl std::fmt::Display for ImageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImageError::Refusal => write!(f, "image provider refused the prompt"),
            ImageError::Quota => write!(f, "image provider quota exceeded"),
            ImageError::ContentFiltered => write!(f, "image content-filtered"),
            ImageError::Transport(reason) => write!(f, "image transport error: {}", reason),
        }
    }
}

impl std::error::Error for ImageError {}
