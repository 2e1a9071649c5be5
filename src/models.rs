//! Core data models for the character pipeline.
//!
//! The data lifecycle is:
//!
//! ```text
//! file → load() → BookMetadata + windows → EmbeddingIndex
//!                                              ↓
//!            extract_names() → deduplicate() → synthesize_profile()
//!                                              ↓
//!                     CharacterProfile → CanonicalCharacter → ImageRecord
//! ```
//!
//! A [`SourceDocument`] exclusively owns its characters and its embedding
//! index; a [`CanonicalCharacter`] exclusively owns its images. Deletion
//! cascades downward and includes index and image files on disk.

use serde::Serialize;

/// Processing state of a source document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingState {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl ProcessingState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingState::Pending => "pending",
            ProcessingState::Processing => "processing",
            ProcessingState::Completed => "completed",
            ProcessingState::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "pending" => ProcessingState::Pending,
            "processing" => ProcessingState::Processing,
            "completed" => ProcessingState::Completed,
            _ => ProcessingState::Failed,
        }
    }
}

/// Whether a generated image came from the provider or the deterministic
/// placeholder path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageOutcome {
    Real,
    Placeholder,
}

impl ImageOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageOutcome::Real => "real",
            ImageOutcome::Placeholder => "placeholder",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "real" => ImageOutcome::Real,
            _ => ImageOutcome::Placeholder,
        }
    }
}

/// Source file format recognized by the loader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Pdf,
    Epub,
    Text,
}

impl SourceFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceFormat::Pdf => "pdf",
            SourceFormat::Epub => "epub",
            SourceFormat::Text => "txt",
        }
    }
}

/// Metadata derived from a loaded book file.
///
/// `title` comes from embedded metadata when the format carries it (EPUB
/// OPF), else the filename stem. `author` is only available for EPUB.
#[derive(Debug, Clone)]
pub struct BookMetadata {
    pub title: String,
    pub author: Option<String>,
    pub format: SourceFormat,
    pub window_count: usize,
}

/// A persisted source document row.
///
/// | Field | Description |
/// |-------|-------------|
/// | `id` | UUID v4 primary key |
/// | `title` | Display title; at most one source per normalized title |
/// | `author` | Author from embedded metadata, `"Unknown"` otherwise |
/// | `state` | pending → processing → completed \| failed |
/// | `index_path` | Path of the persisted embedding index |
/// | `character_count` | Count of surviving deduplicated characters |
/// | `failure_reason` | Retained reason when `state` is failed |
#[derive(Debug, Clone, Serialize)]
pub struct SourceDocument {
    pub id: String,
    pub title: String,
    pub author: String,
    pub state: ProcessingState,
    pub index_path: String,
    pub character_count: i64,
    pub failure_reason: Option<String>,
    /// Unix epoch seconds.
    pub created_at: i64,
    /// Unix epoch seconds.
    pub updated_at: i64,
}

/// A synthesized character profile, the intermediate between retrieval
/// and persistence.
#[derive(Debug, Clone)]
pub struct CharacterProfile {
    pub name: String,
    /// Canonical visual description, typically 50–300 words.
    pub description: String,
    /// Deterministic function of the lowercased, trimmed name.
    pub seed: u32,
    /// Retrieved windows literally containing the whole-word name.
    pub mention_count: i64,
}

/// A persisted canonical character row. `(source_id, name)` is unique.
#[derive(Debug, Clone, Serialize)]
pub struct CanonicalCharacter {
    pub id: String,
    pub source_id: String,
    pub name: String,
    pub description: String,
    pub seed: u32,
    pub mention_count: i64,
    /// JSON array of `{other_name, relation_label}` pairs when a
    /// relationship extraction pass produced one; never synthesized.
    pub relationships_json: Option<String>,
    pub created_at: i64,
}

/// A persisted generated-image row. The most recent row for a character
/// is its current image; the file path is deterministic per character so
/// regeneration overwrites on disk.
#[derive(Debug, Clone, Serialize)]
pub struct ImageRecord {
    pub id: String,
    pub character_id: String,
    pub path: String,
    pub prompt: String,
    pub style: String,
    pub aspect_ratio: String,
    pub duration_ms: i64,
    pub outcome: ImageOutcome,
    pub created_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_round_trip() {
        for state in [
            ProcessingState::Pending,
            ProcessingState::Processing,
            ProcessingState::Completed,
            ProcessingState::Failed,
        ] {
            assert_eq!(ProcessingState::parse(state.as_str()), state);
        }
    }

    #[test]
    fn outcome_round_trip() {
        assert_eq!(ImageOutcome::parse("real"), ImageOutcome::Real);
        assert_eq!(ImageOutcome::parse("placeholder"), ImageOutcome::Placeholder);
    }
}
