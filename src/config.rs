use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub storage: StorageConfig,
    #[serde(default)]
    pub windowing: WindowingConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub image: ImageConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// SQLite metadata store.
    pub db_path: PathBuf,
    /// Directory holding `<source_id>.index` and `<source_id>.index.meta`.
    pub index_dir: PathBuf,
    /// Directory holding generated character portraits.
    pub image_dir: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WindowingConfig {
    #[serde(default = "default_window_chars")]
    pub window_chars: usize,
    #[serde(default = "default_overlap_chars")]
    pub overlap_chars: usize,
}

impl Default for WindowingConfig {
    fn default() -> Self {
        Self {
            window_chars: default_window_chars(),
            overlap_chars: default_overlap_chars(),
        }
    }
}

fn default_window_chars() -> usize {
    1000
}
fn default_overlap_chars() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExtractionConfig {
    /// Number of leading windows concatenated into the extraction prefix.
    #[serde(default = "default_prefix_windows")]
    pub prefix_windows: usize,
    /// Maximum names requested from the LLM.
    #[serde(default = "default_max_names")]
    pub max_names: usize,
    /// Maximum characters to synthesize profiles for after deduplication.
    #[serde(default = "default_max_profiles")]
    pub max_profiles: usize,
    /// Enable the LLM pair-matching pass during deduplication. Costs
    /// O(n²/2) LLM calls; the string strategies alone define correctness.
    #[serde(default)]
    pub semantic_dedup: bool,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            prefix_windows: default_prefix_windows(),
            max_names: default_max_names(),
            max_profiles: default_max_profiles(),
            semantic_dedup: false,
        }
    }
}

fn default_prefix_windows() -> usize {
    35
}
fn default_max_names() -> usize {
    50
}
fn default_max_profiles() -> usize {
    20
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Windows retrieved per character during profile synthesis.
    #[serde(default = "default_mention_k")]
    pub mention_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            mention_k: default_mention_k(),
        }
    }
}

fn default_mention_k() -> usize {
    7
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Cooperative pause between profile-synthesis calls, sized for a
    /// ~15 requests/minute provider ceiling.
    #[serde(default = "default_pacing_secs")]
    pub pacing_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: default_llm_model(),
            timeout_secs: default_llm_timeout_secs(),
            max_retries: default_max_retries(),
            pacing_secs: default_pacing_secs(),
        }
    }
}

fn default_llm_model() -> String {
    "gemini-2.0-flash".to_string()
}
fn default_llm_timeout_secs() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    3
}
fn default_pacing_secs() -> u64 {
    4
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_embedding_dims")]
    pub dims: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: default_embedding_model(),
            dims: default_embedding_dims(),
            batch_size: default_batch_size(),
        }
    }
}

fn default_embedding_model() -> String {
    "all-minilm-l6-v2".to_string()
}
fn default_embedding_dims() -> usize {
    384
}
fn default_batch_size() -> usize {
    64
}

#[derive(Debug, Deserialize, Clone)]
pub struct ImageConfig {
    #[serde(default = "default_image_model")]
    pub model: String,
    /// Shared stylistic anchors appended to every portrait prompt so all
    /// characters in a library share a visual register.
    #[serde(default = "default_style")]
    pub style: String,
    #[serde(default = "default_aspect_ratio")]
    pub aspect_ratio: String,
    #[serde(default = "default_image_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            model: default_image_model(),
            style: default_style(),
            aspect_ratio: default_aspect_ratio(),
            timeout_secs: default_image_timeout_secs(),
        }
    }
}

fn default_image_model() -> String {
    "imagen-3.0-generate-001".to_string()
}
fn default_style() -> String {
    "realistic portrait, photorealistic, highly detailed, studio lighting, neutral background"
        .to_string()
}
fn default_aspect_ratio() -> String {
    "1:1".to_string()
}
fn default_image_timeout_secs() -> u64 {
    60
}

impl Config {
    /// A minimal configuration rooted at `root`. Used by tests; pacing is
    /// zeroed so suites do not sleep between synthesized profiles.
    pub fn minimal(root: &Path) -> Self {
        Self {
            storage: StorageConfig {
                db_path: root.join("storymind.sqlite"),
                index_dir: root.join("data"),
                image_dir: root.join("images"),
            },
            windowing: WindowingConfig::default(),
            extraction: ExtractionConfig::default(),
            retrieval: RetrievalConfig::default(),
            llm: LlmConfig {
                pacing_secs: 0,
                ..LlmConfig::default()
            },
            embedding: EmbeddingConfig::default(),
            image: ImageConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.windowing.window_chars == 0 {
        anyhow::bail!("windowing.window_chars must be > 0");
    }
    if config.windowing.overlap_chars >= config.windowing.window_chars {
        anyhow::bail!("windowing.overlap_chars must be smaller than windowing.window_chars");
    }
    if config.extraction.prefix_windows == 0 {
        anyhow::bail!("extraction.prefix_windows must be >= 1");
    }
    if config.extraction.max_names == 0 {
        anyhow::bail!("extraction.max_names must be >= 1");
    }
    if config.retrieval.mention_k == 0 {
        anyhow::bail!("retrieval.mention_k must be >= 1");
    }
    if config.embedding.dims == 0 {
        anyhow::bail!("embedding.dims must be > 0");
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_has_reference_defaults() {
        let cfg = Config::minimal(Path::new("/tmp/x"));
        assert_eq!(cfg.windowing.window_chars, 1000);
        assert_eq!(cfg.windowing.overlap_chars, 200);
        assert_eq!(cfg.extraction.prefix_windows, 35);
        assert_eq!(cfg.extraction.max_names, 50);
        assert_eq!(cfg.retrieval.mention_k, 7);
        assert_eq!(cfg.embedding.dims, 384);
        assert!(!cfg.extraction.semantic_dedup);
    }

    #[test]
    fn overlap_must_be_smaller_than_window() {
        let tmp = std::env::temp_dir().join("storymind-config-overlap-test.toml");
        std::fs::write(
            &tmp,
            r#"
[storage]
db_path = "/tmp/s.sqlite"
index_dir = "/tmp/data"
image_dir = "/tmp/images"

[windowing]
window_chars = 100
overlap_chars = 100
"#,
        )
        .unwrap();
        assert!(load_config(&tmp).is_err());
        std::fs::remove_file(&tmp).ok();
    }
}
