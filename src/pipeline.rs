//! Pipeline orchestration.
//!
//! Drives the full ingest flow: load + window → idempotent supersession
//! → embedding index → name extraction → alias deduplication → paced
//! profile synthesis → persistence. Also serves the on-demand
//! operations: image (re)generation, source deletion, and listings.
//!
//! # Ingest sequence
//!
//! 1. Load the file and split it into windows.
//! 2. Resolve the display title (embedded metadata or filename stem).
//! 3. Delete any existing source with the same normalized title,
//!    cascading over its characters, images, and index files. This is
//!    the sole correct behavior for a duplicate ingest.
//! 4. Persist the new source in `processing` state.
//! 5. Build and persist the embedding index under the new source id.
//! 6. Extract names from the window prefix (one LLM call).
//! 7. Deduplicate; log the alias map.
//! 8. Synthesize profiles sequentially with a cooperative pause between
//!    calls. A failure for one character skips that character only.
//! 9. Mark the source `completed` with its character count.
//!
//! Any fatal error before step 9 marks the source `failed` with a
//! retained reason and rolls back side effects best-effort: index files
//! and partial character rows are removed.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::anyhow;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::config::Config;
use crate::db;
use crate::dedup;
use crate::embedder::{self, Embedder};
use crate::imagegen::{self, ImageModel};
use crate::index::{EmbeddingIndex, SearchHit};
use crate::llm::{self, ChatModel};
use crate::loader;
use crate::migrate;
use crate::models::{CanonicalCharacter, CharacterProfile, ImageRecord, SourceDocument};
use crate::names;
use crate::profile;
use crate::store;

/// The orchestrator. Owns the store pool and the three external-service
/// handles; everything behind trait objects so tests run with fakes.
pub struct Pipeline {
    config: Config,
    pool: SqlitePool,
    embedder: Arc<dyn Embedder>,
    chat: Arc<dyn ChatModel>,
    image_model: Arc<dyn ImageModel>,
}

impl Pipeline {
    pub fn new(
        config: Config,
        pool: SqlitePool,
        embedder: Arc<dyn Embedder>,
        chat: Arc<dyn ChatModel>,
        image_model: Arc<dyn ImageModel>,
    ) -> Self {
        Self {
            config,
            pool,
            embedder,
            chat,
            image_model,
        }
    }

    /// Production wiring: connect the store, run migrations, and
    /// initialize the process-wide model singletons.
    pub async fn open(config: Config) -> anyhow::Result<Self> {
        let pool = db::connect(&config).await?;
        migrate::run_migrations(&pool).await?;
        let embedder = embedder::global_embedder(&config.embedding)?;
        let chat = llm::global_chat_model(&config.llm)?;
        let image_model = imagegen::global_image_model(&config.image)?;
        Ok(Self::new(config, pool, embedder, chat, image_model))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Ingest a book file. Returns the new source id.
    pub async fn ingest(&self, path: &Path) -> anyhow::Result<String> {
        let started = Instant::now();
        println!("ingest {}", path.display());

        let (meta, windows) = loader::load(path, &self.config.windowing)?;
        println!(
            "  loaded {} ({}), {} windows",
            meta.title,
            meta.format.as_str(),
            windows.len()
        );
        let author = meta.author.clone().unwrap_or_else(|| "Unknown".to_string());

        // Idempotent supersession: a same-title source, with everything
        // it owns, is removed before the new one is persisted.
        let prior = store::find_sources_by_title(&self.pool, &meta.title).await?;
        for old in &prior {
            println!("  superseding prior source {} ('{}')", old.id, old.title);
            self.delete_source(&old.id).await?;
        }

        let source_id = Uuid::new_v4().to_string();
        let index_path = self
            .config
            .storage
            .index_dir
            .join(format!("{}.index", source_id));

        store::insert_source(
            &self.pool,
            &source_id,
            &meta.title,
            &author,
            &index_path.display().to_string(),
        )
        .await?;

        match self.run_stages(&source_id, &index_path, windows).await {
            Ok(count) => {
                store::mark_completed(&self.pool, &source_id, count).await?;
                println!(
                    "  completed: {} characters in {:.1}s",
                    count,
                    started.elapsed().as_secs_f64()
                );
                Ok(source_id)
            }
            Err(e) => {
                eprintln!("  ingest failed: {}", e);
                EmbeddingIndex::remove_files(&index_path);
                store::delete_characters_for_source(&self.pool, &source_id)
                    .await
                    .ok();
                store::mark_failed(&self.pool, &source_id, &e.to_string())
                    .await
                    .ok();
                Err(e)
            }
        }
    }

    async fn run_stages(
        &self,
        source_id: &str,
        index_path: &Path,
        windows: Vec<String>,
    ) -> anyhow::Result<i64> {
        println!("  building embedding index");
        let index = EmbeddingIndex::build(self.embedder.as_ref(), windows).await?;
        index.save(index_path)?;

        let prefix_len = self.config.extraction.prefix_windows.min(index.len());
        let prefix = index.windows()[..prefix_len].join("\n");
        println!("  extracting names from the first {} windows", prefix_len);
        let raw_names = names::extract_names(
            self.chat.as_ref(),
            &prefix,
            self.config.extraction.max_names,
        )
        .await?;
        println!("  extracted {} names", raw_names.len());

        let (canonical, aliases) = if self.config.extraction.semantic_dedup {
            dedup::deduplicate_semantic(self.chat.as_ref(), &raw_names).await
        } else {
            dedup::deduplicate(&raw_names)
        };
        for (surface, canon) in &aliases {
            println!("  alias '{}' -> '{}'", surface, canon);
        }
        println!("  {} canonical characters after deduplication", canonical.len());

        let mut created: i64 = 0;
        for (i, name) in canonical
            .iter()
            .take(self.config.extraction.max_profiles)
            .enumerate()
        {
            if i > 0 && self.config.llm.pacing_secs > 0 {
                tokio::time::sleep(Duration::from_secs(self.config.llm.pacing_secs)).await;
            }

            match profile::synthesize_profile(
                self.chat.as_ref(),
                self.embedder.as_ref(),
                &index,
                name,
                self.config.retrieval.mention_k,
            )
            .await
            {
                Ok(p) => {
                    store::insert_character(&self.pool, source_id, &p).await?;
                    created += 1;
                    println!(
                        "  profile created: {} (seed {}, {} mentions)",
                        p.name, p.seed, p.mention_count
                    );
                }
                // Per-character failures are isolated: skip and continue.
                Err(e) => {
                    eprintln!("  Warning: skipping character '{}': {}", name, e);
                }
            }
        }

        Ok(created)
    }

    /// Generate or regenerate the portrait for a character. Runs
    /// unconditionally whether the current image is real or a
    /// placeholder; the deterministic filename means the new image
    /// overwrites the old one on disk.
    pub async fn regenerate_image(
        &self,
        character_id: &str,
        style: Option<&str>,
        aspect_ratio: Option<&str>,
    ) -> anyhow::Result<ImageRecord> {
        let character = store::get_character(&self.pool, character_id)
            .await?
            .ok_or_else(|| anyhow!("character not found: {}", character_id))?;

        let style = style.unwrap_or(&self.config.image.style);
        let aspect_ratio = aspect_ratio.unwrap_or(&self.config.image.aspect_ratio);

        let profile = CharacterProfile {
            name: character.name.clone(),
            description: character.description.clone(),
            seed: character.seed,
            mention_count: character.mention_count,
        };

        let portrait = imagegen::generate_portrait(
            self.image_model.as_ref(),
            &profile,
            style,
            aspect_ratio,
            &self.config.storage.image_dir,
        )
        .await?;

        let record =
            store::insert_image(&self.pool, character_id, &portrait, style, aspect_ratio).await?;
        Ok(record)
    }

    /// See [`delete_source`].
    pub async fn delete_source(&self, source_id: &str) -> anyhow::Result<()> {
        delete_source(&self.pool, source_id).await
    }

    /// See [`list_sources`].
    pub async fn list_sources(&self) -> anyhow::Result<Vec<SourceDocument>> {
        list_sources(&self.pool).await
    }

    /// See [`get_source`].
    pub async fn get_source(
        &self,
        source_id: &str,
    ) -> anyhow::Result<(SourceDocument, Vec<CanonicalCharacter>)> {
        get_source(&self.pool, source_id).await
    }

    /// See [`get_character`].
    pub async fn get_character(
        &self,
        character_id: &str,
    ) -> anyhow::Result<(CanonicalCharacter, SourceDocument, Vec<ImageRecord>)> {
        get_character(&self.pool, character_id).await
    }

    /// See [`get_characters`].
    pub async fn get_characters(
        &self,
        source_id: &str,
    ) -> anyhow::Result<Vec<(CanonicalCharacter, Option<ImageRecord>)>> {
        get_characters(&self.pool, source_id).await
    }

    /// See [`search_index`].
    pub async fn search_index(
        &self,
        source_id: &str,
        query: &str,
        k: usize,
    ) -> anyhow::Result<Vec<SearchHit>> {
        search_index(&self.pool, self.embedder.as_ref(), source_id, query, k).await
    }
}

// The read and delete operations need only the store pool, so CLI
// commands can serve them without initializing the embedding model or
// provider clients.

/// Delete a source and everything it owns: image files, image records,
/// characters, index files, the source row. Filesystem deletions are
/// best-effort; row deletions are transactional.
pub async fn delete_source(pool: &SqlitePool, source_id: &str) -> anyhow::Result<()> {
    let source = store::get_source(pool, source_id)
        .await?
        .ok_or_else(|| anyhow!("source not found: {}", source_id))?;

    let image_paths = store::image_paths_for_source(pool, source_id).await?;
    for path in &image_paths {
        std::fs::remove_file(path).ok();
    }
    EmbeddingIndex::remove_files(Path::new(&source.index_path));

    store::delete_source_rows(pool, source_id).await?;
    Ok(())
}

pub async fn list_sources(pool: &SqlitePool) -> anyhow::Result<Vec<SourceDocument>> {
    Ok(store::list_sources(pool).await?)
}

/// A source and its characters (ordered by mention count, then name).
pub async fn get_source(
    pool: &SqlitePool,
    source_id: &str,
) -> anyhow::Result<(SourceDocument, Vec<CanonicalCharacter>)> {
    let source = store::get_source(pool, source_id)
        .await?
        .ok_or_else(|| anyhow!("source not found: {}", source_id))?;
    let characters = store::list_characters(pool, source_id).await?;
    Ok((source, characters))
}

/// One character with its owning source and full image history, newest
/// image first.
pub async fn get_character(
    pool: &SqlitePool,
    character_id: &str,
) -> anyhow::Result<(CanonicalCharacter, SourceDocument, Vec<ImageRecord>)> {
    let character = store::get_character(pool, character_id)
        .await?
        .ok_or_else(|| anyhow!("character not found: {}", character_id))?;
    let source = store::get_source(pool, &character.source_id)
        .await?
        .ok_or_else(|| anyhow!("source not found: {}", character.source_id))?;
    let images = store::list_images(pool, character_id).await?;
    Ok((character, source, images))
}

/// Debug helper: run a raw k-NN query against a source's persisted
/// index. Fails with [`crate::error::PipelineError::IndexCorrupt`] when
/// the index cannot be reloaded under the given embedding model.
pub async fn search_index(
    pool: &SqlitePool,
    embedder: &dyn Embedder,
    source_id: &str,
    query: &str,
    k: usize,
) -> anyhow::Result<Vec<SearchHit>> {
    let source = store::get_source(pool, source_id)
        .await?
        .ok_or_else(|| anyhow!("source not found: {}", source_id))?;
    let index = EmbeddingIndex::load(Path::new(&source.index_path), embedder.model_id())?;
    let hits = index.search(embedder, query, k).await?;
    Ok(hits)
}

/// Characters of a source with their current image records, ordered by
/// `mention_count` descending, then by name ascending.
pub async fn get_characters(
    pool: &SqlitePool,
    source_id: &str,
) -> anyhow::Result<Vec<(CanonicalCharacter, Option<ImageRecord>)>> {
    if store::get_source(pool, source_id).await?.is_none() {
        return Err(anyhow!("source not found: {}", source_id));
    }
    let characters = store::list_characters(pool, source_id).await?;
    let mut out = Vec::with_capacity(characters.len());
    for character in characters {
        let image = store::current_image(pool, &character.id).await?;
        out.push((character, image));
    }
    Ok(out)
}
