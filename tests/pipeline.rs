//! End-to-end pipeline tests over deterministic fake providers.
//!
//! The three external services (embedding model, LLM, image model) are
//! replaced with in-process fakes so the full ingest → dedup → profile →
//! image flow runs hermetically against a temp SQLite store.

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tempfile::TempDir;

use storymind::config::Config;
use storymind::db;
use storymind::embedder::Embedder;
use storymind::error::{ImageError, LlmError, PipelineError};
use storymind::imagegen::ImageModel;
use storymind::llm::ChatModel;
use storymind::migrate;
use storymind::models::{ImageOutcome, ProcessingState};
use storymind::pipeline::Pipeline;
use storymind::seed::{character_seed, image_filename};
use storymind::window::split_windows;

const BOOK_TEXT: &str = "\
Harry Potter woke before dawn in the smallest bedroom of the house. Harry Potter \
had untidy black hair, round glasses held together with tape, and a thin lightning \
scar on his forehead. The cupboard under the stairs still smelled of spiders.\n\n\
Hermione arrived at the compartment door already wearing her school robes. She had \
bushy brown hair and rather large front teeth, and she spoke very fast about spells \
she had memorized. Harry Potter listened while Ron looked out of the window.\n\n\
Ron was tall and gangling, with flaming red hair and a long nose. There was a smudge \
of dirt on the side of his nose that refused to come off. Harry Potter shared his \
sweets with him as the train rattled north past fields and rivers.\n\n\
The castle rose beyond the black lake, its windows glittering against the night sky. \
Boats drifted across the water, and Harry Potter sat silent at the prow, watching the \
towers grow nearer. Hermione whispered facts about the enchanted ceiling behind him.\n\n\
In the common room that evening, Ron beat Harry Potter twice at chess while Hermione \
read a thick book by the fire. The embers burned low and the portraits snored softly \
in their frames along the stone walls.";

const NAMES_JSON: &str = r#"["Harry Potter", "Harry", "Hermione", "Ron"]"#;

// ============ Fakes ============

/// Deterministic hash-based embedder, 8 dimensions.
struct FakeEmbedder;

fn fake_vector(text: &str, dims: usize) -> Vec<f32> {
    (0..dims)
        .map(|i| {
            let mut h: u32 = 2166136261 ^ (i as u32);
            for b in text.bytes() {
                h = h.wrapping_mul(16777619) ^ b as u32;
            }
            (h % 1000) as f32 / 1000.0
        })
        .collect()
}

#[async_trait]
impl Embedder for FakeEmbedder {
    fn model_id(&self) -> &str {
        "fake-embedder"
    }

    fn dims(&self) -> usize {
        8
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, PipelineError> {
        Ok(texts.iter().map(|t| fake_vector(t, 8)).collect())
    }
}

/// Scripted chat model: a fixed name list for extraction, a synthesized
/// paragraph for profile calls.
struct ScriptedChat {
    names_json: &'static str,
}

#[async_trait]
impl ChatModel for ScriptedChat {
    async fn complete(&self, _system: &str, user: &str) -> Result<String, LlmError> {
        if user.contains("JSON array of character names") {
            return Ok(self.names_json.to_string());
        }
        if user.contains("Canonical description") {
            let name = user
                .lines()
                .find_map(|l| l.strip_prefix("Character: "))
                .unwrap_or("The character");
            return Ok(format!(
                "{} is a distinctive figure with memorable features, habitual dress, \
                 and a steady bearing drawn from the retrieved passages.",
                name
            ));
        }
        Ok("NO".to_string())
    }
}

/// Image model whose failure mode can be toggled mid-test.
struct FlakyImageModel {
    fail: AtomicBool,
}

fn tiny_png() -> Vec<u8> {
    let img = image::RgbImage::from_pixel(4, 4, image::Rgb([10, 20, 30]));
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, image::ImageFormat::Png).unwrap();
    buf.into_inner()
}

#[async_trait]
impl ImageModel for FlakyImageModel {
    async fn generate(
        &self,
        _prompt: &str,
        _seed: u32,
        _aspect_ratio: &str,
    ) -> Result<Vec<u8>, ImageError> {
        if self.fail.load(Ordering::SeqCst) {
            Err(ImageError::Quota)
        } else {
            Ok(tiny_png())
        }
    }
}

// ============ Fixtures ============

struct Fixture {
    _tmp: TempDir,
    pipeline: Pipeline,
    image_model: Arc<FlakyImageModel>,
    book_path: PathBuf,
    config: Config,
}

async fn setup(names_json: &'static str) -> Fixture {
    let tmp = TempDir::new().unwrap();
    let config = Config::minimal(tmp.path());

    let book_path = tmp.path().join("HP-PS.txt");
    std::fs::write(&book_path, BOOK_TEXT).unwrap();

    let pool = db::connect(&config).await.unwrap();
    migrate::run_migrations(&pool).await.unwrap();

    let image_model = Arc::new(FlakyImageModel {
        fail: AtomicBool::new(false),
    });

    let pipeline = Pipeline::new(
        config.clone(),
        pool,
        Arc::new(FakeEmbedder),
        Arc::new(ScriptedChat { names_json }),
        image_model.clone(),
    );

    Fixture {
        _tmp: tmp,
        pipeline,
        image_model,
        book_path,
        config,
    }
}

fn index_files_exist(config: &Config, source_id: &str) -> bool {
    let index = config.storage.index_dir.join(format!("{}.index", source_id));
    let meta = config
        .storage
        .index_dir
        .join(format!("{}.index.meta", source_id));
    index.exists() && meta.exists()
}

// ============ Tests ============

#[tokio::test]
async fn ingest_produces_completed_source_with_deduplicated_characters() {
    let fx = setup(NAMES_JSON).await;
    let source_id = fx.pipeline.ingest(&fx.book_path).await.unwrap();

    let (source, characters) = fx.pipeline.get_source(&source_id).await.unwrap();
    assert_eq!(source.state, ProcessingState::Completed);
    assert_eq!(source.title, "HP-PS");
    // "Harry" merged into "Harry Potter": 3 canonical characters survive.
    assert_eq!(characters.len(), 3);
    assert_eq!(source.character_count, characters.len() as i64);

    let names: Vec<&str> = characters.iter().map(|c| c.name.as_str()).collect();
    assert!(names.contains(&"Harry Potter"));
    assert!(names.contains(&"Hermione"));
    assert!(names.contains(&"Ron"));
    assert!(!names.contains(&"Harry"));

    // Ordered by mention_count descending, then name ascending.
    for pair in characters.windows(2) {
        assert!(
            pair[0].mention_count > pair[1].mention_count
                || (pair[0].mention_count == pair[1].mention_count
                    && pair[0].name <= pair[1].name)
        );
    }

    // "Harry Potter" appears as a whole word in every window, so it
    // leads the listing.
    assert_eq!(characters[0].name, "Harry Potter");
    assert_eq!(characters[0].seed, 1085936863);
    assert!(characters[0].mention_count >= characters[1].mention_count);
    for character in &characters {
        assert!(!character.description.trim().is_empty());
        assert_eq!(character.seed, character_seed(&character.name));
    }

    assert!(index_files_exist(&fx.config, &source_id));
}

#[tokio::test]
async fn reingest_same_title_supersedes_prior_source() {
    let fx = setup(NAMES_JSON).await;
    let first_id = fx.pipeline.ingest(&fx.book_path).await.unwrap();
    assert!(index_files_exist(&fx.config, &first_id));

    let second_id = fx.pipeline.ingest(&fx.book_path).await.unwrap();
    assert_ne!(first_id, second_id);

    let sources = fx.pipeline.list_sources().await.unwrap();
    assert_eq!(sources.len(), 1);
    assert_eq!(sources[0].id, second_id);
    assert_eq!(sources[0].title, "HP-PS");

    // The first ingest's index files are gone; its characters are gone.
    assert!(!index_files_exist(&fx.config, &first_id));
    assert!(index_files_exist(&fx.config, &second_id));
    assert!(fx.pipeline.get_characters(&first_id).await.is_err());
}

#[tokio::test]
async fn image_generation_falls_back_to_placeholder_then_recovers() {
    let fx = setup(NAMES_JSON).await;
    let source_id = fx.pipeline.ingest(&fx.book_path).await.unwrap();
    let characters = fx.pipeline.get_characters(&source_id).await.unwrap();
    let (character, _) = &characters[0];

    // Provider down: the call still succeeds, with a placeholder.
    fx.image_model.fail.store(true, Ordering::SeqCst);
    let record = fx
        .pipeline
        .regenerate_image(&character.id, None, None)
        .await
        .unwrap();
    assert_eq!(record.outcome, ImageOutcome::Placeholder);

    let expected_path = fx
        .config
        .storage
        .image_dir
        .join(image_filename(&character.name, character.seed));
    assert_eq!(Path::new(&record.path), expected_path);

    // The placeholder is a real decodable bitmap, reproducible from the
    // seed.
    let bytes = std::fs::read(&record.path).unwrap();
    let decoded = image::load_from_memory(&bytes).unwrap().to_rgb8();
    let again = storymind::imagegen::placeholder_bitmap(&character.name, character.seed);
    assert_eq!(decoded.as_raw(), again.as_raw());

    // Provider restored: same path, outcome real.
    fx.image_model.fail.store(false, Ordering::SeqCst);
    let record2 = fx
        .pipeline
        .regenerate_image(&character.id, None, None)
        .await
        .unwrap();
    assert_eq!(record2.outcome, ImageOutcome::Real);
    assert_eq!(record2.path, record.path);
    assert!(image::load_from_memory(&std::fs::read(&record2.path).unwrap()).is_ok());

    // The prompt carries the description, the style, and the seed token.
    assert!(record2.prompt.contains(&character.description));
    assert!(record2.prompt.contains(&format!("[ID: {}]", character.seed)));
}

#[tokio::test]
async fn delete_source_cascades_rows_and_files() {
    let fx = setup(NAMES_JSON).await;
    let source_id = fx.pipeline.ingest(&fx.book_path).await.unwrap();
    let characters = fx.pipeline.get_characters(&source_id).await.unwrap();
    let (character, _) = &characters[0];

    let record = fx
        .pipeline
        .regenerate_image(&character.id, None, None)
        .await
        .unwrap();
    assert!(Path::new(&record.path).exists());

    fx.pipeline.delete_source(&source_id).await.unwrap();

    assert!(fx.pipeline.get_characters(&source_id).await.is_err());
    assert!(fx.pipeline.list_sources().await.unwrap().is_empty());
    assert!(!Path::new(&record.path).exists());
    assert!(!index_files_exist(&fx.config, &source_id));
}

#[tokio::test]
async fn unparseable_name_extraction_marks_source_failed() {
    let fx = setup("the model rambled instead of returning JSON").await;
    let err = fx.pipeline.ingest(&fx.book_path).await.unwrap_err();
    assert!(err.to_string().contains("unparseable"));

    let sources = fx.pipeline.list_sources().await.unwrap();
    assert_eq!(sources.len(), 1);
    assert_eq!(sources[0].state, ProcessingState::Failed);
    assert!(sources[0].failure_reason.is_some());
    assert_eq!(sources[0].character_count, 0);

    // Rollback removed the index files and any partial characters.
    assert!(!index_files_exist(&fx.config, &sources[0].id));
    let characters = fx.pipeline.get_characters(&sources[0].id).await.unwrap();
    assert!(characters.is_empty());
}

#[tokio::test]
async fn search_with_oversized_k_returns_every_window() {
    let fx = setup(NAMES_JSON).await;
    let source_id = fx.pipeline.ingest(&fx.book_path).await.unwrap();

    let expected_windows = split_windows(
        BOOK_TEXT,
        fx.config.windowing.window_chars,
        fx.config.windowing.overlap_chars,
    );

    let hits = fx
        .pipeline
        .search_index(&source_id, "Harry Potter", 10_000)
        .await
        .unwrap();
    assert_eq!(hits.len(), expected_windows.len());

    // The hit set is a permutation of the window set.
    let mut hit_texts: Vec<&str> = hits.iter().map(|h| h.text.as_str()).collect();
    let mut window_texts: Vec<&str> = expected_windows.iter().map(|w| w.as_str()).collect();
    hit_texts.sort_unstable();
    window_texts.sort_unstable();
    assert_eq!(hit_texts, window_texts);

    // Distances ascend.
    for pair in hits.windows(2) {
        assert!(pair[0].distance <= pair[1].distance);
    }
}

#[tokio::test]
async fn regenerate_image_for_unknown_character_fails() {
    let fx = setup(NAMES_JSON).await;
    let err = fx
        .pipeline
        .regenerate_image("no-such-character", None, None)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("not found"));
}
