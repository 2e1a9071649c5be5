//! # StoryMind CLI
//!
//! The `storymind` binary drives the character extraction pipeline:
//! database initialization, book ingestion, source and character
//! listings, index search, portrait generation, and deletion.
//!
//! ## Usage
//!
//! ```bash
//! storymind --config ./config/storymind.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `storymind init` | Create the SQLite database and run schema migrations |
//! | `storymind ingest <file>` | Ingest a book (PDF, EPUB, or TXT) |
//! | `storymind sources` | List ingested sources and their states |
//! | `storymind characters <source-id>` | List a source's characters by mention count |
//! | `storymind character <character-id>` | Show one character with its image history |
//! | `storymind search <source-id> "<query>"` | k-NN query against a source's index |
//! | `storymind generate-image <character-id>` | Generate or regenerate a portrait |
//! | `storymind delete <source-id>` | Delete a source and everything it owns |

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use storymind::config;
use storymind::db;
use storymind::migrate;
use storymind::pipeline::{self, Pipeline};

/// StoryMind: character extraction and visualization for novels.
#[derive(Parser)]
#[command(
    name = "storymind",
    about = "StoryMind: extract characters from novels and generate consistent portraits",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/storymind.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables
    /// (sources, characters, images). Idempotent.
    Init,

    /// Ingest a book file.
    ///
    /// Loads and windows the text, builds the embedding index, extracts
    /// and deduplicates character names, and synthesizes a profile per
    /// character. Re-ingesting a same-title book supersedes the prior
    /// source entirely.
    Ingest {
        /// Path to the book file (.pdf, .epub, or .txt).
        file: PathBuf,
    },

    /// List all ingested sources.
    Sources,

    /// List the characters of a source, most-mentioned first.
    Characters {
        /// Source UUID.
        source_id: String,
    },

    /// Show one character with its source and image history.
    Character {
        /// Character UUID.
        character_id: String,
    },

    /// Run a raw nearest-neighbor query against a source's index.
    Search {
        /// Source UUID.
        source_id: String,
        /// The search query (e.g. a character name).
        query: String,
        /// Number of windows to retrieve.
        #[arg(long, default_value_t = 5)]
        k: usize,
    },

    /// Generate (or regenerate) the portrait for a character.
    ///
    /// Provider failures do not fail the command: a deterministic
    /// placeholder is written instead, flagged in the stored record.
    GenerateImage {
        /// Character UUID.
        character_id: String,
        /// Style override for this generation.
        #[arg(long)]
        style: Option<String>,
        /// Aspect ratio override (e.g. "1:1", "3:4").
        #[arg(long)]
        aspect_ratio: Option<String>,
    },

    /// Delete a source and all its characters, images, and index files.
    Delete {
        /// Source UUID.
        source_id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&cfg).await?;
            migrate::run_migrations(&pool).await?;
            pool.close().await;
            println!("Database initialized successfully.");
        }
        Commands::Ingest { file } => {
            let pipeline = Pipeline::open(cfg).await?;
            let source_id = pipeline.ingest(&file).await?;
            println!("source id: {}", source_id);
        }
        Commands::Sources => {
            let pool = db::connect(&cfg).await?;
            let sources = pipeline::list_sources(&pool).await?;
            if sources.is_empty() {
                println!("No sources ingested yet.");
            }
            for source in sources {
                println!(
                    "{}  [{}]  {} / {} ({} characters)",
                    source.id,
                    source.state.as_str(),
                    source.title,
                    source.author,
                    source.character_count
                );
                if let Some(reason) = source.failure_reason {
                    println!("    failure: {}", reason);
                }
            }
        }
        Commands::Characters { source_id } => {
            let pool = db::connect(&cfg).await?;
            let characters = pipeline::get_characters(&pool, &source_id).await?;
            if characters.is_empty() {
                println!("No characters for source {}.", source_id);
            }
            for (character, image) in characters {
                println!(
                    "{}  {} (seed {}, {} mentions)",
                    character.id, character.name, character.seed, character.mention_count
                );
                println!("    {}", character.description);
                if let Some(image) = image {
                    println!("    image: {} [{}]", image.path, image.outcome.as_str());
                }
            }
        }
        Commands::Character { character_id } => {
            let pool = db::connect(&cfg).await?;
            let (character, source, images) = pipeline::get_character(&pool, &character_id).await?;
            println!(
                "{} (seed {}, {} mentions)",
                character.name, character.seed, character.mention_count
            );
            println!("  source: {} / {} ({})", source.title, source.author, source.id);
            println!("  {}", character.description);
            for image in images {
                println!(
                    "  image: {} [{}] style: {}",
                    image.path,
                    image.outcome.as_str(),
                    image.style
                );
            }
        }
        Commands::Search {
            source_id,
            query,
            k,
        } => {
            let pool = db::connect(&cfg).await?;
            let embedder = storymind::embedder::global_embedder(&cfg.embedding)?;
            let hits =
                pipeline::search_index(&pool, embedder.as_ref(), &source_id, &query, k).await?;
            for (i, hit) in hits.iter().enumerate() {
                let excerpt: String = hit.text.chars().take(120).collect();
                println!("{}. [{:.3}] (window {})", i + 1, hit.distance, hit.position);
                println!("    {}", excerpt.replace('\n', " "));
            }
        }
        Commands::GenerateImage {
            character_id,
            style,
            aspect_ratio,
        } => {
            let pipeline = Pipeline::open(cfg).await?;
            let record = pipeline
                .regenerate_image(&character_id, style.as_deref(), aspect_ratio.as_deref())
                .await?;
            println!(
                "image written: {} [{}] in {}ms",
                record.path,
                record.outcome.as_str(),
                record.duration_ms
            );
        }
        Commands::Delete { source_id } => {
            let pool = db::connect(&cfg).await?;
            pipeline::delete_source(&pool, &source_id).await?;
            println!("deleted source {}", source_id);
        }
    }

    Ok(())
}
