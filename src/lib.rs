//! # StoryMind
//!
//! **A character extraction and visualization pipeline for novels.**
//!
//! StoryMind ingests long-form literary documents (PDF, EPUB, plain
//! text) and produces, for each recognized character, a canonical
//! textual profile and a reproducible portrait image.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────────┐   ┌──────────────┐
//! │  Loader  │──▶│ Window + Embed │──▶│  Flat L2     │
//! │ PDF/EPUB │   │  (fastembed)   │   │  Index       │
//! └──────────┘   └───────────────┘   └──────┬───────┘
//!                                           │ retrieval
//!      ┌────────────┐   ┌────────────┐   ┌──▼─────────┐
//!      │    Name    │──▶│   Alias    │──▶│  Profile   │
//!      │ Extraction │   │   Dedup    │   │ Synthesis  │
//!      └────────────┘   └────────────┘   └──────┬─────┘
//!                                               │ seed
//!                        ┌──────────┐   ┌───────▼──────┐
//!                        │  SQLite  │◀──│    Image     │
//!                        │  Store   │   │  Generation  │
//!                        └──────────┘   └──────────────┘
//! ```
//!
//! ## Data flow
//!
//! 1. The **loader** ([`loader`]) extracts text and metadata and splits
//!    it into overlapping windows ([`window`]).
//! 2. The **embedding index** ([`index`], [`embedder`]) maps windows to
//!    384-dimension vectors and serves exact k-NN retrieval; it is
//!    persisted per source and pinned to its embedding model.
//! 3. The **name extractor** ([`names`]) makes one LLM call over a
//!    bounded prefix of the book.
//! 4. The **alias deduplicator** ([`dedup`]) collapses name variants
//!    into canonical names.
//! 5. The **profile synthesizer** ([`profile`]) retrieves each
//!    character's nearest windows and synthesizes a canonical visual
//!    description.
//! 6. The **seed function** ([`seed`]) maps each canonical name to a
//!    deterministic `u32` that anchors image identity across runs.
//! 7. The **image generator** ([`imagegen`]) renders a portrait (or a
//!    deterministic placeholder when the provider fails) at a stable
//!    per-character path.
//! 8. The **orchestrator** ([`pipeline`]) sequences everything, paces
//!    LLM calls under the provider's rate budget, and supersedes prior
//!    ingests of the same title.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`models`] | Core data types: sources, characters, profiles, images |
//! | [`error`] | Pipeline error taxonomy |
//! | [`loader`] | PDF/EPUB/TXT text extraction and metadata |
//! | [`window`] | Recursive overlap splitter |
//! | [`embedder`] | Embedding provider trait + local fastembed backend |
//! | [`index`] | Flat L2 index: build, search, save, load |
//! | [`llm`] | Chat-model trait + Gemini client |
//! | [`names`] | LLM name discovery over the book prefix |
//! | [`dedup`] | Alias deduplication (string + optional semantic) |
//! | [`profile`] | RAG-grounded profile synthesis |
//! | [`seed`] | Deterministic seeds and image filenames |
//! | [`imagegen`] | Image provider trait, Imagen client, placeholder |
//! | [`db`] | SQLite connection pool with WAL mode |
//! | [`migrate`] | Database schema migrations (idempotent) |
//! | [`store`] | Typed queries over sources/characters/images |
//! | [`pipeline`] | The orchestrator |

pub mod config;
pub mod db;
pub mod dedup;
pub mod embedder;
pub mod error;
pub mod imagegen;
pub mod index;
pub mod llm;
pub mod loader;
pub mod migrate;
pub mod models;
pub mod names;
pub mod pipeline;
pub mod profile;
pub mod seed;
pub mod store;
pub mod window;
