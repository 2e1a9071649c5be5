//! Database schema migrations.
//!
//! Creates all required tables and ensures idempotent execution.
//! Designed to be run via `storymind init`.
//!
//! # Tables
//!
//! | Table | Purpose |
//! |-------|---------|
//! | `sources` | One row per ingested book; state machine + index path |
//! | `characters` | Canonical characters, unique per `(source_id, name)` |
//! | `images` | Generated portrait records, newest row is current |
//!
//! # Indexes
//!
//! - `idx_characters_source_id` — character listing per source
//! - `idx_images_character_id` — image history per character
//! - `idx_sources_title_norm` — duplicate-title supersession lookup
//!
//! All statements use `CREATE ... IF NOT EXISTS`; running `storymind
//! init` multiple times is safe.

use anyhow::Result;
use sqlx::SqlitePool;

/// Run all database migrations. Safe to call multiple times.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sources (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            title_norm TEXT NOT NULL,
            author TEXT NOT NULL DEFAULT 'Unknown',
            state TEXT NOT NULL DEFAULT 'pending',
            index_path TEXT NOT NULL,
            character_count INTEGER NOT NULL DEFAULT 0,
            failure_reason TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS characters (
            id TEXT PRIMARY KEY,
            source_id TEXT NOT NULL,
            name TEXT NOT NULL,
            description TEXT NOT NULL,
            seed INTEGER NOT NULL,
            mention_count INTEGER NOT NULL DEFAULT 0,
            relationships_json TEXT,
            created_at INTEGER NOT NULL,
            UNIQUE(source_id, name),
            FOREIGN KEY (source_id) REFERENCES sources(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS images (
            id TEXT PRIMARY KEY,
            character_id TEXT NOT NULL,
            path TEXT NOT NULL,
            prompt TEXT NOT NULL,
            style TEXT NOT NULL,
            aspect_ratio TEXT NOT NULL,
            duration_ms INTEGER NOT NULL,
            outcome TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            FOREIGN KEY (character_id) REFERENCES characters(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_characters_source_id ON characters(source_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_images_character_id ON images(character_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_sources_title_norm ON sources(title_norm)")
        .execute(pool)
        .await?;

    Ok(())
}
