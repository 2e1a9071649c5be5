//! Typed query layer over the metadata store.
//!
//! The store is the synchronization point for duplicate-title
//! resolution: deletion of a prior same-title source and the cascade
//! over its characters and images run inside a single transaction.
//! Filesystem deletions (index files, image files) are the caller's
//! responsibility and are best-effort.

use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::error::PipelineError;
use crate::models::{CanonicalCharacter, ImageOutcome, ImageRecord, ProcessingState, SourceDocument};

/// Normalized title used for the at-most-one-source-per-title invariant.
pub fn normalize_title(title: &str) -> String {
    title.trim().to_lowercase()
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

// ============ Sources ============

/// Insert a new source in `processing` state and return its record. The
/// caller supplies the id because the index path derives from it.
pub async fn insert_source(
    pool: &SqlitePool,
    source_id: &str,
    title: &str,
    author: &str,
    index_path: &str,
) -> Result<SourceDocument, PipelineError> {
    let source = SourceDocument {
        id: source_id.to_string(),
        title: title.to_string(),
        author: author.to_string(),
        state: ProcessingState::Processing,
        index_path: index_path.to_string(),
        character_count: 0,
        failure_reason: None,
        created_at: now(),
        updated_at: now(),
    };

    sqlx::query(
        r#"
        INSERT INTO sources (id, title, title_norm, author, state, index_path, character_count, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, 0, ?, ?)
        "#,
    )
    .bind(&source.id)
    .bind(&source.title)
    .bind(normalize_title(&source.title))
    .bind(&source.author)
    .bind(source.state.as_str())
    .bind(&source.index_path)
    .bind(source.created_at)
    .bind(source.updated_at)
    .execute(pool)
    .await?;

    Ok(source)
}

/// Every source whose normalized title matches; the supersession path
/// deletes all of them before a re-ingest proceeds.
pub async fn find_sources_by_title(
    pool: &SqlitePool,
    title: &str,
) -> Result<Vec<SourceDocument>, PipelineError> {
    let rows = sqlx::query("SELECT * FROM sources WHERE title_norm = ?")
        .bind(normalize_title(title))
        .fetch_all(pool)
        .await?;
    Ok(rows.iter().map(source_from_row).collect())
}

pub async fn get_source(
    pool: &SqlitePool,
    source_id: &str,
) -> Result<Option<SourceDocument>, PipelineError> {
    let row = sqlx::query("SELECT * FROM sources WHERE id = ?")
        .bind(source_id)
        .fetch_optional(pool)
        .await?;
    Ok(row.as_ref().map(source_from_row))
}

pub async fn list_sources(pool: &SqlitePool) -> Result<Vec<SourceDocument>, PipelineError> {
    let rows = sqlx::query("SELECT * FROM sources ORDER BY created_at DESC, id")
        .fetch_all(pool)
        .await?;
    Ok(rows.iter().map(source_from_row).collect())
}

/// Transition a source to `completed` and record its character count.
pub async fn mark_completed(
    pool: &SqlitePool,
    source_id: &str,
    character_count: i64,
) -> Result<(), PipelineError> {
    sqlx::query(
        "UPDATE sources SET state = 'completed', character_count = ?, failure_reason = NULL, updated_at = ? WHERE id = ?",
    )
    .bind(character_count)
    .bind(now())
    .bind(source_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Transition a source to `failed`, retaining the reason.
pub async fn mark_failed(
    pool: &SqlitePool,
    source_id: &str,
    reason: &str,
) -> Result<(), PipelineError> {
    sqlx::query("UPDATE sources SET state = 'failed', failure_reason = ?, updated_at = ? WHERE id = ?")
        .bind(reason)
        .bind(now())
        .bind(source_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// The image file paths recorded for a source's characters, for
/// best-effort filesystem cleanup before row deletion.
pub async fn image_paths_for_source(
    pool: &SqlitePool,
    source_id: &str,
) -> Result<Vec<String>, PipelineError> {
    let rows = sqlx::query(
        "SELECT path FROM images WHERE character_id IN (SELECT id FROM characters WHERE source_id = ?)",
    )
    .bind(source_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(|row| row.get("path")).collect())
}

/// Delete a source and everything it owns (image records, characters,
/// the source row) in one transaction.
pub async fn delete_source_rows(
    pool: &SqlitePool,
    source_id: &str,
) -> Result<(), PipelineError> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        "DELETE FROM images WHERE character_id IN (SELECT id FROM characters WHERE source_id = ?)",
    )
    .bind(source_id)
    .execute(&mut *tx)
    .await?;

    sqlx::query("DELETE FROM characters WHERE source_id = ?")
        .bind(source_id)
        .execute(&mut *tx)
        .await?;

    sqlx::query("DELETE FROM sources WHERE id = ?")
        .bind(source_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(())
}

/// Delete any partially persisted characters for a source. Used by the
/// ingest failure path before the source is marked `failed`.
pub async fn delete_characters_for_source(
    pool: &SqlitePool,
    source_id: &str,
) -> Result<(), PipelineError> {
    let mut tx = pool.begin().await?;
    sqlx::query(
        "DELETE FROM images WHERE character_id IN (SELECT id FROM characters WHERE source_id = ?)",
    )
    .bind(source_id)
    .execute(&mut *tx)
    .await?;
    sqlx::query("DELETE FROM characters WHERE source_id = ?")
        .bind(source_id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(())
}

// ============ Characters ============

pub async fn insert_character(
    pool: &SqlitePool,
    source_id: &str,
    profile: &crate::models::CharacterProfile,
) -> Result<CanonicalCharacter, PipelineError> {
    let character = CanonicalCharacter {
        id: Uuid::new_v4().to_string(),
        source_id: source_id.to_string(),
        name: profile.name.clone(),
        description: profile.description.clone(),
        seed: profile.seed,
        mention_count: profile.mention_count,
        relationships_json: None,
        created_at: now(),
    };

    sqlx::query(
        r#"
        INSERT INTO characters (id, source_id, name, description, seed, mention_count, relationships_json, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&character.id)
    .bind(&character.source_id)
    .bind(&character.name)
    .bind(&character.description)
    .bind(character.seed as i64)
    .bind(character.mention_count)
    .bind(&character.relationships_json)
    .bind(character.created_at)
    .execute(pool)
    .await?;

    Ok(character)
}

pub async fn get_character(
    pool: &SqlitePool,
    character_id: &str,
) -> Result<Option<CanonicalCharacter>, PipelineError> {
    let row = sqlx::query("SELECT * FROM characters WHERE id = ?")
        .bind(character_id)
        .fetch_optional(pool)
        .await?;
    Ok(row.as_ref().map(character_from_row))
}

/// Characters of a source, ordered by `mention_count` descending, then
/// by name ascending.
pub async fn list_characters(
    pool: &SqlitePool,
    source_id: &str,
) -> Result<Vec<CanonicalCharacter>, PipelineError> {
    let rows = sqlx::query(
        "SELECT * FROM characters WHERE source_id = ? ORDER BY mention_count DESC, name ASC",
    )
    .bind(source_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(character_from_row).collect())
}

pub async fn count_characters(
    pool: &SqlitePool,
    source_id: &str,
) -> Result<i64, PipelineError> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM characters WHERE source_id = ?")
        .bind(source_id)
        .fetch_one(pool)
        .await?;
    Ok(count)
}

// ============ Images ============

pub async fn insert_image(
    pool: &SqlitePool,
    character_id: &str,
    portrait: &crate::imagegen::GeneratedPortrait,
    style: &str,
    aspect_ratio: &str,
) -> Result<ImageRecord, PipelineError> {
    let record = ImageRecord {
        id: Uuid::new_v4().to_string(),
        character_id: character_id.to_string(),
        path: portrait.path.display().to_string(),
        prompt: portrait.prompt.clone(),
        style: style.to_string(),
        aspect_ratio: aspect_ratio.to_string(),
        duration_ms: portrait.duration_ms,
        outcome: portrait.outcome,
        created_at: now(),
    };

    sqlx::query(
        r#"
        INSERT INTO images (id, character_id, path, prompt, style, aspect_ratio, duration_ms, outcome, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&record.id)
    .bind(&record.character_id)
    .bind(&record.path)
    .bind(&record.prompt)
    .bind(&record.style)
    .bind(&record.aspect_ratio)
    .bind(record.duration_ms)
    .bind(record.outcome.as_str())
    .bind(record.created_at)
    .execute(pool)
    .await?;

    Ok(record)
}

/// The most recent image record for a character, if any.
pub async fn current_image(
    pool: &SqlitePool,
    character_id: &str,
) -> Result<Option<ImageRecord>, PipelineError> {
    let row = sqlx::query(
        "SELECT * FROM images WHERE character_id = ? ORDER BY created_at DESC, rowid DESC LIMIT 1",
    )
    .bind(character_id)
    .fetch_optional(pool)
    .await?;
    Ok(row.as_ref().map(image_from_row))
}

pub async fn list_images(
    pool: &SqlitePool,
    character_id: &str,
) -> Result<Vec<ImageRecord>, PipelineError> {
    let rows = sqlx::query(
        "SELECT * FROM images WHERE character_id = ? ORDER BY created_at DESC, rowid DESC",
    )
    .bind(character_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(image_from_row).collect())
}

// ============ Row mapping ============

fn source_from_row(row: &sqlx::sqlite::SqliteRow) -> SourceDocument {
    let state: String = row.get("state");
    SourceDocument {
        id: row.get("id"),
        title: row.get("title"),
        author: row.get("author"),
        state: ProcessingState::parse(&state),
        index_path: row.get("index_path"),
        character_count: row.get("character_count"),
        failure_reason: row.get("failure_reason"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn character_from_row(row: &sqlx::sqlite::SqliteRow) -> CanonicalCharacter {
    let seed: i64 = row.get("seed");
    CanonicalCharacter {
        id: row.get("id"),
        source_id: row.get("source_id"),
        name: row.get("name"),
        description: row.get("description"),
        seed: seed as u32,
        mention_count: row.get("mention_count"),
        relationships_json: row.get("relationships_json"),
        created_at: row.get("created_at"),
    }
}

fn image_from_row(row: &sqlx::sqlite::SqliteRow) -> ImageRecord {
    let outcome: String = row.get("outcome");
    ImageRecord {
        id: row.get("id"),
        character_id: row.get("character_id"),
        path: row.get("path"),
        prompt: row.get("prompt"),
        style: row.get("style"),
        aspect_ratio: row.get("aspect_ratio"),
        duration_ms: row.get("duration_ms"),
        outcome: ImageOutcome::parse(&outcome),
        created_at: row.get("created_at"),
    }
}
