//! SQLite persistence for notes.
//!
//! This is the durable side of the retrieval engine: one `notes` table with
//! the text, creation time, pin flag and optional embedding blob.
//!
//! ## Database Schema
//!
//! ```sql
//! CREATE TABLE notes (
//!     id INTEGER PRIMARY KEY AUTOINCREMENT,
//!     text TEXT NOT NULL,
//!     created_at INTEGER NOT NULL,   -- unix milliseconds, set once
//!     embedding BLOB,                -- little-endian f32 vector (optional)
//!     pinned INTEGER NOT NULL DEFAULT 0
//! );
//! ```
//!
//! Embeddings are stored as raw `f32` bytes. A `NULL` embedding means "not
//! yet computed" or "computation failed"; the engine repairs both lazily.
//! The store performs no locking of its own beyond the connection pool;
//! the engine worker is the sole mutator while a scan runs.

use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::path::Path;

/// A persisted text note.
///
/// The engine and callers work with transient copies; any embedding they
/// compute must be written back through [`NoteIndex::update_embedding`].
#[derive(Debug, Clone)]
pub struct Note {
    pub id: i64,
    pub text: String,
    /// Creation time in unix milliseconds, set once on insert.
    pub created_at: i64,
    /// `None` until the engine computes a vector for this note.
    pub embedding: Option<Vec<f32>>,
    /// Pinned notes are always surfaced and never pruned by top-k ranking.
    pub pinned: bool,
}

/// SQLite-backed note store.
#[derive(Clone, Debug)]
pub struct NoteIndex {
    pool: SqlitePool,
}

impl NoteIndex {
    /// Opens the note store at `<base>/.mnemo.db`, creating it if missing.
    pub async fn open(base: &Path) -> Result<Self> {
        let db_path = base.join(".mnemo.db");
        let pool = SqlitePool::connect_with(
            SqliteConnectOptions::new()
                .filename(db_path)
                .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
                .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
                .busy_timeout(std::time::Duration::from_secs(5))
                .create_if_missing(true),
        )
        .await?;
        Self::new_with_pool(pool).await
    }

    /// Opens an in-memory note store for testing.
    pub async fn open_memory() -> Result<Self> {
        let pool = SqlitePool::connect("sqlite::memory:").await?;
        Self::new_with_pool(pool).await
    }

    async fn new_with_pool(pool: SqlitePool) -> Result<Self> {
        Self::create_tables(&pool).await?;
        Ok(Self { pool })
    }

    async fn create_tables(pool: &SqlitePool) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS notes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                text TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                embedding BLOB,
                pinned INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_notes_created ON notes(created_at)")
            .execute(pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_notes_pinned ON notes(pinned)")
            .execute(pool)
            .await?;

        Ok(())
    }

    /// Insert a new note. The embedding starts out unset.
    pub async fn insert(&self, text: &str, pinned: bool) -> Result<Note> {
        let created_at = chrono::Utc::now().timestamp_millis();
        let result = sqlx::query("INSERT INTO notes (text, created_at, pinned) VALUES (?1, ?2, ?3)")
            .bind(text)
            .bind(created_at)
            .bind(pinned)
            .execute(&self.pool)
            .await?;

        Ok(Note {
            id: result.last_insert_rowid(),
            text: text.to_string(),
            created_at,
            embedding: None,
            pinned,
        })
    }

    /// Fetch a single note by id.
    pub async fn get(&self, id: i64) -> Result<Option<Note>> {
        let row = sqlx::query(
            "SELECT id, text, created_at, embedding, pinned FROM notes WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| note_from_row(&r)))
    }

    /// Replace a note's text. Editing invalidates any stored vector, so the
    /// embedding is cleared in the same write.
    pub async fn update_text(&self, id: i64, text: &str) -> Result<()> {
        sqlx::query("UPDATE notes SET text = ?1, embedding = NULL WHERE id = ?2")
            .bind(text)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Set or clear the pin flag.
    pub async fn set_pinned(&self, id: i64, pinned: bool) -> Result<()> {
        sqlx::query("UPDATE notes SET pinned = ?1 WHERE id = ?2")
            .bind(pinned)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Write back a computed embedding, or clear it with `None`.
    pub async fn update_embedding(&self, id: i64, embedding: Option<&[f32]>) -> Result<()> {
        let bytes = embedding.map(embedding_to_bytes);
        sqlx::query("UPDATE notes SET embedding = ?1 WHERE id = ?2")
            .bind(bytes)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Delete a note. Returns whether a row was removed.
    pub async fn delete(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM notes WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// All notes, newest first.
    pub async fn all_notes(&self) -> Result<Vec<Note>> {
        self.fetch_notes(
            "SELECT id, text, created_at, embedding, pinned FROM notes
             ORDER BY created_at DESC, id DESC",
        )
        .await
    }

    /// Pinned notes, newest first, regardless of embedding state.
    pub async fn pinned_notes(&self) -> Result<Vec<Note>> {
        self.fetch_notes(
            "SELECT id, text, created_at, embedding, pinned FROM notes
             WHERE pinned = 1 ORDER BY created_at DESC, id DESC",
        )
        .await
    }

    /// Notes with a computed embedding, newest first.
    pub async fn notes_with_embeddings(&self) -> Result<Vec<Note>> {
        self.fetch_notes(
            "SELECT id, text, created_at, embedding, pinned FROM notes
             WHERE embedding IS NOT NULL ORDER BY created_at DESC, id DESC",
        )
        .await
    }

    /// Unpinned notes with a computed embedding, newest first. This is the
    /// candidate set for similarity scoring.
    pub async fn unpinned_notes_with_embeddings(&self) -> Result<Vec<Note>> {
        self.fetch_notes(
            "SELECT id, text, created_at, embedding, pinned FROM notes
             WHERE embedding IS NOT NULL AND pinned = 0
             ORDER BY created_at DESC, id DESC",
        )
        .await
    }

    /// Total number of notes.
    pub async fn note_count(&self) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM notes")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Number of notes with a computed embedding.
    pub async fn embedded_count(&self) -> Result<i64> {
        let count =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM notes WHERE embedding IS NOT NULL")
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    /// Number of pinned notes.
    pub async fn pinned_count(&self) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM notes WHERE pinned = 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Get the underlying SQLite connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn fetch_notes(&self, sql: &str) -> Result<Vec<Note>> {
        let rows = sqlx::query(sql).fetch_all(&self.pool).await?;
        Ok(rows.iter().map(note_from_row).collect())
    }
}

fn note_from_row(row: &SqliteRow) -> Note {
    let embedding_bytes: Option<Vec<u8>> = row.get("embedding");
    Note {
        id: row.get("id"),
        text: row.get("text"),
        created_at: row.get("created_at"),
        embedding: embedding_bytes.as_deref().map(bytes_to_embedding),
        pinned: row.get("pinned"),
    }
}

fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    bytemuck::cast_slice(embedding).to_vec()
}

fn bytes_to_embedding(bytes: &[u8]) -> Vec<f32> {
    // pod_collect_to_vec copies, so blob alignment does not matter.
    bytemuck::pod_collect_to_vec(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_insert_and_get() -> Result<()> {
        let index = NoteIndex::open_memory().await?;

        let note = index.insert("buy milk", false).await?;
        assert!(note.id > 0);
        assert!(note.embedding.is_none());
        assert!(!note.pinned);

        let fetched = index.get(note.id).await?.expect("note should exist");
        assert_eq!(fetched.text, "buy milk");
        assert_eq!(fetched.created_at, note.created_at);
        assert!(fetched.embedding.is_none());

        assert!(index.get(9999).await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_all_notes_newest_first() -> Result<()> {
        let index = NoteIndex::open_memory().await?;

        let first = index.insert("first", false).await?;
        let second = index.insert("second", false).await?;
        let third = index.insert("third", false).await?;

        let notes = index.all_notes().await?;
        let ids: Vec<i64> = notes.iter().map(|n| n.id).collect();
        assert_eq!(ids, vec![third.id, second.id, first.id]);
        Ok(())
    }

    #[tokio::test]
    async fn test_embedding_blob_round_trip() -> Result<()> {
        let index = NoteIndex::open_memory().await?;
        let note = index.insert("buy milk", false).await?;

        let embedding = vec![0.25f32, -1.5, 0.0, 3.75];
        index.update_embedding(note.id, Some(&embedding)).await?;

        let fetched = index.get(note.id).await?.unwrap();
        assert_eq!(fetched.embedding, Some(embedding));

        index.update_embedding(note.id, None).await?;
        let fetched = index.get(note.id).await?.unwrap();
        assert!(fetched.embedding.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_update_text_clears_embedding() -> Result<()> {
        let index = NoteIndex::open_memory().await?;
        let note = index.insert("buy milk", false).await?;
        index
            .update_embedding(note.id, Some(&[1.0, 0.0, 0.0, 0.0]))
            .await?;

        index.update_text(note.id, "buy oat milk").await?;

        let fetched = index.get(note.id).await?.unwrap();
        assert_eq!(fetched.text, "buy oat milk");
        assert!(fetched.embedding.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_query_filters() -> Result<()> {
        let index = NoteIndex::open_memory().await?;

        let pinned = index.insert("pinned, no embedding", true).await?;
        let embedded = index.insert("unpinned, embedded", false).await?;
        index
            .update_embedding(embedded.id, Some(&[0.5, 0.5]))
            .await?;
        let pinned_embedded = index.insert("pinned, embedded", true).await?;
        index
            .update_embedding(pinned_embedded.id, Some(&[0.1, 0.9]))
            .await?;
        index.insert("unpinned, no embedding", false).await?;

        let pinned_notes = index.pinned_notes().await?;
        assert_eq!(pinned_notes.len(), 2);
        assert!(pinned_notes.iter().all(|n| n.pinned));
        assert!(pinned_notes.iter().any(|n| n.id == pinned.id));

        let with_embeddings = index.notes_with_embeddings().await?;
        assert_eq!(with_embeddings.len(), 2);

        let candidates = index.unpinned_notes_with_embeddings().await?;
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].id, embedded.id);

        assert_eq!(index.note_count().await?, 4);
        assert_eq!(index.embedded_count().await?, 2);
        assert_eq!(index.pinned_count().await?, 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_pin_and_delete() -> Result<()> {
        let index = NoteIndex::open_memory().await?;
        let note = index.insert("buy milk", false).await?;

        index.set_pinned(note.id, true).await?;
        assert!(index.get(note.id).await?.unwrap().pinned);

        index.set_pinned(note.id, false).await?;
        assert!(!index.get(note.id).await?.unwrap().pinned);

        assert!(index.delete(note.id).await?);
        assert!(!index.delete(note.id).await?);
        assert!(index.get(note.id).await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_open_creates_database_file() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let index = NoteIndex::open(temp_dir.path()).await?;
        index.insert("durable", false).await?;

        assert!(temp_dir.path().join(".mnemo.db").exists());
        Ok(())
    }
}
