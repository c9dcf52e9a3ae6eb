//! Local note store backed by libSQL.

use std::path::Path;

use libsql::{params, Builder, Connection, Database};
use tokio::sync::watch;

use super::{ChangeNotifier, LocalStore};
use crate::error::{Error, Result};
use crate::models::{Note, NoteColor, NoteId};

/// Current schema version
const CURRENT_VERSION: i32 = 1;

const NOTE_COLUMNS: &str =
    "id, user_id, title, description, image_refs, audio_ref, color, is_pinned, is_archived, updated_at";

/// On-device store for the reconciliation engine.
///
/// Raw CRUD only: timestamps and ownership arrive already stamped by the
/// write path. Every mutation bumps the change generation so live
/// consumers re-read without polling.
pub struct LibsqlLocalStore {
    // Keeps the database handle alive for the connection's lifetime.
    _db: Database,
    conn: Connection,
    changes: ChangeNotifier,
}

impl LibsqlLocalStore {
    /// Open a store at the given path, creating it if it doesn't exist.
    ///
    /// Runs migrations automatically.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();
        let db = Builder::new_local(&path_str).build().await?;
        Self::from_database(db).await
    }

    /// Open an in-memory store (useful for testing).
    pub async fn open_in_memory() -> Result<Self> {
        let db = Builder::new_local(":memory:").build().await?;
        Self::from_database(db).await
    }

    async fn from_database(db: Database) -> Result<Self> {
        let conn = db.connect()?;
        let store = Self {
            _db: db,
            conn,
            changes: ChangeNotifier::new(),
        };
        store.configure().await?;
        store.migrate().await?;
        Ok(store)
    }

    /// Configure `SQLite` for better concurrency; pragmas that are not
    /// supported everywhere are allowed to fail.
    async fn configure(&self) -> Result<()> {
        self.conn
            .execute("PRAGMA journal_mode = WAL;", ())
            .await
            .ok();
        self.conn
            .execute("PRAGMA synchronous = NORMAL;", ())
            .await
            .ok();
        self.conn.execute("PRAGMA foreign_keys = ON;", ()).await?;
        Ok(())
    }

    async fn migrate(&self) -> Result<()> {
        let version = self.schema_version().await?;
        if version < 1 {
            self.migrate_v1().await?;
        }
        if version < CURRENT_VERSION {
            tracing::info!("Migrated local store to version {CURRENT_VERSION}");
        }
        Ok(())
    }

    async fn schema_version(&self) -> Result<i32> {
        let mut rows = self
            .conn
            .query(
                "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
                (),
            )
            .await?;

        let exists = match rows.next().await? {
            Some(row) => row.get::<i32>(0)? != 0,
            None => false,
        };
        if !exists {
            return Ok(0);
        }

        let mut rows = self
            .conn
            .query("SELECT COALESCE(MAX(version), 0) FROM schema_version", ())
            .await?;
        let version = match rows.next().await? {
            Some(row) => row.get::<i32>(0)?,
            None => 0,
        };
        Ok(version)
    }

    async fn migrate_v1(&self) -> Result<()> {
        // libsql doesn't have execute_batch, so we run each statement
        // separately inside a transaction for atomicity.
        self.conn.execute("BEGIN TRANSACTION", ()).await?;

        let statements = [
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY
            )",
            "CREATE TABLE IF NOT EXISTS notes (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                title TEXT NOT NULL,
                description TEXT NOT NULL,
                image_refs TEXT,
                audio_ref TEXT,
                color TEXT NOT NULL DEFAULT 'default',
                is_pinned INTEGER NOT NULL DEFAULT 0,
                is_archived INTEGER NOT NULL DEFAULT 0,
                updated_at INTEGER NOT NULL
            )",
            "CREATE INDEX IF NOT EXISTS idx_notes_user ON notes(user_id)",
            "CREATE INDEX IF NOT EXISTS idx_notes_updated ON notes(updated_at DESC)",
            "INSERT INTO schema_version (version) VALUES (1)",
        ];

        for stmt in statements {
            if let Err(e) = self.conn.execute(stmt, ()).await {
                self.conn.execute("ROLLBACK", ()).await.ok();
                return Err(e.into());
            }
        }

        if let Err(e) = self.conn.execute("COMMIT", ()).await {
            self.conn.execute("ROLLBACK", ()).await.ok();
            return Err(e.into());
        }

        Ok(())
    }

    fn parse_note(row: &libsql::Row) -> Result<Note> {
        let image_refs = match row.get::<Option<String>>(4)? {
            Some(raw) => Some(serde_json::from_str::<Vec<String>>(&raw)?),
            None => None,
        };
        Ok(Note {
            id: NoteId::from(row.get::<String>(0)?),
            user_id: row.get::<String>(1)?,
            title: row.get::<String>(2)?,
            description: row.get::<String>(3)?,
            image_refs,
            audio_ref: row.get::<Option<String>>(5)?,
            color: NoteColor::parse(&row.get::<String>(6)?),
            is_pinned: row.get::<i32>(7)? != 0,
            is_archived: row.get::<i32>(8)? != 0,
            updated_at: row.get::<i64>(9)?,
        })
    }

    async fn collect_notes(&self, mut rows: libsql::Rows) -> Result<Vec<Note>> {
        let mut notes = Vec::new();
        while let Some(row) = rows.next().await? {
            notes.push(Self::parse_note(&row)?);
        }
        Ok(notes)
    }
}

impl LocalStore for LibsqlLocalStore {
    async fn list(&self, user_id: &str) -> Result<Vec<Note>> {
        let rows = self
            .conn
            .query(
                &format!(
                    "SELECT {NOTE_COLUMNS} FROM notes WHERE user_id = ? ORDER BY updated_at DESC, id"
                ),
                params![user_id],
            )
            .await?;
        self.collect_notes(rows).await
    }

    async fn get(&self, id: &NoteId) -> Result<Option<Note>> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {NOTE_COLUMNS} FROM notes WHERE id = ?"),
                params![id.as_str()],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(Self::parse_note(&row)?)),
            None => Ok(None),
        }
    }

    async fn upsert(&self, note: &Note) -> Result<()> {
        if note.id.is_unassigned() {
            return Err(Error::InvalidInput(
                "Cannot persist a note without an assigned id".to_string(),
            ));
        }

        let image_refs = note
            .image_refs
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        self.conn
            .execute(
                "INSERT INTO notes (id, user_id, title, description, image_refs, audio_ref,
                                    color, is_pinned, is_archived, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(id) DO UPDATE SET
                     user_id = excluded.user_id,
                     title = excluded.title,
                     description = excluded.description,
                     image_refs = excluded.image_refs,
                     audio_ref = excluded.audio_ref,
                     color = excluded.color,
                     is_pinned = excluded.is_pinned,
                     is_archived = excluded.is_archived,
                     updated_at = excluded.updated_at",
                params![
                    note.id.as_str(),
                    note.user_id.as_str(),
                    note.title.as_str(),
                    note.description.as_str(),
                    image_refs,
                    note.audio_ref.clone(),
                    note.color.as_str(),
                    i32::from(note.is_pinned),
                    i32::from(note.is_archived),
                    note.updated_at,
                ],
            )
            .await?;

        self.changes.notify();
        Ok(())
    }

    async fn delete(&self, id: &NoteId) -> Result<()> {
        let removed = self
            .conn
            .execute("DELETE FROM notes WHERE id = ?", params![id.as_str()])
            .await?;
        if removed > 0 {
            self.changes.notify();
        }
        Ok(())
    }

    async fn delete_all_for_user(&self, user_id: &str) -> Result<u64> {
        let removed = self
            .conn
            .execute("DELETE FROM notes WHERE user_id = ?", params![user_id])
            .await?;
        if removed > 0 {
            self.changes.notify();
        }
        Ok(removed)
    }

    async fn search(&self, query: &str, user_id: &str) -> Result<Vec<Note>> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return self.list(user_id).await;
        }

        let pattern = format!("%{needle}%");
        let rows = self
            .conn
            .query(
                &format!(
                    "SELECT {NOTE_COLUMNS} FROM notes
                     WHERE user_id = ?
                       AND (lower(title) LIKE ? OR lower(description) LIKE ?)
                     ORDER BY updated_at DESC, id"
                ),
                params![user_id, pattern.clone(), pattern],
            )
            .await?;
        self.collect_notes(rows).await
    }

    fn subscribe(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }
}
