//! Command implementations and shared helpers for the Scrawl CLI.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use scrawl_core::auth::AuthContext;
use scrawl_core::projection::{active_view, archived_view};
use scrawl_core::reconcile::Reconciler;
use scrawl_core::store::{
    HttpRemoteStore, LibsqlLocalStore, LocalStore, MemoryRemoteStore, RemoteResult, RemoteStore,
};
use scrawl_core::sync::{SyncConfig, SyncCoordinator, SyncOutcome, SyncTrigger};
use scrawl_core::{Note, NoteId};
use tokio::sync::watch;

use crate::error::CliError;

/// Remote side of the CLI composition.
///
/// Falls back to an in-process store when no API endpoint is configured,
/// so local commands keep working offline.
pub enum RemoteHandle {
    Http(HttpRemoteStore),
    Offline(MemoryRemoteStore),
}

impl RemoteStore for RemoteHandle {
    async fn list(&self, user_id: &str) -> RemoteResult<Vec<Note>> {
        match self {
            Self::Http(store) => store.list(user_id).await,
            Self::Offline(store) => store.list(user_id).await,
        }
    }

    async fn get(&self, id: &NoteId) -> RemoteResult<Option<Note>> {
        match self {
            Self::Http(store) => store.get(id).await,
            Self::Offline(store) => store.get(id).await,
        }
    }

    async fn upsert(&self, note: &Note, user_id: &str) -> RemoteResult<NoteId> {
        match self {
            Self::Http(store) => store.upsert(note, user_id).await,
            Self::Offline(store) => store.upsert(note, user_id).await,
        }
    }

    async fn delete(&self, id: &NoteId) -> RemoteResult<()> {
        match self {
            Self::Http(store) => store.delete(id).await,
            Self::Offline(store) => store.delete(id).await,
        }
    }

    fn subscribe(&self) -> watch::Receiver<u64> {
        match self {
            Self::Http(store) => store.subscribe(),
            Self::Offline(store) => store.subscribe(),
        }
    }
}

/// Composition root for one CLI invocation.
pub struct App {
    local: Arc<LibsqlLocalStore>,
    auth: AuthContext,
    reconciler: Reconciler<LibsqlLocalStore, RemoteHandle>,
    coordinator: SyncCoordinator<LibsqlLocalStore, RemoteHandle>,
    remote_configured: bool,
}

impl App {
    pub async fn open(db_path: &Path) -> Result<Self, CliError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let local = Arc::new(LibsqlLocalStore::open(db_path).await.map_err(CliError::Core)?);

        let auth = AuthContext::new();
        if let Some(user_id) = env_value("SCRAWL_USER_ID") {
            auth.sign_in(user_id).map_err(CliError::Core)?;
        }

        let (remote, remote_configured) = match env_value("SCRAWL_API_URL") {
            Some(url) => {
                tracing::debug!(%url, "using remote API");
                let mut store = HttpRemoteStore::new(url)
                    .map_err(|error| CliError::Config(error.to_string()))?;
                if let Some(token) = env_value("SCRAWL_API_TOKEN") {
                    store = store.with_auth_token(token);
                }
                (RemoteHandle::Http(store), true)
            }
            None => (RemoteHandle::Offline(MemoryRemoteStore::new()), false),
        };
        let remote = Arc::new(remote);

        let reconciler = Reconciler::new(Arc::clone(&local), Arc::clone(&remote), auth.clone());
        let coordinator = SyncCoordinator::new(
            Arc::clone(&local),
            Arc::clone(&remote),
            auth.clone(),
            SyncConfig::default(),
        );

        Ok(Self {
            local,
            auth,
            reconciler,
            coordinator,
            remote_configured,
        })
    }

    pub async fn add(&self, title: &str, description: Option<&str>) -> Result<(), CliError> {
        let title = normalize_text(title).ok_or(CliError::EmptyTitle)?;
        let description = description.and_then(normalize_text).unwrap_or_default();

        let note = self
            .reconciler
            .upsert(Note::new(title, description))
            .await
            .map_err(CliError::Core)?;
        println!("{}", note.id);
        Ok(())
    }

    pub async fn list(&self, archived: bool, query: &str, json: bool) -> Result<(), CliError> {
        let notes = self
            .local
            .list(&self.auth.current_user())
            .await
            .map_err(CliError::Core)?;
        let view = if archived {
            archived_view(&notes, query)
        } else {
            active_view(&notes, query)
        };
        render_notes(&view, json)
    }

    pub async fn search(&self, query: &str, json: bool) -> Result<(), CliError> {
        let query = normalize_text(query).ok_or(CliError::EmptySearchQuery)?;
        let notes = self
            .local
            .search(&query, &self.auth.current_user())
            .await
            .map_err(CliError::Core)?;
        render_notes(&notes, json)
    }

    pub async fn pin(&self, id_or_prefix: &str, off: bool) -> Result<(), CliError> {
        let note = self.resolve_note(id_or_prefix).await?;
        self.reconciler
            .set_pinned(&note.id, !off)
            .await
            .map_err(CliError::Core)?;
        println!("{} {}", if off { "Unpinned" } else { "Pinned" }, note.id);
        Ok(())
    }

    pub async fn archive(&self, id_or_prefix: &str, off: bool) -> Result<(), CliError> {
        let note = self.resolve_note(id_or_prefix).await?;
        self.reconciler
            .set_archived(&note.id, !off)
            .await
            .map_err(CliError::Core)?;
        println!("{} {}", if off { "Restored" } else { "Archived" }, note.id);
        Ok(())
    }

    pub async fn delete(&self, id_or_prefix: &str) -> Result<(), CliError> {
        let note = self.resolve_note(id_or_prefix).await?;
        self.reconciler.delete(&note).await.map_err(CliError::Core)?;
        println!("Deleted {}", note.id);
        Ok(())
    }

    pub async fn sync(&self) -> Result<(), CliError> {
        if !self.remote_configured || !self.auth.is_signed_in() {
            return Err(CliError::SyncNotConfigured);
        }

        match self.coordinator.trigger(SyncTrigger::Manual).await {
            SyncOutcome::Completed(report) => {
                println!(
                    "Sync complete: {} adopted, {} pulled, {} pushed",
                    report.adopted, report.pulled, report.pushed
                );
                Ok(())
            }
            SyncOutcome::Failed(reason) => Err(CliError::Config(reason)),
            SyncOutcome::SkippedBusy => {
                println!("Sync already in progress");
                Ok(())
            }
            SyncOutcome::SkippedCooldown => {
                println!("Sync skipped: tried again too soon");
                Ok(())
            }
        }
    }

    pub async fn status(&self) -> Result<(), CliError> {
        let user_id = self.auth.current_user();
        let notes = self.local.list(&user_id).await.map_err(CliError::Core)?;
        let active = notes.iter().filter(|note| !note.is_archived).count();
        let archived = notes.len() - active;

        println!("User:     {user_id}");
        println!(
            "Remote:   {}",
            if self.remote_configured {
                "configured"
            } else {
                "not configured"
            }
        );
        println!("Notes:    {active} active, {archived} archived");
        println!("Status:   {}", self.coordinator.status().status_text);
        Ok(())
    }

    async fn resolve_note(&self, id_or_prefix: &str) -> Result<Note, CliError> {
        let prefix = normalize_text(id_or_prefix).ok_or(CliError::EmptyNoteId)?;
        let notes = self
            .local
            .list(&self.auth.current_user())
            .await
            .map_err(CliError::Core)?;

        let matches: Vec<&Note> = notes
            .iter()
            .filter(|note| note.id.as_str().starts_with(&prefix))
            .collect();
        match matches.as_slice() {
            [] => Err(CliError::NoteNotFound(prefix)),
            [only] => Ok((*only).clone()),
            many => Err(CliError::AmbiguousNoteId(format!(
                "Prefix '{prefix}' matches {} notes; use more characters",
                many.len()
            ))),
        }
    }
}

/// Trim text and reject whitespace-only values.
pub fn normalize_text(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Short id form shown in listings.
pub fn short_id(id: &NoteId) -> String {
    id.as_str().chars().take(8).collect()
}

/// One listing line: short id, flag markers, title.
pub fn note_line(note: &Note) -> String {
    let marker = if note.is_pinned {
        "*"
    } else if note.is_archived {
        "~"
    } else {
        " "
    };
    let title = if note.title.trim().is_empty() {
        "(untitled)"
    } else {
        note.title.trim()
    };
    format!("{} {} {}", short_id(&note.id), marker, title)
}

fn render_notes(notes: &[Note], json: bool) -> Result<(), CliError> {
    if json {
        println!("{}", serde_json::to_string_pretty(notes)?);
        return Ok(());
    }
    if notes.is_empty() {
        println!("No notes");
        return Ok(());
    }
    for note in notes {
        println!("{}", note_line(note));
    }
    Ok(())
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

/// Default on-disk database location.
pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("scrawl")
        .join("scrawl.db")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn normalize_text_trims_and_rejects_empty() {
        assert_eq!(normalize_text("  hello  "), Some("hello".to_string()));
        assert_eq!(normalize_text(" \n\t "), None);
    }

    #[test]
    fn note_line_marks_pins_and_archives() {
        let mut note = Note::new("Grocery run", "");
        note.id = NoteId::from("0123456789abcdef");
        assert_eq!(note_line(&note), "01234567   Grocery run");

        note.set_pinned(true);
        assert!(note_line(&note).contains(" * "));

        note.set_archived(true);
        assert!(note_line(&note).contains(" ~ "));
    }

    #[test]
    fn note_line_falls_back_for_untitled_notes() {
        let mut note = Note::new("   ", "body only");
        note.id = NoteId::from("abcd1234");
        assert!(note_line(&note).contains("(untitled)"));
    }

    #[test]
    fn default_db_path_ends_with_app_directory() {
        let path = default_db_path();
        assert!(path.ends_with("scrawl/scrawl.db"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn resolve_note_handles_missing_and_ambiguous_prefixes() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("scrawl.db");
        let app = App::open(&db_path).await.unwrap();

        app.add("first note", None).await.unwrap();
        app.add("second note", None).await.unwrap();

        let missing = app.resolve_note("zzzz").await;
        assert!(matches!(missing, Err(CliError::NoteNotFound(_))));

        // Every generated id shares no guaranteed prefix, but the empty-ish
        // single-character case should at least not panic.
        let broad = app.resolve_note("0").await;
        assert!(broad.is_ok() || matches!(broad, Err(CliError::NoteNotFound(_) | CliError::AmbiguousNoteId(_))));
    }
}
