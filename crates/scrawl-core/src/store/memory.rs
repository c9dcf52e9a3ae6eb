//! In-process remote store for tests and offline development.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex};

use super::{ChangeNotifier, RemoteError, RemoteResult, RemoteStore};
use crate::models::{Note, NoteId};

#[derive(Default)]
struct Inner {
    notes: HashMap<String, Note>,
    latency: Option<Duration>,
    failure: Option<String>,
}

/// A `RemoteStore` that lives in process memory.
///
/// Supports injectable latency and failure so coordinator tests can
/// exercise the timeout and error paths without a network.
#[derive(Clone, Default)]
pub struct MemoryRemoteStore {
    inner: Arc<Mutex<Inner>>,
    list_calls: Arc<AtomicU64>,
    upsert_calls: Arc<AtomicU64>,
    changes: Arc<ChangeNotifier>,
}

impl MemoryRemoteStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            list_calls: Arc::new(AtomicU64::new(0)),
            upsert_calls: Arc::new(AtomicU64::new(0)),
            changes: Arc::new(ChangeNotifier::new()),
        }
    }

    /// Delay every operation by `latency`.
    pub async fn set_latency(&self, latency: Option<Duration>) {
        self.inner.lock().await.latency = latency;
    }

    /// Make every operation fail with `message` until cleared with `None`.
    pub async fn set_failure(&self, message: Option<String>) {
        self.inner.lock().await.failure = message;
    }

    /// All stored notes regardless of owner, unordered.
    pub async fn snapshot(&self) -> Vec<Note> {
        self.inner.lock().await.notes.values().cloned().collect()
    }

    /// Number of `list` calls that reached the store.
    #[must_use]
    pub fn list_calls(&self) -> u64 {
        self.list_calls.load(Ordering::SeqCst)
    }

    /// Number of `upsert` calls that reached the store.
    #[must_use]
    pub fn upsert_calls(&self) -> u64 {
        self.upsert_calls.load(Ordering::SeqCst)
    }

    async fn checkpoint(&self) -> RemoteResult<()> {
        let (latency, failure) = {
            let inner = self.inner.lock().await;
            (inner.latency, inner.failure.clone())
        };
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if let Some(message) = failure {
            return Err(RemoteError::Unavailable(message));
        }
        Ok(())
    }
}

impl RemoteStore for MemoryRemoteStore {
    async fn list(&self, user_id: &str) -> RemoteResult<Vec<Note>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.checkpoint().await?;

        let inner = self.inner.lock().await;
        let mut notes: Vec<Note> = inner
            .notes
            .values()
            .filter(|note| note.user_id == user_id)
            .cloned()
            .collect();
        notes.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| a.id.as_str().cmp(b.id.as_str())));
        Ok(notes)
    }

    async fn get(&self, id: &NoteId) -> RemoteResult<Option<Note>> {
        self.checkpoint().await?;
        let inner = self.inner.lock().await;
        Ok(inner.notes.get(id.as_str()).cloned())
    }

    async fn upsert(&self, note: &Note, user_id: &str) -> RemoteResult<NoteId> {
        self.upsert_calls.fetch_add(1, Ordering::SeqCst);
        self.checkpoint().await?;

        let mut stored = note.clone();
        stored.user_id = user_id.to_string();
        if stored.id.is_unassigned() {
            stored.id = NoteId::generate();
        }
        let id = stored.id.clone();

        self.inner
            .lock()
            .await
            .notes
            .insert(id.as_str().to_string(), stored);
        self.changes.notify();
        Ok(id)
    }

    async fn delete(&self, id: &NoteId) -> RemoteResult<()> {
        self.checkpoint().await?;
        let removed = self.inner.lock().await.notes.remove(id.as_str());
        if removed.is_some() {
            self.changes.notify();
        }
        Ok(())
    }

    fn subscribe(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn note(id: &str, user_id: &str, updated_at: i64) -> Note {
        let mut note = Note::new("title", "body");
        note.id = NoteId::from(id);
        note.user_id = user_id.to_string();
        note.updated_at = updated_at;
        note
    }

    #[tokio::test]
    async fn upsert_assigns_an_id_when_absent() {
        let store = MemoryRemoteStore::new();
        let draft = Note::new("draft", "needs an id");

        let id = store.upsert(&draft, "user-1").await.unwrap();
        assert!(!id.is_unassigned());

        let stored = store.get(&id).await.unwrap().unwrap();
        assert_eq!(stored.user_id, "user-1");
        assert_eq!(stored.title, "draft");
    }

    #[tokio::test]
    async fn list_is_scoped_by_user_and_newest_first() {
        let store = MemoryRemoteStore::new();
        store.upsert(&note("a", "user-1", 100), "user-1").await.unwrap();
        store.upsert(&note("b", "user-1", 300), "user-1").await.unwrap();
        store.upsert(&note("c", "user-2", 200), "user-2").await.unwrap();

        let notes = store.list("user-1").await.unwrap();
        assert_eq!(notes.len(), 2);
        assert_eq!(notes[0].id.as_str(), "b");
    }

    #[tokio::test]
    async fn injected_failure_surfaces_as_error() {
        let store = MemoryRemoteStore::new();
        store.set_failure(Some("connection reset".to_string())).await;

        let error = store.list("user-1").await.unwrap_err();
        assert!(error.to_string().contains("connection reset"));

        store.set_failure(None).await;
        assert!(store.list("user-1").await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn injected_latency_delays_operations() {
        let store = MemoryRemoteStore::new();
        store.set_latency(Some(Duration::from_secs(3))).await;

        let started = tokio::time::Instant::now();
        store.list("user-1").await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(3));
    }
}
