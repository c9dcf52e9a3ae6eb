//! Reconciliation between the local store and the remote mirror.
//!
//! `merge` is the whole conflict story: one logical note per id survives,
//! chosen by last-writer-wins on `updated_at` with the entire record
//! winning wholesale. There are no vector clocks and no per-field merges,
//! and clock skew between writing devices is a documented limitation, not
//! a handled case.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::watch;

use crate::auth::{is_guest, AuthContext};
use crate::error::{Error, Result};
use crate::models::{Note, NoteId};
use crate::store::{LocalStore, RemoteStore};
use crate::util::unix_ms_now;

/// Merge two note snapshots into one deduplicated, freshness-resolved view.
///
/// Pure and deterministic: for each id the copy with the greater
/// `updated_at` wins; on an exact tie the local copy wins, which avoids
/// redundant remote writes during the next push. The result is ordered by
/// `updated_at` descending with the id as secondary key, so re-running on
/// unchanged inputs yields an equal-by-value result.
#[must_use]
pub fn merge(local: &[Note], remote: &[Note]) -> Vec<Note> {
    let mut winners: HashMap<&str, &Note> = HashMap::new();
    // Local first; a later candidate replaces only when strictly newer.
    for note in local.iter().chain(remote) {
        match winners.get(note.id.as_str()) {
            Some(current) if current.updated_at >= note.updated_at => {}
            _ => {
                winners.insert(note.id.as_str(), note);
            }
        }
    }

    let mut merged: Vec<Note> = winners.into_values().cloned().collect();
    merged.sort_by(|a, b| {
        b.updated_at
            .cmp(&a.updated_at)
            .then_with(|| a.id.as_str().cmp(b.id.as_str()))
    });
    merged
}

/// Write path over both stores.
///
/// The local store is the durability floor: local failures propagate to
/// the caller, while remote failures are logged and left for the next
/// sync to repair.
pub struct Reconciler<L, R> {
    local: Arc<L>,
    remote: Arc<R>,
    auth: AuthContext,
}

impl<L: LocalStore, R: RemoteStore> Reconciler<L, R> {
    pub fn new(local: Arc<L>, remote: Arc<R>, auth: AuthContext) -> Self {
        Self {
            local,
            remote,
            auth,
        }
    }

    /// Persist a note, stamping ownership and freshness.
    ///
    /// Blank ownership becomes the caller's current user; `updated_at` is
    /// refreshed to now; an unassigned id is minted here, after which this
    /// store is authoritative for it. Guest-owned notes never reach the
    /// remote.
    pub async fn upsert(&self, mut note: Note) -> Result<Note> {
        if note.user_id.trim().is_empty() {
            note.user_id = self.auth.current_user();
        }
        note.normalize_flags();
        note.updated_at = unix_ms_now();
        if note.id.is_unassigned() {
            note.id = NoteId::generate();
        }

        self.local.upsert(&note).await?;

        if !is_guest(&note.user_id) {
            if let Err(error) = self.remote.upsert(&note, &note.user_id).await {
                tracing::warn!(
                    note_id = %note.id,
                    "Remote upsert failed; note stays local until the next sync: {error}"
                );
            }
        }

        Ok(note)
    }

    /// Pin or unpin a note; pinning clears archived.
    pub async fn set_pinned(&self, id: &NoteId, pinned: bool) -> Result<Note> {
        let mut note = self.require(id).await?;
        note.set_pinned(pinned);
        self.upsert(note).await
    }

    /// Archive or restore a note; archiving clears pinned.
    pub async fn set_archived(&self, id: &NoteId, archived: bool) -> Result<Note> {
        let mut note = self.require(id).await?;
        note.set_archived(archived);
        self.upsert(note).await
    }

    /// Remove a note from the local store and, for user-owned notes, from
    /// the remote. Remote failure is non-fatal; the note then lingers
    /// remotely until a later delete or sync round.
    pub async fn delete(&self, note: &Note) -> Result<()> {
        self.local.delete(&note.id).await?;

        if !is_guest(&note.user_id) {
            if let Err(error) = self.remote.delete(&note.id).await {
                tracing::warn!(
                    note_id = %note.id,
                    "Remote delete failed; will be retried manually: {error}"
                );
            }
        }

        Ok(())
    }

    async fn require(&self, id: &NoteId) -> Result<Note> {
        self.local
            .get(id)
            .await?
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }
}

/// Live merged view over both stores.
///
/// Recomputes the merge whenever either store (or the signed-in user)
/// changes, publishing through a watch channel. Snapshots of the two
/// stores are taken one after the other without a cross-store lock, so
/// they can disagree within a small window; the next change notification
/// converges the view (eventual consistency).
pub struct ReconciledFeed<L, R> {
    local: Arc<L>,
    remote: Arc<R>,
    auth: AuthContext,
    view: watch::Sender<Vec<Note>>,
}

impl<L: LocalStore, R: RemoteStore> ReconciledFeed<L, R> {
    pub fn new(local: Arc<L>, remote: Arc<R>, auth: AuthContext) -> Self {
        let (view, _) = watch::channel(Vec::new());
        Self {
            local,
            remote,
            auth,
            view,
        }
    }

    /// Watch the merged, deduplicated note sequence.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Vec<Note>> {
        self.view.subscribe()
    }

    /// Recompute the merged view from fresh snapshots and publish it if it
    /// changed. A remote read failure keeps the previous view instead of
    /// flickering remote-only notes in and out.
    pub async fn refresh(&self) -> Result<()> {
        let user_id = self.auth.current_user();
        let local_notes = self.local.list(&user_id).await?;

        let remote_notes = if is_guest(&user_id) {
            Vec::new()
        } else {
            match self.remote.list(&user_id).await {
                Ok(notes) => notes,
                Err(error) => {
                    tracing::warn!("Remote read failed; keeping previous merged view: {error}");
                    return Ok(());
                }
            }
        };

        let merged = merge(&local_notes, &remote_notes);
        self.view.send_if_modified(|view| {
            if *view == merged {
                false
            } else {
                *view = merged;
                true
            }
        });
        Ok(())
    }

    /// Drive the feed until every store change source has gone away.
    ///
    /// Callers spawn this next to the coordinator; it never panics and
    /// never lets a store error escape the loop.
    pub async fn run(&self) {
        let mut local_changes = self.local.subscribe();
        let mut remote_changes = self.remote.subscribe();
        let mut user_changes = self.auth.subscribe_user();

        if let Err(error) = self.refresh().await {
            tracing::warn!("Initial merged view refresh failed: {error}");
        }

        loop {
            tokio::select! {
                changed = local_changes.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                changed = remote_changes.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                changed = user_changes.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }

            if let Err(error) = self.refresh().await {
                tracing::warn!("Merged view refresh failed: {error}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::GUEST_USER_ID;
    use crate::store::{LibsqlLocalStore, MemoryRemoteStore};
    use pretty_assertions::assert_eq;

    fn note(id: &str, user_id: &str, title: &str, updated_at: i64) -> Note {
        let mut note = Note::new(title, format!("{title} body"));
        note.id = NoteId::from(id);
        note.user_id = user_id.to_string();
        note.updated_at = updated_at;
        note
    }

    async fn fixture() -> (
        Arc<LibsqlLocalStore>,
        Arc<MemoryRemoteStore>,
        AuthContext,
        Reconciler<LibsqlLocalStore, MemoryRemoteStore>,
    ) {
        let local = Arc::new(LibsqlLocalStore::open_in_memory().await.unwrap());
        let remote = Arc::new(MemoryRemoteStore::new());
        let auth = AuthContext::new();
        let reconciler = Reconciler::new(Arc::clone(&local), Arc::clone(&remote), auth.clone());
        (local, remote, auth, reconciler)
    }

    #[test]
    fn merge_is_idempotent_over_identical_inputs() {
        let snapshot = vec![
            note("a", "u", "first", 300),
            note("b", "u", "second", 100),
        ];

        let merged = merge(&snapshot, &snapshot);
        assert_eq!(merged, snapshot);
    }

    #[test]
    fn merge_newer_timestamp_wins_wholesale() {
        let local = vec![note("a", "u", "old", 100)];
        let remote = vec![note("a", "u", "new", 200)];

        let merged = merge(&local, &remote);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].title, "new");
        assert_eq!(merged[0].updated_at, 200);
    }

    #[test]
    fn merge_prefers_local_copy_on_exact_tie() {
        let local = vec![note("a", "u", "local copy", 100)];
        let remote = vec![note("a", "u", "remote copy", 100)];

        let merged = merge(&local, &remote);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].title, "local copy");
    }

    #[test]
    fn merge_sorts_by_freshness_descending_with_stable_ties() {
        let local = vec![note("b", "u", "tie", 200), note("c", "u", "old", 100)];
        let remote = vec![note("a", "u", "tie", 200), note("d", "u", "new", 300)];

        let merged = merge(&local, &remote);
        let ids: Vec<&str> = merged.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["d", "a", "b", "c"]);
    }

    #[test]
    fn merge_does_not_mutate_its_inputs() {
        let local = vec![note("a", "u", "local", 100)];
        let remote = vec![note("a", "u", "remote", 200)];
        let local_before = local.clone();

        let _ = merge(&local, &remote);
        assert_eq!(local, local_before);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn upsert_assigns_id_stamps_owner_and_bumps_freshness() {
        let (local, _remote, auth, reconciler) = fixture().await;
        auth.sign_in("user-1").unwrap();

        let before = unix_ms_now();
        let note = reconciler.upsert(Note::new("Groceries", "milk")).await.unwrap();

        assert!(!note.id.is_unassigned());
        assert_eq!(note.user_id, "user-1");
        assert!(note.updated_at >= before);

        let stored = local.get(&note.id).await.unwrap().unwrap();
        assert_eq!(stored, note);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn guest_upsert_never_reaches_the_remote() {
        let (local, remote, _auth, reconciler) = fixture().await;

        let note = reconciler.upsert(Note::new("Private", "local only")).await.unwrap();
        assert_eq!(note.user_id, GUEST_USER_ID);

        assert!(remote.snapshot().await.is_empty());
        assert_eq!(remote.upsert_calls(), 0);
        assert_eq!(local.list(GUEST_USER_ID).await.unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn signed_in_upsert_pushes_to_the_remote() {
        let (_local, remote, auth, reconciler) = fixture().await;
        auth.sign_in("user-1").unwrap();

        let note = reconciler.upsert(Note::new("Shared", "both stores")).await.unwrap();

        let mirrored = remote.get(&note.id).await.unwrap().unwrap();
        assert_eq!(mirrored.title, "Shared");
        assert_eq!(mirrored.user_id, "user-1");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn remote_failure_does_not_roll_back_the_local_write() {
        let (local, remote, auth, reconciler) = fixture().await;
        auth.sign_in("user-1").unwrap();
        remote.set_failure(Some("offline".to_string())).await;

        let note = reconciler.upsert(Note::new("Durable", "despite outage")).await.unwrap();

        assert!(local.get(&note.id).await.unwrap().is_some());
        assert!(remote.snapshot().await.is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn archive_clears_pin_through_the_write_path() {
        let (local, _remote, _auth, reconciler) = fixture().await;

        let note = reconciler.upsert(Note::new("Flagged", "")).await.unwrap();
        reconciler.set_pinned(&note.id, true).await.unwrap();
        let archived = reconciler.set_archived(&note.id, true).await.unwrap();

        assert!(archived.is_archived);
        assert!(!archived.is_pinned);

        let stored = local.get(&note.id).await.unwrap().unwrap();
        assert!(stored.is_archived);
        assert!(!stored.is_pinned);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn delete_removes_user_owned_note_from_both_stores() {
        let (local, remote, auth, reconciler) = fixture().await;
        auth.sign_in("user-1").unwrap();

        let note = reconciler.upsert(Note::new("Short lived", "")).await.unwrap();
        assert!(remote.get(&note.id).await.unwrap().is_some());

        reconciler.delete(&note).await.unwrap();
        assert!(local.get(&note.id).await.unwrap().is_none());
        assert!(remote.get(&note.id).await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn feed_publishes_merged_view_and_reacts_to_changes() {
        let (local, remote, auth, _reconciler) = fixture().await;
        auth.sign_in("user-1").unwrap();

        local.upsert(&note("a", "user-1", "stale local", 100)).await.unwrap();
        remote
            .upsert(&note("a", "user-1", "fresh remote", 200), "user-1")
            .await
            .unwrap();

        let feed = ReconciledFeed::new(Arc::clone(&local), Arc::clone(&remote), auth);
        let view = feed.subscribe();
        feed.refresh().await.unwrap();

        {
            let notes = view.borrow();
            assert_eq!(notes.len(), 1);
            assert_eq!(notes[0].title, "fresh remote");
        }

        local.upsert(&note("b", "user-1", "brand new", 300)).await.unwrap();
        feed.refresh().await.unwrap();
        assert_eq!(view.borrow().len(), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn feed_keeps_previous_view_when_remote_read_fails() {
        let (local, remote, auth, _reconciler) = fixture().await;
        auth.sign_in("user-1").unwrap();

        remote
            .upsert(&note("a", "user-1", "remote only", 200), "user-1")
            .await
            .unwrap();

        let feed = ReconciledFeed::new(Arc::clone(&local), Arc::clone(&remote), auth);
        let view = feed.subscribe();
        feed.refresh().await.unwrap();
        assert_eq!(view.borrow().len(), 1);

        remote.set_failure(Some("offline".to_string())).await;
        local.upsert(&note("b", "user-1", "local add", 300)).await.unwrap();
        feed.refresh().await.unwrap();

        // Remote unreachable: the last good view stands.
        assert_eq!(view.borrow().len(), 1);
    }
}
