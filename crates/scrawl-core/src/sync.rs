//! Sync coordinator: decides when reconciliation runs and reports on it.
//!
//! One logical sync slot per coordinator. Triggers arriving while a sync
//! is in flight are coalesced into a no-op, and triggers inside the
//! cooldown window are dropped silently. A failed or timed-out attempt is
//! terminal only for itself; the coordinator returns to idle and waits for
//! the next trigger (no automatic retry).

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tokio::time::Instant;

use crate::auth::{is_guest, AuthContext, AuthEvent, GUEST_USER_ID};
use crate::error::{Error, Result};
use crate::models::Note;
use crate::reconcile::merge;
use crate::store::{LocalStore, RemoteStore};

/// Minimum gap between successive sync attempts.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(5);
/// Hard upper bound on a single sync attempt.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// Timing knobs for the coordinator.
#[derive(Debug, Clone, Copy)]
pub struct SyncConfig {
    pub cooldown: Duration,
    pub timeout: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            cooldown: DEFAULT_COOLDOWN,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl SyncConfig {
    #[must_use]
    pub const fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// What asked for the sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
    /// Explicit user request
    Manual,
    /// Authentication state changed (sign-in)
    AuthChanged,
}

/// Work done by one completed sync attempt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Guest notes re-owned to the signed-in user
    pub adopted: usize,
    /// Merge winners written into the local store
    pub pulled: usize,
    /// Merge winners uploaded to the remote
    pub pushed: usize,
}

/// How a trigger call ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The attempt ran and finished within its deadline.
    Completed(SyncReport),
    /// The attempt ran and failed or timed out; the reason is also in the
    /// status record.
    Failed(String),
    /// Dropped: another sync was already in flight.
    SkippedBusy,
    /// Dropped: the cooldown window had not elapsed.
    SkippedCooldown,
}

/// Observable status record consumed by front-ends.
///
/// `result` is a one-shot message: display it once, then clear it with
/// [`SyncCoordinator::acknowledge_result`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncStatus {
    pub is_syncing: bool,
    pub status_text: String,
    pub result: Option<String>,
}

impl Default for SyncStatus {
    fn default() -> Self {
        Self {
            is_syncing: false,
            status_text: "Idle".to_string(),
            result: None,
        }
    }
}

#[derive(Debug, Default)]
struct Gate {
    syncing: bool,
    last_attempt_at: Option<Instant>,
}

/// Releases the sync slot when the attempt ends, including when the
/// `trigger` future is dropped mid-flight (caller timeout, task abort).
/// Without it a cancelled attempt would leave the coordinator busy
/// forever and the published status stuck on "Syncing".
struct SlotGuard<'a> {
    gate: &'a StdMutex<Gate>,
    status: &'a watch::Sender<SyncStatus>,
    in_flight: bool,
}

impl SlotGuard<'_> {
    /// Mark the attempt as having published its own final status.
    fn finish(&mut self) {
        self.in_flight = false;
    }
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut gate) = self.gate.lock() {
            gate.syncing = false;
        }
        if self.in_flight {
            tracing::warn!("Sync attempt cancelled; releasing the sync slot");
            self.status.send_replace(SyncStatus {
                is_syncing: false,
                status_text: "Idle".to_string(),
                result: Some("Sync cancelled".to_string()),
            });
        }
    }
}

/// Owner of the single sync slot and all sync bookkeeping.
///
/// `last_attempt_at` and the status record are mutated only through the
/// coordinator's entry points; no other component touches them.
pub struct SyncCoordinator<L, R> {
    local: Arc<L>,
    remote: Arc<R>,
    auth: AuthContext,
    config: SyncConfig,
    gate: StdMutex<Gate>,
    status: watch::Sender<SyncStatus>,
}

impl<L: LocalStore, R: RemoteStore> SyncCoordinator<L, R> {
    pub fn new(local: Arc<L>, remote: Arc<R>, auth: AuthContext, config: SyncConfig) -> Self {
        let (status, _) = watch::channel(SyncStatus::default());
        Self {
            local,
            remote,
            auth,
            config,
            gate: StdMutex::new(Gate::default()),
            status,
        }
    }

    /// Watch the status record.
    #[must_use]
    pub fn subscribe_status(&self) -> watch::Receiver<SyncStatus> {
        self.status.subscribe()
    }

    /// Snapshot of the current status record.
    #[must_use]
    pub fn status(&self) -> SyncStatus {
        self.status.borrow().clone()
    }

    /// Take the one-shot result message, clearing it for later readers.
    pub fn acknowledge_result(&self) -> Option<String> {
        let mut taken = None;
        self.status.send_if_modified(|status| {
            taken = status.result.take();
            taken.is_some()
        });
        taken
    }

    /// Single entry point for every sync trigger.
    ///
    /// Runs the attempt inline under the configured timeout. Dropped
    /// triggers (busy or cooldown) return immediately without touching the
    /// status record.
    pub async fn trigger(&self, trigger: SyncTrigger) -> SyncOutcome {
        {
            let mut gate = self.gate.lock().expect("sync gate poisoned");
            if gate.syncing {
                tracing::debug!(?trigger, "Sync already in flight; trigger coalesced");
                return SyncOutcome::SkippedBusy;
            }
            if let Some(last) = gate.last_attempt_at {
                if last.elapsed() < self.config.cooldown {
                    tracing::debug!(?trigger, "Sync trigger dropped inside cooldown window");
                    return SyncOutcome::SkippedCooldown;
                }
            }
            gate.syncing = true;
            gate.last_attempt_at = Some(Instant::now());
        }
        let mut slot = SlotGuard {
            gate: &self.gate,
            status: &self.status,
            in_flight: true,
        };

        tracing::info!(?trigger, "Sync started");
        self.status.send_replace(SyncStatus {
            is_syncing: true,
            status_text: "Syncing".to_string(),
            result: None,
        });

        // The timeout drops the in-flight future on expiry, so an abandoned
        // attempt cannot publish a stale result afterwards.
        let outcome = match tokio::time::timeout(self.config.timeout, self.sync_once()).await {
            Ok(Ok(report)) => {
                tracing::info!(
                    adopted = report.adopted,
                    pulled = report.pulled,
                    pushed = report.pushed,
                    "Sync finished"
                );
                self.status.send_replace(SyncStatus {
                    is_syncing: false,
                    status_text: "Idle".to_string(),
                    result: Some(format!(
                        "Sync complete ({} pulled, {} pushed)",
                        report.pulled, report.pushed
                    )),
                });
                SyncOutcome::Completed(report)
            }
            Ok(Err(error)) => self.fail(&error),
            Err(_elapsed) => self.fail(&Error::Timeout(self.config.timeout)),
        };

        slot.finish();
        outcome
    }

    /// Forward sign-in events into the trigger entry point until the auth
    /// context goes away. Callers spawn this once at composition time.
    pub async fn run_auth_triggers(&self, mut events: broadcast::Receiver<AuthEvent>) {
        loop {
            match events.recv().await {
                Ok(AuthEvent::SignedIn { user_id }) => {
                    tracing::debug!(user = %user_id, "Sign-in observed; requesting sync");
                    let _ = self.trigger(SyncTrigger::AuthChanged).await;
                }
                Ok(AuthEvent::SignedOut) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("Auth event stream lagged by {skipped} events");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    fn fail(&self, error: &Error) -> SyncOutcome {
        let reason = error.to_string();
        tracing::warn!("Sync failed: {reason}");
        self.status.send_replace(SyncStatus {
            is_syncing: false,
            status_text: "Idle".to_string(),
            result: Some(format!("Sync failed: {reason}")),
        });
        SyncOutcome::Failed(reason)
    }

    /// One bidirectional sync round.
    ///
    /// Snapshots are taken fresh from each store (never cached), one after
    /// the other without a cross-store lock; the small skew window this
    /// allows is converged by the next round.
    async fn sync_once(&self) -> Result<SyncReport> {
        let user_id = self.auth.current_user();
        let mut report = SyncReport::default();

        // Sign-in reconciliation: guest notes transfer to the signed-in
        // user, content and freshness untouched.
        if !is_guest(&user_id) {
            for mut note in self.local.list(GUEST_USER_ID).await? {
                note.user_id = user_id.clone();
                self.local.upsert(&note).await?;
                report.adopted += 1;
            }
        }

        let local_notes = self.local.list(&user_id).await?;
        let remote_notes = if is_guest(&user_id) {
            Vec::new()
        } else {
            self.remote.list(&user_id).await?
        };
        let merged = merge(&local_notes, &remote_notes);

        let local_by_id: HashMap<&str, &Note> = local_notes
            .iter()
            .map(|note| (note.id.as_str(), note))
            .collect();
        let remote_by_id: HashMap<&str, &Note> = remote_notes
            .iter()
            .map(|note| (note.id.as_str(), note))
            .collect();

        // Pull: merge winners that differ from the local copy. Raw upserts
        // preserve the winning record's timestamp.
        for note in &merged {
            let up_to_date = local_by_id
                .get(note.id.as_str())
                .is_some_and(|existing| *existing == note);
            if !up_to_date {
                self.local.upsert(note).await?;
                report.pulled += 1;
            }
        }

        // Push: winners missing from or stale on the remote. Guest rounds
        // never touch the remote at all.
        if !is_guest(&user_id) {
            for note in &merged {
                let up_to_date = remote_by_id
                    .get(note.id.as_str())
                    .is_some_and(|existing| existing.updated_at >= note.updated_at);
                if !up_to_date {
                    self.remote.upsert(note, &user_id).await?;
                    report.pushed += 1;
                }
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NoteId;
    use crate::store::{LibsqlLocalStore, MemoryRemoteStore};
    use pretty_assertions::assert_eq;
    use tokio::time::sleep;

    fn note(id: &str, user_id: &str, title: &str, updated_at: i64) -> Note {
        let mut note = Note::new(title, format!("{title} body"));
        note.id = NoteId::from(id);
        note.user_id = user_id.to_string();
        note.updated_at = updated_at;
        note
    }

    fn fast_config() -> SyncConfig {
        SyncConfig::default()
            .with_cooldown(Duration::from_millis(100))
            .with_timeout(Duration::from_millis(500))
    }

    async fn fixture(
        config: SyncConfig,
    ) -> (
        Arc<LibsqlLocalStore>,
        Arc<MemoryRemoteStore>,
        AuthContext,
        Arc<SyncCoordinator<LibsqlLocalStore, MemoryRemoteStore>>,
    ) {
        let local = Arc::new(LibsqlLocalStore::open_in_memory().await.unwrap());
        let remote = Arc::new(MemoryRemoteStore::new());
        let auth = AuthContext::new();
        let coordinator = Arc::new(SyncCoordinator::new(
            Arc::clone(&local),
            Arc::clone(&remote),
            auth.clone(),
            config,
        ));
        (local, remote, auth, coordinator)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn sync_pulls_fresher_remote_copy_and_pushes_local_only_notes() {
        let (local, remote, auth, coordinator) = fixture(fast_config()).await;
        auth.sign_in("user-1").unwrap();

        local.upsert(&note("a", "user-1", "old", 100)).await.unwrap();
        remote
            .upsert(&note("a", "user-1", "new", 200), "user-1")
            .await
            .unwrap();
        local.upsert(&note("b", "user-1", "local only", 150)).await.unwrap();

        let outcome = coordinator.trigger(SyncTrigger::Manual).await;
        let SyncOutcome::Completed(report) = outcome else {
            panic!("expected completion, got {outcome:?}");
        };
        assert_eq!(report.pulled, 1);
        assert_eq!(report.pushed, 1);

        let pulled = local.get(&NoteId::from("a")).await.unwrap().unwrap();
        assert_eq!(pulled.title, "new");
        assert_eq!(pulled.updated_at, 200);

        let pushed = remote.get(&NoteId::from("b")).await.unwrap().unwrap();
        assert_eq!(pushed.title, "local only");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn guest_session_sync_never_contacts_the_remote() {
        let (local, remote, _auth, coordinator) = fixture(fast_config()).await;
        local
            .upsert(&note("a", GUEST_USER_ID, "private", 100))
            .await
            .unwrap();

        let outcome = coordinator.trigger(SyncTrigger::Manual).await;
        assert!(matches!(outcome, SyncOutcome::Completed(_)));
        assert_eq!(remote.list_calls(), 0);
        assert!(remote.snapshot().await.is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn sign_in_adopts_guest_notes_and_pushes_them() {
        let (local, remote, auth, coordinator) = fixture(fast_config()).await;
        local
            .upsert(&note("b", GUEST_USER_ID, "written offline", 50))
            .await
            .unwrap();

        auth.sign_in("user-1").unwrap();
        let outcome = coordinator.trigger(SyncTrigger::AuthChanged).await;
        let SyncOutcome::Completed(report) = outcome else {
            panic!("expected completion, got {outcome:?}");
        };
        assert_eq!(report.adopted, 1);

        let mirrored = remote.get(&NoteId::from("b")).await.unwrap().unwrap();
        assert_eq!(mirrored.user_id, "user-1");
        assert_eq!(mirrored.title, "written offline");
        assert_eq!(mirrored.updated_at, 50);
        assert!(local.list(GUEST_USER_ID).await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn concurrent_triggers_coalesce_into_one_execution() {
        let (_local, remote, auth, coordinator) = fixture(fast_config()).await;
        auth.sign_in("user-1").unwrap();
        remote.set_latency(Some(Duration::from_millis(200))).await;

        let first = {
            let coordinator = Arc::clone(&coordinator);
            tokio::spawn(async move { coordinator.trigger(SyncTrigger::Manual).await })
        };
        // Let the first trigger claim the sync slot.
        sleep(Duration::from_millis(50)).await;

        let second = coordinator.trigger(SyncTrigger::Manual).await;
        assert_eq!(second, SyncOutcome::SkippedBusy);

        assert!(matches!(first.await.unwrap(), SyncOutcome::Completed(_)));
        assert_eq!(remote.list_calls(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn trigger_inside_cooldown_is_dropped_silently() {
        let (_local, remote, auth, coordinator) = fixture(fast_config()).await;
        auth.sign_in("user-1").unwrap();

        assert!(matches!(
            coordinator.trigger(SyncTrigger::Manual).await,
            SyncOutcome::Completed(_)
        ));
        let status_after_first = coordinator.status();

        assert_eq!(
            coordinator.trigger(SyncTrigger::Manual).await,
            SyncOutcome::SkippedCooldown
        );
        // Dropped triggers leave the status record untouched.
        assert_eq!(coordinator.status(), status_after_first);
        assert_eq!(remote.list_calls(), 1);

        sleep(Duration::from_millis(150)).await;
        assert!(matches!(
            coordinator.trigger(SyncTrigger::Manual).await,
            SyncOutcome::Completed(_)
        ));
        assert_eq!(remote.list_calls(), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn aborted_trigger_releases_the_sync_slot() {
        let (_local, remote, auth, coordinator) = fixture(fast_config()).await;
        auth.sign_in("user-1").unwrap();
        remote.set_latency(Some(Duration::from_millis(300))).await;

        let attempt = {
            let coordinator = Arc::clone(&coordinator);
            tokio::spawn(async move { coordinator.trigger(SyncTrigger::Manual).await })
        };
        // Let the attempt claim the slot, then cancel it mid-flight.
        sleep(Duration::from_millis(50)).await;
        attempt.abort();
        assert!(attempt.await.unwrap_err().is_cancelled());

        let status = coordinator.status();
        assert!(!status.is_syncing);
        assert_eq!(status.status_text, "Idle");

        remote.set_latency(None).await;
        sleep(Duration::from_millis(150)).await;
        assert!(matches!(
            coordinator.trigger(SyncTrigger::Manual).await,
            SyncOutcome::Completed(_)
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn timed_out_sync_fails_and_returns_to_idle() {
        let (_local, remote, auth, coordinator) = fixture(fast_config()).await;
        auth.sign_in("user-1").unwrap();
        remote.set_latency(Some(Duration::from_secs(30))).await;

        let outcome = coordinator.trigger(SyncTrigger::Manual).await;
        let SyncOutcome::Failed(reason) = outcome else {
            panic!("expected failure, got {outcome:?}");
        };
        assert!(reason.contains("timed out"));

        let status = coordinator.status();
        assert!(!status.is_syncing);
        assert_eq!(status.status_text, "Idle");

        // The coordinator is usable again once the cooldown elapses.
        remote.set_latency(None).await;
        sleep(Duration::from_millis(150)).await;
        assert!(matches!(
            coordinator.trigger(SyncTrigger::Manual).await,
            SyncOutcome::Completed(_)
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn remote_error_becomes_a_status_message_not_a_crash() {
        let (_local, remote, auth, coordinator) = fixture(fast_config()).await;
        auth.sign_in("user-1").unwrap();
        remote.set_failure(Some("connection reset".to_string())).await;

        let outcome = coordinator.trigger(SyncTrigger::Manual).await;
        assert!(matches!(outcome, SyncOutcome::Failed(_)));

        let result = coordinator.acknowledge_result().unwrap();
        assert!(result.contains("Sync failed"));
        assert!(result.contains("connection reset"));
        // One-shot: a second acknowledge finds nothing.
        assert_eq!(coordinator.acknowledge_result(), None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn sign_in_event_drives_a_sync_through_the_listener() {
        let (local, remote, auth, coordinator) = fixture(fast_config()).await;
        local
            .upsert(&note("g", GUEST_USER_ID, "guest note", 10))
            .await
            .unwrap();

        let listener = {
            let coordinator = Arc::clone(&coordinator);
            let events = auth.subscribe_events();
            tokio::spawn(async move { coordinator.run_auth_triggers(events).await })
        };

        let mut status = coordinator.subscribe_status();
        auth.sign_in("user-1").unwrap();

        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if status.borrow_and_update().result.is_some() {
                    break;
                }
                status.changed().await.unwrap();
            }
        })
        .await
        .unwrap();

        assert!(remote.get(&NoteId::from("g")).await.unwrap().is_some());
        listener.abort();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn repeated_sync_with_unchanged_stores_is_a_no_op() {
        let (local, _remote, auth, coordinator) = fixture(
            fast_config().with_cooldown(Duration::from_millis(0)),
        )
        .await;
        auth.sign_in("user-1").unwrap();
        local.upsert(&note("a", "user-1", "settled", 100)).await.unwrap();

        let first = coordinator.trigger(SyncTrigger::Manual).await;
        let SyncOutcome::Completed(first_report) = first else {
            panic!("expected completion, got {first:?}");
        };
        assert_eq!(first_report.pushed, 1);

        let second = coordinator.trigger(SyncTrigger::Manual).await;
        let SyncOutcome::Completed(second_report) = second else {
            panic!("expected completion, got {second:?}");
        };
        assert_eq!(second_report, SyncReport::default());
    }
}
