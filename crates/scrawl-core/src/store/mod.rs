//! Store contracts for the reconciliation engine.
//!
//! The engine sees both sides of the sync through these two traits: an
//! authoritative on-device store and a best-effort cloud mirror. Both are
//! plain CRUD surfaces with native change notification; every mutation
//! bumps a generation counter so consumers can re-read without caller-side
//! polling tricks.

#![allow(async_fn_in_trait)]

mod local;
mod memory;
mod remote;

pub use local::LibsqlLocalStore;
pub use memory::MemoryRemoteStore;
pub use remote::HttpRemoteStore;

use thiserror::Error;
use tokio::sync::watch;

use crate::error::Result;
use crate::models::{Note, NoteId};

/// Errors surfaced by a remote store adapter.
///
/// These are expected under intermittent connectivity and are converted to
/// status text at the sync coordinator boundary; they never tear down the
/// reconciliation pipeline.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("Invalid remote store configuration: {0}")]
    InvalidConfiguration(String),
    #[error("Remote HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Remote API error: {0}")]
    Api(String),
    #[error("Invalid remote payload: {0}")]
    InvalidPayload(String),
    #[error("Remote store unavailable: {0}")]
    Unavailable(String),
}

pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

/// The authoritative on-device note store.
///
/// Writes are the durability floor: callers may rely on read-your-writes
/// for anything persisted here. `upsert` and `delete` are raw CRUD; they
/// never rewrite timestamps or ownership (that is the reconciler's job).
pub trait LocalStore: Send + Sync {
    /// List notes owned by `user_id`, newest first.
    async fn list(&self, user_id: &str) -> Result<Vec<Note>>;

    /// Fetch a note by id.
    async fn get(&self, id: &NoteId) -> Result<Option<Note>>;

    /// Insert or replace a note. The id must already be assigned.
    async fn upsert(&self, note: &Note) -> Result<()>;

    /// Remove a note by id. Removing an absent note is not an error.
    async fn delete(&self, id: &NoteId) -> Result<()>;

    /// Remove every note owned by `user_id`; returns the removed count.
    async fn delete_all_for_user(&self, user_id: &str) -> Result<u64>;

    /// Case-insensitive substring search over title and description.
    async fn search(&self, query: &str, user_id: &str) -> Result<Vec<Note>>;

    /// Generation counter bumped on every mutation.
    fn subscribe(&self) -> watch::Receiver<u64>;
}

/// The cloud-held mirror of a user's notes.
///
/// Calls may fail with network or permission errors; failures are error
/// values, never silent no-ops.
pub trait RemoteStore: Send + Sync {
    /// List notes owned by `user_id`, newest first.
    async fn list(&self, user_id: &str) -> RemoteResult<Vec<Note>>;

    /// Fetch a note by id.
    async fn get(&self, id: &NoteId) -> RemoteResult<Option<Note>>;

    /// Insert or replace a note for `user_id`. Assigns and returns an id
    /// when the note arrives without one.
    async fn upsert(&self, note: &Note, user_id: &str) -> RemoteResult<NoteId>;

    /// Remove a note by id.
    async fn delete(&self, id: &NoteId) -> RemoteResult<()>;

    /// Generation counter bumped on every mutation observed locally.
    fn subscribe(&self) -> watch::Receiver<u64>;
}

/// Mutation generation counter shared by store implementations.
#[derive(Debug)]
pub(crate) struct ChangeNotifier {
    generation: watch::Sender<u64>,
}

impl Default for ChangeNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeNotifier {
    pub(crate) fn new() -> Self {
        let (generation, _) = watch::channel(0);
        Self { generation }
    }

    pub(crate) fn notify(&self) {
        self.generation.send_modify(|generation| *generation += 1);
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<u64> {
        self.generation.subscribe()
    }
}
