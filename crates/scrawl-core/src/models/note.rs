//! Note model

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::auth::is_guest;
use crate::util::unix_ms_now;

/// A note identifier, using UUID v7 (time-sortable) once assigned.
///
/// A freshly created note carries the unassigned (empty) identifier until
/// its first persistence; the store that first persists it is authoritative
/// for the durable id from then on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NoteId(String);

impl NoteId {
    /// Mint a new unique note ID using UUID v7
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    /// The sentinel for a note that has not been persisted yet
    #[must_use]
    pub const fn unassigned() -> Self {
        Self(String::new())
    }

    /// Whether this note still needs a durable identifier
    #[must_use]
    pub fn is_unassigned(&self) -> bool {
        self.0.is_empty()
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for NoteId {
    fn default() -> Self {
        Self::unassigned()
    }
}

impl fmt::Display for NoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for NoteId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for NoteId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Color tag attached to a note
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoteColor {
    #[default]
    Default,
    Red,
    Orange,
    Yellow,
    Green,
    Blue,
    Purple,
}

impl NoteColor {
    /// Stable text form used for storage columns
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Red => "red",
            Self::Orange => "orange",
            Self::Yellow => "yellow",
            Self::Green => "green",
            Self::Blue => "blue",
            Self::Purple => "purple",
        }
    }

    /// Parse the storage text form; unknown values fall back to `Default`
    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value {
            "red" => Self::Red,
            "orange" => Self::Orange,
            "yellow" => Self::Yellow,
            "green" => Self::Green,
            "blue" => Self::Blue,
            "purple" => Self::Purple,
            _ => Self::Default,
        }
    }
}

/// A note in the system
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    /// Unique identifier; empty until first persisted
    pub id: NoteId,
    /// Owning user; `GUEST_USER_ID` marks a local-only note
    pub user_id: String,
    /// Short title
    pub title: String,
    /// Body text
    pub description: String,
    /// Opaque image references, in display order
    pub image_refs: Option<Vec<String>>,
    /// Opaque audio reference
    pub audio_ref: Option<String>,
    /// Color tag
    pub color: NoteColor,
    /// Pinned to the top of the active view; exclusive with `is_archived`
    pub is_pinned: bool,
    /// Archived out of the active view; exclusive with `is_pinned`
    pub is_archived: bool,
    /// Last-modified instant (Unix ms); sole freshness tie-breaker
    pub updated_at: i64,
}

impl Note {
    /// Create a new, not-yet-persisted note.
    ///
    /// Ownership is left blank; the write path stamps it with the caller's
    /// current user (the guest sentinel when signed out).
    #[must_use]
    pub fn new(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: NoteId::unassigned(),
            user_id: String::new(),
            title: title.into(),
            description: description.into(),
            image_refs: None,
            audio_ref: None,
            color: NoteColor::Default,
            is_pinned: false,
            is_archived: false,
            updated_at: unix_ms_now(),
        }
    }

    /// Whether this note is owned by the unauthenticated guest user
    /// (a still-blank owner counts as guest)
    #[must_use]
    pub fn is_guest_owned(&self) -> bool {
        is_guest(&self.user_id)
    }

    /// Set the pinned flag; pinning clears archived.
    pub fn set_pinned(&mut self, pinned: bool) {
        self.is_pinned = pinned;
        if pinned {
            self.is_archived = false;
        }
    }

    /// Set the archived flag; archiving clears pinned.
    pub fn set_archived(&mut self, archived: bool) {
        self.is_archived = archived;
        if archived {
            self.is_pinned = false;
        }
    }

    /// Enforce pin/archive mutual exclusion on a record of unknown origin.
    ///
    /// Archive wins when both flags arrive set, matching `set_archived`.
    pub fn normalize_flags(&mut self) {
        if self.is_archived && self.is_pinned {
            self.is_pinned = false;
        }
    }

    /// Check if the note has neither title nor body (whitespace-only counts)
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.title.trim().is_empty() && self.description.trim().is_empty()
    }
}
