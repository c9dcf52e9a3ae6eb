//! Data models for Scrawl

mod note;

pub use note::{Note, NoteColor, NoteId};
