//! Derived views over the merged note sequence (search + partition).

use crate::models::Note;

/// Non-archived notes matching `search_query`, pinned first, then newest.
#[must_use]
pub fn active_view(notes: &[Note], search_query: &str) -> Vec<Note> {
    let query = normalize_query(search_query);
    let mut view: Vec<Note> = notes
        .iter()
        .filter(|note| !note.is_archived)
        .filter(|note| note_matches_query(note, &query))
        .cloned()
        .collect();
    view.sort_by(|a, b| {
        b.is_pinned
            .cmp(&a.is_pinned)
            .then_with(|| b.updated_at.cmp(&a.updated_at))
            .then_with(|| a.id.as_str().cmp(b.id.as_str()))
    });
    view
}

/// Archived notes matching `search_query`, newest first.
///
/// Pins are cleared on archive, so the ordering key degenerates to the
/// timestamp alone.
#[must_use]
pub fn archived_view(notes: &[Note], search_query: &str) -> Vec<Note> {
    let query = normalize_query(search_query);
    let mut view: Vec<Note> = notes
        .iter()
        .filter(|note| note.is_archived)
        .filter(|note| note_matches_query(note, &query))
        .cloned()
        .collect();
    view.sort_by(|a, b| {
        b.updated_at
            .cmp(&a.updated_at)
            .then_with(|| a.id.as_str().cmp(b.id.as_str()))
    });
    view
}

fn normalize_query(raw: &str) -> String {
    raw.trim().to_lowercase()
}

fn note_matches_query(note: &Note, query: &str) -> bool {
    if query.is_empty() {
        return true;
    }
    note.title.to_lowercase().contains(query) || note.description.to_lowercase().contains(query)
}
