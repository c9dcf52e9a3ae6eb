//! scrawl-core - Core library for Scrawl
//!
//! This crate contains the note model, the local/remote store contracts,
//! the reconciliation engine that keeps both stores consistent, and the
//! sync coordinator that decides when reconciliation runs.

pub mod auth;
pub mod error;
pub mod models;
pub mod projection;
pub mod reconcile;
pub mod store;
pub mod sync;
mod util;

pub use error::{Error, Result};
pub use models::{Note, NoteColor, NoteId};
