//! User-authored notes keyed by module id (`notes.json`).
//!
//! Only `note add` and `note remove` write this file.

use crate::core::error::LodestarError;
use crate::core::journal;
use crate::core::store::{self, Store};
use crate::core::time;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    pub text: String,
    pub added_at: String,
}

pub type NoteBook = BTreeMap<String, Vec<Note>>;

pub fn load(store: &Store) -> Result<NoteBook, LodestarError> {
    Ok(store::read_json(&store.notes_path())?.unwrap_or_default())
}

pub fn add(store: &Store, module: &str, text: &str) -> Result<Note, LodestarError> {
    let mut book = load(store)?;
    let note = Note {
        text: text.trim().to_string(),
        added_at: time::now_epoch_z(),
    };
    book.entry(module.to_string()).or_default().push(note.clone());
    store::write_json(&store.notes_path(), &book)?;
    journal::append(store, "note.add", "ok", &[module.to_string()], &format!("note added to {module}"))?;
    Ok(note)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoteSelector {
    /// 1-based, as listed.
    Index(usize),
    All,
}

impl std::str::FromStr for NoteSelector {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("all") {
            return Ok(NoteSelector::All);
        }
        match s.parse::<usize>() {
            Ok(n) if n > 0 => Ok(NoteSelector::Index(n)),
            _ => Err(format!("expected a note number or 'all', got '{s}'")),
        }
    }
}

/// Remove notes; returns the removed ones. Unknown indexes remove nothing.
pub fn remove(store: &Store, module: &str, selector: NoteSelector) -> Result<Vec<Note>, LodestarError> {
    let mut book = load(store)?;
    let Some(notes) = book.get_mut(module) else {
        return Ok(Vec::new());
    };
    let removed = match selector {
        NoteSelector::All => std::mem::take(notes),
        NoteSelector::Index(n) if n <= notes.len() => vec![notes.remove(n - 1)],
        NoteSelector::Index(_) => Vec::new(),
    };
    if removed.is_empty() {
        return Ok(removed);
    }
    if notes.is_empty() {
        book.remove(module);
    }
    store::write_json(&store.notes_path(), &book)?;
    journal::append(
        store,
        "note.remove",
        "ok",
        &[module.to_string()],
        &format!("removed {} note(s) from {module}", removed.len()),
    )?;
    Ok(removed)
}
