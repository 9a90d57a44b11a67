//! Append-only operation history (`history.jsonl`).
//!
//! One line per completed operation. Other surfaces read the tail for
//! recency displays; nothing here ever rewrites or replays past lines.

use crate::core::error::LodestarError;
use crate::core::store::Store;
use crate::core::time;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct JournalEntry {
    pub ts: String,
    pub event_id: String,
    pub op: String,
    pub status: String,
    #[serde(default)]
    pub modules: Vec<String>,
    pub summary: String,
}

pub fn append(
    store: &Store,
    op: &str,
    status: &str,
    modules: &[String],
    summary: &str,
) -> Result<JournalEntry, LodestarError> {
    let entry = JournalEntry {
        ts: time::now_epoch_z(),
        event_id: time::new_event_id(),
        op: op.to_string(),
        status: status.to_string(),
        modules: modules.to_vec(),
        summary: summary.to_string(),
    };
    let line = serde_json::to_string(&entry)
        .map_err(|e| LodestarError::IoError(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;

    std::fs::create_dir_all(&store.root)?;
    let mut f = OpenOptions::new()
        .create(true)
        .append(true)
        .open(store.history_path())?;
    writeln!(f, "{line}")?;
    Ok(entry)
}

/// Tail of the history, oldest first. Unparseable lines are counted, not fatal.
#[derive(Debug, Default)]
pub struct RecentHistory {
    pub entries: Vec<JournalEntry>,
    pub skipped_lines: usize,
}

pub fn recent(store: &Store, limit: usize) -> Result<RecentHistory, LodestarError> {
    let path = store.history_path();
    if !path.is_file() {
        return Ok(RecentHistory::default());
    }
    let reader = BufReader::new(File::open(&path)?);
    let mut history = RecentHistory::default();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<JournalEntry>(&line) {
            Ok(entry) => history.entries.push(entry),
            Err(_) => history.skipped_lines += 1,
        }
    }
    let drop = history.entries.len().saturating_sub(limit);
    history.entries.drain(..drop);
    Ok(history)
}
