//! Store abstraction for a project's `.lodestar/` state directory.
//!
//! Every persisted artifact of the pipeline lives under one store root:
//! the manifest, per-module config snapshots, rendered retrieve artifacts,
//! user config, notes and the append-only history. All writes go through
//! [`write_atomic`] so an interrupted operation never leaves a torn file.

use crate::core::error::LodestarError;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs;
use std::path::{Path, PathBuf};

pub const STATE_DIR: &str = ".lodestar";
pub const MANIFEST_FILE: &str = "manifest.json";
pub const MODULES_DIR: &str = "modules";
pub const RETRIEVE_DIR: &str = "retrieve";
pub const CONFIG_FILE: &str = "config.toml";
pub const NOTES_FILE: &str = "notes.json";
pub const HISTORY_FILE: &str = "history.jsonl";
pub const STATUS_ARTIFACT: &str = "_status";

/// Store handle representing one project's lodestar state.
#[derive(Debug, Clone)]
pub struct Store {
    /// The project tree being described.
    pub project_root: PathBuf,
    /// `<project_root>/.lodestar`
    pub root: PathBuf,
}

impl Store {
    pub fn for_project(project_root: &Path) -> Self {
        Self {
            project_root: project_root.to_path_buf(),
            root: project_root.join(STATE_DIR),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.root.is_dir()
    }

    pub fn ensure_layout(&self) -> Result<(), LodestarError> {
        fs::create_dir_all(self.root.join(MODULES_DIR))?;
        fs::create_dir_all(self.root.join(RETRIEVE_DIR))?;
        Ok(())
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root.join(MANIFEST_FILE)
    }

    pub fn snapshot_path(&self, module_id: &str) -> PathBuf {
        self.root.join(MODULES_DIR).join(format!("{module_id}.json"))
    }

    pub fn artifact_path(&self, module_id: &str) -> PathBuf {
        self.root.join(RETRIEVE_DIR).join(format!("{module_id}.md"))
    }

    pub fn status_artifact_path(&self) -> PathBuf {
        self.artifact_path(STATUS_ARTIFACT)
    }

    pub fn config_path(&self) -> PathBuf {
        self.root.join(CONFIG_FILE)
    }

    pub fn notes_path(&self) -> PathBuf {
        self.root.join(NOTES_FILE)
    }

    pub fn history_path(&self) -> PathBuf {
        self.root.join(HISTORY_FILE)
    }
}

/// Walk up from `start_dir` to the nearest directory holding `.lodestar/`.
pub fn find_project_root(start_dir: &Path) -> Option<PathBuf> {
    let mut current = start_dir.to_path_buf();
    loop {
        if current.join(STATE_DIR).is_dir() {
            return Some(current);
        }
        if !current.pop() {
            return None;
        }
    }
}

/// Write `bytes` to a sibling temp file, then rename it over `path`.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), LodestarError> {
    let parent = path.parent().ok_or_else(|| {
        LodestarError::IoError(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("no parent directory for {}", path.display()),
        ))
    })?;
    fs::create_dir_all(parent)?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let tmp = parent.join(format!(".{file_name}.tmp"));
    if tmp.exists() {
        fs::remove_file(&tmp)?;
    }
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Pretty JSON with a trailing newline.
pub fn json_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, LodestarError> {
    let mut bytes = serde_json::to_vec_pretty(value)
        .map_err(|e| LodestarError::IoError(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;
    bytes.push(b'\n');
    Ok(bytes)
}

pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), LodestarError> {
    write_atomic(path, &json_bytes(value)?)
}

/// `Ok(None)` when the file is absent; `ParseError` when it is malformed.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, LodestarError> {
    if !path.is_file() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)?;
    serde_json::from_str(&raw)
        .map(Some)
        .map_err(|e| LodestarError::parse(path, e))
}

/// Remove a file if present; absent files are not an error.
pub fn remove_if_present(path: &Path) -> Result<bool, LodestarError> {
    if path.is_file() {
        fs::remove_file(path)?;
        return Ok(true);
    }
    Ok(false)
}
