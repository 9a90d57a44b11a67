//! User configuration: global `~/.lodestar/config.toml` overlaid by the
//! project's `.lodestar/config.toml`.
//!
//! Config is user-authored. Pipeline operations read it and never write it.

use crate::core::error::LodestarError;
use crate::core::store::{CONFIG_FILE, Store};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// A user-declared named shell command. Lives independently of modules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TaskCommand {
    Single(String),
    Sequence(Vec<String>),
}

impl TaskCommand {
    pub fn commands(&self) -> Vec<&str> {
        match self {
            TaskCommand::Single(cmd) => vec![cmd.as_str()],
            TaskCommand::Sequence(cmds) => cmds.iter().map(String::as_str).collect(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LodestarConfig {
    pub tasks: BTreeMap<String, TaskCommand>,
    /// module id -> ids whose summaries are appended to that module's artifact
    pub retrieve_links: BTreeMap<String, Vec<String>>,
    /// ids never proposed by detection or suggested by sync
    pub ignore_modules: Vec<String>,
    /// overrides the detected package manager for `{{pkg_*}}` variables
    pub package_manager: Option<String>,
}

impl LodestarConfig {
    pub fn is_ignored(&self, module_id: &str) -> bool {
        self.ignore_modules.iter().any(|m| m == module_id)
    }

    fn overlay(mut self, other: LodestarConfig) -> Self {
        self.tasks.extend(other.tasks);
        self.retrieve_links.extend(other.retrieve_links);
        for id in other.ignore_modules {
            if !self.ignore_modules.contains(&id) {
                self.ignore_modules.push(id);
            }
        }
        if other.package_manager.is_some() {
            self.package_manager = other.package_manager;
        }
        self
    }
}

/// `$LODESTAR_HOME/config.toml`, falling back to `~/.lodestar/config.toml`.
pub fn global_config_path() -> Option<PathBuf> {
    if let Ok(home) = std::env::var("LODESTAR_HOME") {
        return Some(PathBuf::from(home).join(CONFIG_FILE));
    }
    std::env::var("HOME")
        .ok()
        .map(|h| PathBuf::from(h).join(".lodestar").join(CONFIG_FILE))
}

pub fn load_config(store: &Store) -> Result<LodestarConfig, LodestarError> {
    load_layers(global_config_path().as_deref(), &store.config_path())
}

/// Merge `global` (if any) under `project`. Missing files are empty layers.
pub fn load_layers(global: Option<&Path>, project: &Path) -> Result<LodestarConfig, LodestarError> {
    let mut config = LodestarConfig::default();
    if let Some(global) = global
        && let Some(layer) = load_file(global)?
    {
        config = config.overlay(layer);
    }
    if let Some(layer) = load_file(project)? {
        config = config.overlay(layer);
    }
    Ok(config)
}

fn load_file(path: &Path) -> Result<Option<LodestarConfig>, LodestarError> {
    if !path.is_file() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    toml::from_str(&content)
        .map(Some)
        .map_err(|e| LodestarError::parse(path, e))
}
