//! Config scanning: locate a module's config file, parse it, project out
//! the declared keys.
//!
//! Locations are tried in declaration order and the first one that exists
//! (and, when a section is declared, contains that section) wins. A scan
//! never fails for an expected reason: missing files, missing sections and
//! malformed syntax all come back as `found: false` with a [`ScanFailure`].

use crate::core::error::LodestarError;
use crate::core::formats::{self, ConfigFormat, ValueMap};
use crate::plugins::detect::is_glob;
use crate::plugins::registry::{ConfigLocation, ModuleDefinition, Registry};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScanFailure {
    ConfigNotFound { tried: Vec<String> },
    ParseError { file: String, detail: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanResult {
    pub module: String,
    pub found: bool,
    pub config_file: Option<String>,
    pub config_section: Option<String>,
    pub values: ValueMap,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<ScanFailure>,
    /// Locations skipped on the way to the result, e.g. a file without its section.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub skipped: Vec<String>,
}

impl ScanResult {
    pub fn reason(&self) -> Option<String> {
        match &self.failure {
            Some(ScanFailure::ConfigNotFound { tried }) if tried.is_empty() => {
                Some("module declares no config locations".to_string())
            }
            Some(ScanFailure::ConfigNotFound { tried }) => {
                Some(format!("no config found (tried: {})", tried.join(", ")))
            }
            Some(ScanFailure::ParseError { file, detail }) => {
                Some(format!("failed to parse {file}: {detail}"))
            }
            None => None,
        }
    }

    /// Promote a failed scan to its typed error, for callers that need one.
    pub fn into_result(self, project_root: &Path) -> Result<ScanResult, LodestarError> {
        match self.failure {
            None => Ok(self),
            Some(ScanFailure::ConfigNotFound { tried }) => Err(LodestarError::ConfigNotFound {
                module: self.module,
                tried,
            }),
            Some(ScanFailure::ParseError { file, detail }) => Err(LodestarError::ParseError {
                file: project_root.join(file),
                detail,
            }),
        }
    }
}

/// Scan `id` from the catalog. Only an unknown id is an error.
pub fn scan(registry: &Registry, id: &str, project_root: &Path) -> Result<ScanResult, LodestarError> {
    let module = registry.require(id)?;
    Ok(scan_module(module, project_root))
}

pub fn scan_module(module: &ModuleDefinition, project_root: &Path) -> ScanResult {
    let mut result = ScanResult {
        module: module.id.clone(),
        ..ScanResult::default()
    };
    let mut tried = Vec::new();
    let mut parse_failure = None;

    for location in &module.config {
        tried.push(describe(location));
        match probe(location, project_root) {
            Probe::Absent => {}
            Probe::Present(file) => {
                result.found = true;
                result.config_file = Some(file);
                return result;
            }
            Probe::Parsed(root) => {
                let section_map = match &location.section {
                    None => Some(&root),
                    Some(section) => formats::lookup(&root, section).and_then(|v| v.as_table()),
                };
                let Some(section_map) = section_map else {
                    result.skipped.push(format!(
                        "{} has no section '{}'",
                        location.file,
                        location.section.as_deref().unwrap_or_default()
                    ));
                    continue;
                };
                for key in &module.config_keys {
                    if let Some(value) = formats::lookup(section_map, &key.path) {
                        formats::set_path(&mut result.values, key.target(), value.clone());
                    }
                }
                result.found = true;
                result.config_file = Some(location.file.clone());
                result.config_section = location.section.clone();
                return result;
            }
            Probe::Malformed(detail) => {
                result
                    .skipped
                    .push(format!("{} is malformed: {detail}", location.file));
                parse_failure.get_or_insert(ScanFailure::ParseError {
                    file: location.file.clone(),
                    detail,
                });
            }
        }
    }

    result.failure = Some(parse_failure.unwrap_or(ScanFailure::ConfigNotFound { tried }));
    result
}

fn describe(location: &ConfigLocation) -> String {
    match &location.section {
        Some(section) => format!("{} [{}]", location.file, section),
        None => location.file.clone(),
    }
}

enum Probe {
    Absent,
    /// Presence-only hit; carries the matched file name.
    Present(String),
    Parsed(ValueMap),
    Malformed(String),
}

fn probe(location: &ConfigLocation, project_root: &Path) -> Probe {
    let path: PathBuf = project_root.join(&location.file);
    match location.format {
        ConfigFormat::Exists if path.is_file() => Probe::Present(location.file.clone()),
        ConfigFormat::Dir if path.is_dir() => Probe::Present(location.file.clone()),
        ConfigFormat::Exists | ConfigFormat::Dir => Probe::Absent,
        ConfigFormat::Glob => match first_glob_match(project_root, &location.file) {
            Some(name) => Probe::Present(name),
            None => Probe::Absent,
        },
        format => {
            if !path.is_file() {
                return Probe::Absent;
            }
            let text = match fs::read_to_string(&path) {
                Ok(t) => t,
                Err(e) => return Probe::Malformed(e.to_string()),
            };
            match formats::parse(format, &text) {
                Ok(map) => Probe::Parsed(map),
                Err(detail) => Probe::Malformed(detail),
            }
        }
    }
}

fn first_glob_match(project_root: &Path, pattern: &str) -> Option<String> {
    if !is_glob(pattern) {
        return project_root.join(pattern).exists().then(|| pattern.to_string());
    }
    let compiled = glob::Pattern::new(pattern).ok()?;
    let mut names: Vec<String> = fs::read_dir(project_root)
        .ok()?
        .filter_map(Result::ok)
        .map(|e| e.file_name().to_string_lossy().to_string())
        .filter(|n| compiled.matches(n))
        .collect();
    names.sort();
    names.into_iter().next()
}
