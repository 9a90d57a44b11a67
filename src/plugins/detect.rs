//! Stack detection: match the project tree against each module's rules.
//!
//! One generic matcher evaluates the declarative `[detect]` table of every
//! catalog module. Detection never fails; problems reading the tree are
//! reported as conditions next to whatever could still be proposed.

use crate::core::config::LodestarConfig;
use crate::plugins::registry::{Category, DetectRules, ModuleDefinition, Registry};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Tie-break order for the primary language when several are present.
const LANGUAGE_PRIORITY: &[&str] = &[
    "python",
    "typescript",
    "javascript",
    "rust",
    "go",
    "ruby",
    "java",
    "kotlin",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionSource {
    /// A declared sentinel path (or glob) exists.
    Sentinel,
    /// A declared marker string was found inside a named config file.
    ConfigMarker,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleMatch {
    pub source: DetectionSource,
    /// The sentinel entry or `file: marker` that matched.
    pub evidence: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Proposal {
    pub id: String,
    pub category: Category,
    pub source: DetectionSource,
    pub evidence: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectProfile {
    pub languages: Vec<String>,
    pub primary_language: Option<String>,
    pub package_manager: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Detection {
    pub proposals: Vec<Proposal>,
    pub profile: ProjectProfile,
    /// Matched but suppressed by `ignore_modules`.
    pub ignored: Vec<String>,
    pub conditions: Vec<String>,
}

impl Detection {
    pub fn ids(&self) -> Vec<String> {
        self.proposals.iter().map(|p| p.id.clone()).collect()
    }
}

/// Read-through view of the project tree for one detection pass.
pub struct ProjectView {
    root: PathBuf,
    entries: Vec<String>,
    files: BTreeMap<String, Option<String>>,
    pub conditions: Vec<String>,
}

impl ProjectView {
    pub fn open(root: &Path) -> Self {
        let mut conditions = Vec::new();
        let entries = match fs::read_dir(root) {
            Ok(iter) => {
                let mut names: Vec<String> = iter
                    .filter_map(Result::ok)
                    .map(|e| e.file_name().to_string_lossy().to_string())
                    .collect();
                names.sort();
                names
            }
            Err(e) => {
                conditions.push(format!("cannot read {}: {e}", root.display()));
                Vec::new()
            }
        };
        Self {
            root: root.to_path_buf(),
            entries,
            files: BTreeMap::new(),
            conditions,
        }
    }

    fn read(&mut self, rel: &str) -> Option<&str> {
        if !self.files.contains_key(rel) {
            let path = self.root.join(rel);
            let content = if path.is_file() {
                match fs::read(&path) {
                    Ok(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
                    Err(e) => {
                        self.conditions.push(format!("cannot read {rel}: {e}"));
                        None
                    }
                }
            } else {
                None
            };
            self.files.insert(rel.to_string(), content);
        }
        self.files.get(rel).and_then(|c| c.as_deref())
    }

    /// First top-level entry matching `pattern`, or the path itself when it exists.
    pub fn find_sentinel(&self, pattern: &str) -> Option<String> {
        if is_glob(pattern) {
            let compiled = glob::Pattern::new(pattern).ok()?;
            return self.entries.iter().find(|e| compiled.matches(e)).cloned();
        }
        self.root
            .join(pattern)
            .exists()
            .then(|| pattern.to_string())
    }

    /// Evaluate one module's rules: sentinels first, then markers.
    pub fn match_rules(&mut self, rules: &DetectRules) -> Option<RuleMatch> {
        for file in &rules.files {
            if let Some(found) = self.find_sentinel(file) {
                return Some(RuleMatch {
                    source: DetectionSource::Sentinel,
                    evidence: found,
                });
            }
        }
        for marker in &rules.markers {
            if self
                .read(&marker.file)
                .is_some_and(|content| content.contains(&marker.contains))
            {
                return Some(RuleMatch {
                    source: DetectionSource::ConfigMarker,
                    evidence: format!("{}: {}", marker.file, marker.contains),
                });
            }
        }
        None
    }
}

pub fn is_glob(pattern: &str) -> bool {
    pattern.contains(['*', '?', '['])
}

fn proposable(module: &ModuleDefinition) -> bool {
    !module.category.contract().auto && !module.detect.is_empty()
}

/// Propose every catalog module whose rules match, languages first.
pub fn detect(registry: &Registry, project_root: &Path, config: &LodestarConfig) -> Detection {
    let mut view = ProjectView::open(project_root);
    let mut detection = Detection::default();

    for module in registry.modules().filter(|m| proposable(m)) {
        let Some(hit) = view.match_rules(&module.detect) else {
            continue;
        };
        if config.is_ignored(&module.id) {
            detection.ignored.push(module.id.clone());
            continue;
        }
        detection.proposals.push(Proposal {
            id: module.id.clone(),
            category: module.category,
            source: hit.source,
            evidence: hit.evidence,
        });
    }
    detection
        .proposals
        .sort_by(|a, b| a.category.cmp(&b.category).then_with(|| a.id.cmp(&b.id)));

    detection.profile = build_profile(&detection.proposals, config);
    detection.conditions = view.conditions;
    detection
}

pub fn build_profile(proposals: &[Proposal], config: &LodestarConfig) -> ProjectProfile {
    let languages: Vec<String> = proposals
        .iter()
        .filter(|p| p.category == Category::Language)
        .map(|p| p.id.clone())
        .collect();
    let primary_language = LANGUAGE_PRIORITY
        .iter()
        .find(|l| languages.iter().any(|x| x == *l))
        .map(|l| l.to_string())
        .or_else(|| languages.first().cloned());
    let package_manager = config.package_manager.clone().or_else(|| {
        proposals
            .iter()
            .find(|p| p.category == Category::PkgManager)
            .map(|p| p.id.clone())
    });
    ProjectProfile {
        languages,
        primary_language,
        package_manager,
    }
}
