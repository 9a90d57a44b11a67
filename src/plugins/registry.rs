//! Module catalog: loading, category contracts, conflict and requirement checks.
//!
//! A [`Registry`] is loaded fresh at the start of every operation and then
//! passed by reference; nothing here is global or mutable after load.

use crate::core::assets::{self, BundleSource, MODULE_FILE, TEMPLATE_FILE};
use crate::core::error::{ContractViolation, LodestarError, Lookup};
use crate::core::formats::ConfigFormat;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Language,
    Linter,
    Formatter,
    Testing,
    Framework,
    Database,
    Vcs,
    Platform,
    PkgManager,
    Environment,
    CiCd,
    Stack,
    Tool,
    Prompt,
    Runtime,
}

impl Category {
    pub const ALL: [Category; 15] = [
        Category::Language,
        Category::Linter,
        Category::Formatter,
        Category::Testing,
        Category::Framework,
        Category::Database,
        Category::Vcs,
        Category::Platform,
        Category::PkgManager,
        Category::Environment,
        Category::CiCd,
        Category::Stack,
        Category::Tool,
        Category::Prompt,
        Category::Runtime,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Language => "language",
            Category::Linter => "linter",
            Category::Formatter => "formatter",
            Category::Testing => "testing",
            Category::Framework => "framework",
            Category::Database => "database",
            Category::Vcs => "vcs",
            Category::Platform => "platform",
            Category::PkgManager => "pkg_manager",
            Category::Environment => "environment",
            Category::CiCd => "ci_cd",
            Category::Stack => "stack",
            Category::Tool => "tool",
            Category::Prompt => "prompt",
            Category::Runtime => "runtime",
        }
    }

    pub fn contract(&self) -> &'static CategoryContract {
        CATEGORY_CONTRACTS
            .iter()
            .find(|c| c.category == *self)
            .unwrap_or(&DEFAULT_CONTRACT)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| format!("unknown category '{s}'"))
    }
}

/// What a category demands of every module that declares it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryContract {
    pub category: Category,
    /// Managed by the tool itself, never installed through `add`.
    pub auto: bool,
    pub requires_languages: bool,
    pub expected_commands: &'static [&'static str],
    /// At most one module of this category per language.
    pub single_instance: bool,
}

const DEFAULT_CONTRACT: CategoryContract = CategoryContract {
    category: Category::Tool,
    auto: false,
    requires_languages: false,
    expected_commands: &[],
    single_instance: false,
};

const fn contract(
    category: Category,
    requires_languages: bool,
    expected_commands: &'static [&'static str],
    single_instance: bool,
) -> CategoryContract {
    CategoryContract {
        category,
        auto: false,
        requires_languages,
        expected_commands,
        single_instance,
    }
}

pub const CATEGORY_CONTRACTS: &[CategoryContract] = &[
    contract(Category::Language, false, &[], false),
    contract(Category::Linter, true, &["check"], true),
    contract(Category::Formatter, true, &["fix"], true),
    contract(Category::Testing, true, &["test"], true),
    contract(Category::Framework, false, &[], false),
    contract(Category::Database, false, &[], false),
    contract(Category::Vcs, false, &["commit", "status", "diff", "log"], true),
    contract(Category::Platform, false, &[], true),
    contract(Category::PkgManager, false, &[], true),
    contract(Category::Environment, false, &[], false),
    contract(Category::CiCd, false, &[], false),
    contract(Category::Stack, false, &[], true),
    contract(Category::Tool, false, &[], false),
    CategoryContract {
        category: Category::Prompt,
        auto: true,
        requires_languages: false,
        expected_commands: &[],
        single_instance: false,
    },
    CategoryContract {
        category: Category::Runtime,
        auto: true,
        requires_languages: false,
        expected_commands: &[],
        single_instance: false,
    },
];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Marker {
    pub file: String,
    pub contains: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectRules {
    /// Paths relative to the project root; `*`/`?` patterns match top-level entries.
    pub files: Vec<String>,
    pub markers: Vec<Marker>,
}

impl DetectRules {
    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.markers.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigLocation {
    pub file: String,
    pub format: ConfigFormat,
    #[serde(default)]
    pub section: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigKey {
    /// Dotted path relative to the location's section.
    pub path: String,
    #[serde(default)]
    pub store_as: Option<String>,
}

impl ConfigKey {
    pub fn target(&self) -> &str {
        self.store_as.as_deref().unwrap_or(&self.path)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleDefinition {
    pub id: String,
    pub name: String,
    pub category: Category,
    pub version: String,
    pub description: String,
    pub for_languages: Vec<String>,
    pub requires: Vec<String>,
    pub conflicts_with: Vec<String>,
    pub detect: DetectRules,
    pub config: Vec<ConfigLocation>,
    pub config_keys: Vec<ConfigKey>,
    pub commands: BTreeMap<String, String>,
    #[serde(skip)]
    pub template: String,
}

impl ModuleDefinition {
    /// A definition with just identity set. Mostly for tests and fixtures.
    pub fn new(id: &str, category: Category) -> Self {
        Self {
            id: id.to_string(),
            name: id.to_string(),
            category,
            version: "1.0.0".to_string(),
            description: format!("{id} module"),
            for_languages: Vec::new(),
            requires: Vec::new(),
            conflicts_with: Vec::new(),
            detect: DetectRules::default(),
            config: Vec::new(),
            config_keys: Vec::new(),
            commands: BTreeMap::new(),
            template: format!("# {id}\n"),
        }
    }

    fn shares_language_with(&self, other: &ModuleDefinition) -> bool {
        if self.for_languages.is_empty() || other.for_languages.is_empty() {
            return true;
        }
        self.for_languages
            .iter()
            .any(|l| other.for_languages.contains(l))
    }
}

/// On-disk shape of `module.toml`; identity fields default so missing ones
/// surface as contract violations rather than parse errors.
#[derive(Debug, Deserialize)]
struct ModuleToml {
    #[serde(default)]
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    category: String,
    #[serde(default)]
    version: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    for_languages: Vec<String>,
    #[serde(default)]
    requires: Vec<String>,
    #[serde(default)]
    conflicts_with: Vec<String>,
    #[serde(default)]
    detect: DetectRules,
    #[serde(default)]
    config: Vec<ConfigLocation>,
    #[serde(default)]
    config_keys: Vec<ConfigKey>,
    #[serde(default)]
    commands: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct Registry {
    modules: BTreeMap<String, ModuleDefinition>,
    origin: PathBuf,
}

impl Registry {
    /// Load from `catalog_dir` when given, otherwise from the bundled catalog.
    pub fn load(catalog_dir: Option<&Path>) -> Result<Self, LodestarError> {
        match catalog_dir {
            Some(dir) => Self::from_dir(dir),
            None => Self::from_bundles(assets::embedded_bundles(), Path::new("<bundled>")),
        }
    }

    pub fn from_dir(dir: &Path) -> Result<Self, LodestarError> {
        let mut bundles = BTreeMap::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let path = entry.path();
            let read = |name: &str| -> Result<Option<String>, LodestarError> {
                let p = path.join(name);
                if p.is_file() {
                    Ok(Some(fs::read_to_string(p)?))
                } else {
                    Ok(None)
                }
            };
            let bundle = BundleSource {
                module_toml: read(MODULE_FILE)?,
                template: read(TEMPLATE_FILE)?,
            };
            bundles.insert(entry.file_name().to_string_lossy().to_string(), bundle);
        }
        Self::from_bundles(bundles, dir)
    }

    pub fn from_bundles(
        bundles: BTreeMap<String, BundleSource>,
        origin: &Path,
    ) -> Result<Self, LodestarError> {
        let mut violations = Vec::new();
        let mut modules = Vec::new();

        for (dir_name, bundle) in bundles {
            let violation = |error: String| ContractViolation {
                module: dir_name.clone(),
                error,
            };
            let Some(text) = bundle.module_toml else {
                violations.push(violation(format!("missing {MODULE_FILE}")));
                continue;
            };
            let raw: ModuleToml = toml::from_str(&text)
                .map_err(|e| LodestarError::parse(origin.join(&dir_name).join(MODULE_FILE), e))?;

            let category = match raw.category.parse::<Category>() {
                Ok(c) => c,
                Err(e) => {
                    violations.push(violation(e));
                    continue;
                }
            };
            if raw.id != dir_name {
                violations.push(violation(format!(
                    "id '{}' does not match its directory name",
                    raw.id
                )));
            }
            let template = match bundle.template {
                Some(t) => t,
                None => {
                    violations.push(violation(format!("missing {TEMPLATE_FILE}")));
                    String::new()
                }
            };
            modules.push(ModuleDefinition {
                id: raw.id,
                name: raw.name,
                category,
                version: raw.version,
                description: raw.description,
                for_languages: raw.for_languages,
                requires: raw.requires,
                conflicts_with: raw.conflicts_with,
                detect: raw.detect,
                config: raw.config,
                config_keys: raw.config_keys,
                commands: raw.commands,
                template,
            });
        }

        let registry = Self::assemble(modules, origin);
        violations.extend(validate_contracts(&registry.modules));
        if !violations.is_empty() {
            return Err(LodestarError::CategoryContractViolation { violations });
        }
        Ok(registry)
    }

    /// Build a validated registry from in-memory definitions.
    pub fn from_modules(modules: Vec<ModuleDefinition>) -> Result<Self, LodestarError> {
        let registry = Self::assemble(modules, Path::new("<memory>"));
        let violations = validate_contracts(&registry.modules);
        if !violations.is_empty() {
            return Err(LodestarError::CategoryContractViolation { violations });
        }
        Ok(registry)
    }

    fn assemble(modules: Vec<ModuleDefinition>, origin: &Path) -> Self {
        Self {
            modules: modules.into_iter().map(|m| (m.id.clone(), m)).collect(),
            origin: origin.to_path_buf(),
        }
    }

    pub fn origin(&self) -> &Path {
        &self.origin
    }

    pub fn get(&self, id: &str) -> Option<&ModuleDefinition> {
        self.modules.get(id)
    }

    /// Like [`Registry::get`] but a miss is `MODULE_NOT_FOUND`.
    pub fn require(&self, id: &str) -> Result<&ModuleDefinition, LodestarError> {
        self.get(id).ok_or_else(|| LodestarError::ModuleNotFound {
            id: id.to_string(),
            lookup: Lookup::Catalog,
        })
    }

    pub fn modules(&self) -> impl Iterator<Item = &ModuleDefinition> {
        self.modules.values()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.modules.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

/// Every contract problem in the catalog, collected rather than stopping at the first.
pub fn validate_contracts(modules: &BTreeMap<String, ModuleDefinition>) -> Vec<ContractViolation> {
    let mut violations = Vec::new();

    for module in modules.values() {
        let mut flag = |error: String| {
            violations.push(ContractViolation {
                module: module.id.clone(),
                error,
            })
        };

        for (field, value) in [
            ("id", &module.id),
            ("name", &module.name),
            ("version", &module.version),
            ("description", &module.description),
        ] {
            if value.trim().is_empty() {
                flag(format!("missing required field '{field}'"));
            }
        }

        let contract = module.category.contract();
        if contract.requires_languages && module.for_languages.is_empty() {
            flag(format!(
                "category '{}' requires for_languages",
                module.category
            ));
        }
        for cmd in contract.expected_commands {
            if !module.commands.contains_key(*cmd) {
                flag(format!(
                    "category '{}' expects command '{cmd}'",
                    module.category
                ));
            }
        }

        for req in &module.requires {
            if req == &module.id {
                flag("requires itself".to_string());
            } else if !modules.contains_key(req) {
                flag(format!("requires unknown module '{req}'"));
            }
            if module.conflicts_with.contains(req) {
                flag(format!("both requires and conflicts with '{req}'"));
            }
        }

        for other_id in &module.conflicts_with {
            if other_id == &module.id {
                flag("conflicts with itself".to_string());
                continue;
            }
            match modules.get(other_id) {
                None => flag(format!("conflicts with unknown module '{other_id}'")),
                Some(other) if !other.conflicts_with.contains(&module.id) => flag(format!(
                    "conflicts_with '{other_id}' is not symmetric ('{other_id}' does not list '{}')",
                    module.id
                )),
                Some(_) => {}
            }
        }
    }

    // Single-instance siblings must block each other; report each pair once.
    let all: Vec<&ModuleDefinition> = modules.values().collect();
    for (i, a) in all.iter().enumerate() {
        if !a.category.contract().single_instance {
            continue;
        }
        for b in &all[i + 1..] {
            if a.category != b.category || !a.shares_language_with(b) {
                continue;
            }
            if !a.conflicts_with.contains(&b.id) && !b.conflicts_with.contains(&a.id) {
                violations.push(ContractViolation {
                    module: a.id.clone(),
                    error: format!(
                        "single-instance {} siblings '{}' and '{}' must declare conflicts_with",
                        a.category, a.id, b.id
                    ),
                });
            }
        }
    }

    violations
}

/// Installed ids the candidate conflicts with, sorted.
pub fn conflicts_for(
    registry: &Registry,
    installed: &BTreeSet<String>,
    candidate: &str,
) -> Result<Vec<String>, LodestarError> {
    let module = registry.require(candidate)?;
    let mut conflicts: Vec<String> = module
        .conflicts_with
        .iter()
        .filter(|id| installed.contains(*id))
        .cloned()
        .collect();
    conflicts.sort();
    Ok(conflicts)
}

/// Fails with `MODULE_CONFLICT` naming every installed conflict.
pub fn check_conflicts(
    registry: &Registry,
    installed: &BTreeSet<String>,
    candidate: &str,
) -> Result<(), LodestarError> {
    let conflicts = conflicts_for(registry, installed, candidate)?;
    if conflicts.is_empty() {
        Ok(())
    } else {
        Err(LodestarError::ModuleConflict {
            id: candidate.to_string(),
            conflicts,
        })
    }
}

/// Installed modules whose `requires` names `target`, sorted.
pub fn dependents(registry: &Registry, installed: &BTreeSet<String>, target: &str) -> Vec<String> {
    installed
        .iter()
        .filter(|id| id.as_str() != target)
        .filter(|id| {
            registry
                .get(id)
                .is_some_and(|m| m.requires.iter().any(|r| r == target))
        })
        .cloned()
        .collect()
}

/// Fails with `MODULE_REQUIRED_BY` naming every installed dependent.
pub fn check_removal(
    registry: &Registry,
    installed: &BTreeSet<String>,
    target: &str,
) -> Result<(), LodestarError> {
    let deps = dependents(registry, installed, target);
    if deps.is_empty() {
        Ok(())
    } else {
        Err(LodestarError::ModuleRequiredBy {
            id: target.to_string(),
            dependents: deps,
        })
    }
}

/// Conflicting pairs among proposed ids, each once as `(smaller, larger)`. Advisory.
pub fn find_init_conflicts(registry: &Registry, proposed: &[String]) -> Vec<(String, String)> {
    let proposed: BTreeSet<&str> = proposed.iter().map(String::as_str).collect();
    let mut pairs = BTreeSet::new();
    for &id in &proposed {
        let Some(module) = registry.get(id) else {
            continue;
        };
        for other in module.conflicts_with.iter().map(String::as_str) {
            if proposed.contains(other) {
                let (a, b) = if id < other { (id, other) } else { (other, id) };
                pairs.insert((a.to_string(), b.to_string()));
            }
        }
    }
    pairs.into_iter().collect()
}

/// `requires` closure of `id` (dependencies first, `id` excluded), in
/// depth-first catalog order.
pub fn requirement_closure(registry: &Registry, id: &str) -> Result<Vec<String>, LodestarError> {
    let mut order = Vec::new();
    let mut seen = BTreeSet::new();
    visit_requirements(registry, id, &mut seen, &mut order)?;
    order.retain(|m| m != id);
    Ok(order)
}

fn visit_requirements(
    registry: &Registry,
    id: &str,
    seen: &mut BTreeSet<String>,
    order: &mut Vec<String>,
) -> Result<(), LodestarError> {
    if !seen.insert(id.to_string()) {
        return Ok(());
    }
    let module = registry.require(id)?;
    for req in &module.requires {
        visit_requirements(registry, req, seen, order)?;
    }
    order.push(id.to_string());
    Ok(())
}

/// Numeric dot-part comparison: `1.10.0 > 1.9.3`, `1.2 < 1.2.1`.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let parse = |v: &str| -> Vec<u32> {
        v.trim_start_matches('v')
            .split('.')
            .filter_map(|s| s.parse::<u32>().ok())
            .collect()
    };
    let (a_parts, b_parts) = (parse(a), parse(b));
    for (x, y) in a_parts.iter().zip(b_parts.iter()) {
        match x.cmp(y) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    a_parts.len().cmp(&b_parts.len())
}
