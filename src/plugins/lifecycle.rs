//! Module lifecycle: init, add, remove, update against the persisted manifest.
//!
//! Every mutating operation runs inside a [`Transaction`]: reads happen
//! first, every new file body is computed in memory, and only then are the
//! staged writes applied (each one atomically) with the manifest written
//! last. A failed validation therefore leaves the store untouched.

use crate::core::config::LodestarConfig;
use crate::core::error::{LodestarError, Lookup};
use crate::core::formats::ValueMap;
use crate::core::journal;
use crate::core::store::{self, Store};
use crate::core::time;
use crate::plugins::detect::{self, Detection, ProjectProfile};
use crate::plugins::registry::{self, Category, ModuleDefinition, Registry};
use crate::plugins::render::{self, ArtifactInput};
use crate::plugins::scanner::{self, ScanResult};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

pub const SCHEMA_VERSION: u32 = 1;

fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledModule {
    pub version: String,
    pub category: Category,
    pub installed_at: String,
    pub updated_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_sha256: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    #[serde(default)]
    pub profile: ProjectProfile,
    #[serde(default)]
    pub installed: BTreeMap<String, InstalledModule>,
}

impl Default for Manifest {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            profile: ProjectProfile::default(),
            installed: BTreeMap::new(),
        }
    }
}

impl Manifest {
    /// A missing manifest is an empty one.
    pub fn load(store: &Store) -> Result<Self, LodestarError> {
        Ok(store::read_json(&store.manifest_path())?.unwrap_or_default())
    }

    pub fn installed_ids(&self) -> BTreeSet<String> {
        self.installed.keys().cloned().collect()
    }

    pub fn is_installed(&self, id: &str) -> bool {
        self.installed.contains_key(id)
    }

    fn require(&self, id: &str) -> Result<&InstalledModule, LodestarError> {
        self.installed.get(id).ok_or_else(|| LodestarError::ModuleNotFound {
            id: id.to_string(),
            lookup: Lookup::Manifest,
        })
    }
}

/// Last-known extracted values for one installed module, plus catalog
/// meta. Only `values` takes part in drift comparison.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigSnapshot {
    pub id: String,
    pub name: String,
    pub version: String,
    pub category: Category,
    #[serde(default)]
    pub config_file: Option<String>,
    #[serde(default)]
    pub config_section: Option<String>,
    pub synced_at: String,
    #[serde(default)]
    pub commands: BTreeMap<String, String>,
    #[serde(default)]
    pub values: ValueMap,
}

impl ConfigSnapshot {
    pub fn build(module: &ModuleDefinition, scan: &ScanResult, package_manager: Option<&str>) -> Self {
        Self {
            id: module.id.clone(),
            name: module.name.clone(),
            version: module.version.clone(),
            category: module.category,
            config_file: scan.config_file.clone(),
            config_section: scan.config_section.clone(),
            synced_at: time::now_epoch_z(),
            commands: resolve_commands(&module.commands, package_manager),
            values: scan.values.clone(),
        }
    }
}

pub fn load_snapshot(store: &Store, id: &str) -> Result<Option<ConfigSnapshot>, LodestarError> {
    store::read_json(&store.snapshot_path(id))
}

/// `{{pkg_*}}` command variables per package manager.
pub const PKG_VARIABLES: &[(&str, [(&str, &str); 4])] = &[
    ("uv", [("pkg_run", "uv run"), ("pkg_add", "uv add"), ("pkg_add_dev", "uv add --dev"), ("pkg_sync", "uv sync")]),
    ("pip", [("pkg_run", "python -m"), ("pkg_add", "pip install"), ("pkg_add_dev", "pip install"), ("pkg_sync", "pip install -r requirements.txt")]),
    ("poetry", [("pkg_run", "poetry run"), ("pkg_add", "poetry add"), ("pkg_add_dev", "poetry add --group dev"), ("pkg_sync", "poetry install")]),
    ("pnpm", [("pkg_run", "pnpm exec"), ("pkg_add", "pnpm add"), ("pkg_add_dev", "pnpm add --save-dev"), ("pkg_sync", "pnpm install")]),
    ("npm", [("pkg_run", "npx"), ("pkg_add", "npm install"), ("pkg_add_dev", "npm install --save-dev"), ("pkg_sync", "npm install")]),
    ("yarn", [("pkg_run", "yarn"), ("pkg_add", "yarn add"), ("pkg_add_dev", "yarn add --dev"), ("pkg_sync", "yarn install")]),
    ("bun", [("pkg_run", "bunx"), ("pkg_add", "bun add"), ("pkg_add_dev", "bun add --dev"), ("pkg_sync", "bun install")]),
    ("cargo", [("pkg_run", "cargo"), ("pkg_add", "cargo add"), ("pkg_add_dev", "cargo add --dev"), ("pkg_sync", "cargo fetch")]),
];

const FALLBACK_PACKAGE_MANAGER: &str = "pip";

pub fn pkg_variables(package_manager: Option<&str>) -> &'static [(&'static str, &'static str); 4] {
    let lookup = |name: &str| PKG_VARIABLES.iter().find(|(pm, _)| *pm == name).map(|(_, vars)| vars);
    package_manager
        .and_then(lookup)
        .or_else(|| lookup(FALLBACK_PACKAGE_MANAGER))
        .unwrap_or(&PKG_VARIABLES[1].1)
}

/// Substitute `{{pkg_*}}` in every command. Other tokens are left alone.
pub fn resolve_commands(
    commands: &BTreeMap<String, String>,
    package_manager: Option<&str>,
) -> BTreeMap<String, String> {
    let vars = pkg_variables(package_manager);
    commands
        .iter()
        .map(|(name, cmd)| {
            let resolved = vars.iter().fold(cmd.clone(), |acc, (var, value)| {
                acc.replace(&format!("{{{{{var}}}}}"), value)
            });
            (name.clone(), resolved)
        })
        .collect()
}

pub fn artifact_digest(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("sha256:{:x}", hasher.finalize())
}

enum StagedWrite {
    Put(PathBuf, Vec<u8>),
    Delete(PathBuf),
}

/// One logical operation's reads, staged writes and manifest.
pub(crate) struct Transaction<'a> {
    pub store: &'a Store,
    pub registry: &'a Registry,
    pub config: &'a LodestarConfig,
    pub manifest: Manifest,
    snapshots: BTreeMap<String, Option<ConfigSnapshot>>,
    writes: Vec<StagedWrite>,
}

impl<'a> Transaction<'a> {
    pub fn open(store: &'a Store, registry: &'a Registry, config: &'a LodestarConfig) -> Result<Self, LodestarError> {
        Ok(Self {
            store,
            registry,
            config,
            manifest: Manifest::load(store)?,
            snapshots: BTreeMap::new(),
            writes: Vec::new(),
        })
    }

    /// Config override, then the stored profile, then any installed package manager.
    pub fn package_manager(&self) -> Option<String> {
        self.config
            .package_manager
            .clone()
            .or_else(|| self.manifest.profile.package_manager.clone())
            .or_else(|| {
                self.manifest
                    .installed
                    .iter()
                    .find(|(_, m)| m.category == Category::PkgManager)
                    .map(|(id, _)| id.clone())
            })
    }

    pub fn snapshot(&mut self, id: &str) -> Result<Option<ConfigSnapshot>, LodestarError> {
        if let Some(cached) = self.snapshots.get(id) {
            return Ok(cached.clone());
        }
        let loaded = load_snapshot(self.store, id)?;
        self.snapshots.insert(id.to_string(), loaded.clone());
        Ok(loaded)
    }

    pub fn stage_snapshot(&mut self, snapshot: ConfigSnapshot) -> Result<(), LodestarError> {
        let bytes = store::json_bytes(&snapshot)?;
        self.writes
            .push(StagedWrite::Put(self.store.snapshot_path(&snapshot.id), bytes));
        self.snapshots.insert(snapshot.id.clone(), Some(snapshot));
        Ok(())
    }

    fn stage_removal(&mut self, id: &str) {
        self.writes.push(StagedWrite::Delete(self.store.snapshot_path(id)));
        self.writes.push(StagedWrite::Delete(self.store.artifact_path(id)));
        self.snapshots.insert(id.to_string(), None);
        self.manifest.installed.remove(id);
    }

    fn artifact_text(&mut self, id: &str, with_links: bool) -> Result<Option<String>, LodestarError> {
        let Some(module) = self.registry.get(id) else {
            return Ok(None);
        };
        let snapshot = self.snapshot(id)?;
        let (values, commands, config_file) = match snapshot {
            Some(s) => (s.values, s.commands, s.config_file),
            None => (ValueMap::new(), BTreeMap::new(), None),
        };

        let mut linked = Vec::new();
        if with_links {
            let links = self.config.retrieve_links.get(id).cloned().unwrap_or_default();
            for other in links {
                if other == id || !self.manifest.is_installed(&other) {
                    continue;
                }
                if let Some(text) = self.artifact_text(&other, false)? {
                    linked.push((other, text));
                }
            }
        }

        Ok(Some(render::compose_artifact(&ArtifactInput {
            template: &module.template,
            values: &values,
            commands: &commands,
            config_file: config_file.as_deref(),
            linked,
        })))
    }

    /// Re-render `changed` plus every installed module linking to one of them.
    pub fn stage_artifacts(&mut self, changed: &BTreeSet<String>) -> Result<(), LodestarError> {
        let affected: Vec<String> = self
            .manifest
            .installed
            .keys()
            .filter(|id| {
                changed.contains(*id)
                    || self
                        .config
                        .retrieve_links
                        .get(*id)
                        .is_some_and(|links| links.iter().any(|l| changed.contains(l)))
            })
            .cloned()
            .collect();

        for id in affected {
            let Some(text) = self.artifact_text(&id, true)? else {
                continue;
            };
            let digest = artifact_digest(&text);
            self.writes
                .push(StagedWrite::Put(self.store.artifact_path(&id), text.into_bytes()));
            if let Some(entry) = self.manifest.installed.get_mut(&id) {
                entry.artifact_sha256 = Some(digest);
            }
        }
        Ok(())
    }

    /// Apply staged writes, then the manifest, then log and refresh the status artifact.
    pub fn commit(self, op: &str, modules: &[String], summary: &str) -> Result<Manifest, LodestarError> {
        self.store.ensure_layout()?;
        for write in self.writes {
            match write {
                StagedWrite::Put(path, bytes) => store::write_atomic(&path, &bytes)?,
                StagedWrite::Delete(path) => {
                    store::remove_if_present(&path)?;
                }
            }
        }
        store::write_json(&self.store.manifest_path(), &self.manifest)?;
        journal::append(self.store, op, "ok", modules, summary)?;
        render::rebuild_status(self.store, &self.manifest)?;
        Ok(self.manifest)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstallReport {
    pub id: String,
    pub version: String,
    pub found: bool,
    pub config_file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockedModule {
    pub id: String,
    pub conflicts: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AddOutcome {
    pub installed: Vec<InstallReport>,
    /// Requirements installed because a requested module needs them.
    pub pulled_in: Vec<String>,
    pub already_installed: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub blocked: Vec<BlockedModule>,
}

impl AddOutcome {
    pub fn installed_ids(&self) -> Vec<String> {
        self.installed.iter().map(|r| r.id.clone()).collect()
    }
}

/// Plan and stage installs. With `tolerate_conflicts`, a conflicting
/// request is reported as blocked instead of failing the batch.
fn stage_add(
    txn: &mut Transaction<'_>,
    ids: &[String],
    tolerate_conflicts: bool,
) -> Result<AddOutcome, LodestarError> {
    let registry = txn.registry;
    let mut outcome = AddOutcome::default();
    let mut planned = txn.manifest.installed_ids();
    let mut order: Vec<String> = Vec::new();

    for id in ids {
        registry.require(id)?;
        if txn.manifest.is_installed(id) {
            if !outcome.already_installed.contains(id) {
                outcome.already_installed.push(id.clone());
            }
            continue;
        }
        if planned.contains(id) {
            continue;
        }

        let mut members = registry::requirement_closure(registry, id)?;
        members.push(id.clone());
        members.retain(|m| !planned.contains(m));

        let mut trial = planned.clone();
        let mut blocked = None;
        for member in &members {
            let conflicts = registry::conflicts_for(registry, &trial, member)?;
            if !conflicts.is_empty() {
                blocked = Some(LodestarError::ModuleConflict {
                    id: member.clone(),
                    conflicts,
                });
                break;
            }
            trial.insert(member.clone());
        }
        match blocked {
            Some(LodestarError::ModuleConflict { id: member, conflicts }) if tolerate_conflicts => {
                outcome.blocked.push(BlockedModule { id: member, conflicts });
                continue;
            }
            Some(err) => return Err(err),
            None => {}
        }

        for member in members {
            if &member != id && !ids.contains(&member) {
                outcome.pulled_in.push(member.clone());
            }
            planned.insert(member.clone());
            order.push(member);
        }
    }

    let now = time::now_epoch_z();
    for id in &order {
        let module = registry.require(id)?;
        txn.manifest.installed.insert(
            id.clone(),
            InstalledModule {
                version: module.version.clone(),
                category: module.category,
                installed_at: now.clone(),
                updated_at: now.clone(),
                artifact_sha256: None,
            },
        );
    }
    let package_manager = txn.package_manager();
    for id in &order {
        let module = registry.require(id)?;
        let scan = scanner::scan_module(module, &txn.store.project_root);
        txn.stage_snapshot(ConfigSnapshot::build(module, &scan, package_manager.as_deref()))?;
        outcome.installed.push(InstallReport {
            id: id.clone(),
            version: module.version.clone(),
            found: scan.found,
            config_file: scan.config_file.clone(),
            reason: scan.reason(),
        });
    }
    let changed: BTreeSet<String> = order.into_iter().collect();
    txn.stage_artifacts(&changed)?;
    Ok(outcome)
}

/// Install `ids` (plus their requirement closure). Any conflict with an
/// installed or earlier-planned module fails the whole batch untouched.
pub fn add_modules(
    store: &Store,
    registry: &Registry,
    config: &LodestarConfig,
    ids: &[String],
) -> Result<AddOutcome, LodestarError> {
    let mut txn = Transaction::open(store, registry, config)?;
    let outcome = stage_add(&mut txn, ids, false)?;
    let installed = outcome.installed_ids();
    let summary = if installed.is_empty() {
        "nothing to install".to_string()
    } else {
        format!("installed {}", installed.join(", "))
    };
    txn.commit("add", &installed, &summary)?;
    Ok(outcome)
}

pub fn install(
    store: &Store,
    registry: &Registry,
    config: &LodestarConfig,
    id: &str,
) -> Result<AddOutcome, LodestarError> {
    add_modules(store, registry, config, &[id.to_string()])
}

#[derive(Debug, Clone, Serialize)]
pub struct InitOutcome {
    pub detection: Detection,
    pub added: AddOutcome,
    /// Advisory pairs left for a manual choice; neither side was installed.
    pub conflicts: Vec<(String, String)>,
}

/// Create the state layout, detect, and install every unambiguous proposal.
pub fn init(store: &Store, registry: &Registry, config: &LodestarConfig) -> Result<InitOutcome, LodestarError> {
    store.ensure_layout()?;
    let detection = detect::detect(registry, &store.project_root, config);
    let conflicts = registry::find_init_conflicts(registry, &detection.ids());
    let contested: BTreeSet<&String> = conflicts.iter().flat_map(|(a, b)| [a, b]).collect();
    let wanted: Vec<String> = detection
        .ids()
        .into_iter()
        .filter(|id| !contested.contains(id))
        .collect();

    let mut txn = Transaction::open(store, registry, config)?;
    txn.manifest.profile = detection.profile.clone();
    let added = stage_add(&mut txn, &wanted, true)?;
    let installed = added.installed_ids();
    let summary = format!(
        "detected {} module(s), installed {}",
        detection.proposals.len(),
        installed.len()
    );
    txn.commit("init", &installed, &summary)?;
    Ok(InitOutcome {
        detection,
        added,
        conflicts,
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoveOutcome {
    pub removed: String,
    /// Tasks whose commands mention the removed module. They are kept.
    pub orphaned_tasks: Vec<String>,
}

/// Task names whose command text mentions `id`, case-insensitively.
pub fn orphaned_tasks(config: &LodestarConfig, id: &str) -> Vec<String> {
    let needle = id.to_lowercase();
    config
        .tasks
        .iter()
        .filter(|(_, task)| {
            task.commands()
                .iter()
                .any(|cmd| cmd.to_lowercase().contains(&needle))
        })
        .map(|(name, _)| name.clone())
        .collect()
}

pub fn remove(
    store: &Store,
    registry: &Registry,
    config: &LodestarConfig,
    id: &str,
) -> Result<RemoveOutcome, LodestarError> {
    let mut txn = Transaction::open(store, registry, config)?;
    txn.manifest.require(id)?;
    registry::check_removal(registry, &txn.manifest.installed_ids(), id)?;

    let orphaned = orphaned_tasks(config, id);
    txn.stage_removal(id);
    let changed = BTreeSet::from([id.to_string()]);
    txn.stage_artifacts(&changed)?;

    let summary = if orphaned.is_empty() {
        format!("removed {id}")
    } else {
        format!("removed {id} (orphaned tasks: {})", orphaned.join(", "))
    };
    txn.commit("remove", &[id.to_string()], &summary)?;
    Ok(RemoveOutcome {
        removed: id.to_string(),
        orphaned_tasks: orphaned,
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateTarget {
    One(String),
    All,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VersionChange {
    pub id: String,
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedUpdate {
    pub id: String,
    pub installed: String,
    pub catalog: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UpdateOutcome {
    pub updated: Vec<VersionChange>,
    pub skipped: Vec<SkippedUpdate>,
}

/// Re-render modules whose catalog version is strictly newer than the
/// installed one. Extracted values are reused as-is; notes and user
/// config are never written.
pub fn update_modules(
    store: &Store,
    registry: &Registry,
    config: &LodestarConfig,
    target: &UpdateTarget,
) -> Result<UpdateOutcome, LodestarError> {
    let mut txn = Transaction::open(store, registry, config)?;
    let ids: Vec<String> = match target {
        UpdateTarget::One(id) => {
            txn.manifest.require(id)?;
            registry.require(id)?;
            vec![id.clone()]
        }
        UpdateTarget::All => txn.manifest.installed.keys().cloned().collect(),
    };

    let package_manager = txn.package_manager();
    let mut outcome = UpdateOutcome::default();
    let mut changed = BTreeSet::new();
    let now = time::now_epoch_z();

    for id in ids {
        let installed_version = txn.manifest.require(&id)?.version.clone();
        let Some(module) = registry.get(&id) else {
            outcome.skipped.push(SkippedUpdate {
                id,
                installed: installed_version,
                catalog: None,
            });
            continue;
        };
        if registry::compare_versions(&module.version, &installed_version) != std::cmp::Ordering::Greater {
            outcome.skipped.push(SkippedUpdate {
                id,
                installed: installed_version,
                catalog: Some(module.version.clone()),
            });
            continue;
        }

        let snapshot = match txn.snapshot(&id)? {
            Some(mut existing) => {
                existing.name = module.name.clone();
                existing.version = module.version.clone();
                existing.category = module.category;
                existing.commands = resolve_commands(&module.commands, package_manager.as_deref());
                existing
            }
            None => {
                let scan = scanner::scan_module(module, &store.project_root);
                ConfigSnapshot::build(module, &scan, package_manager.as_deref())
            }
        };
        txn.stage_snapshot(snapshot)?;
        if let Some(entry) = txn.manifest.installed.get_mut(&id) {
            entry.version = module.version.clone();
            entry.category = module.category;
            entry.updated_at = now.clone();
        }
        outcome.updated.push(VersionChange {
            id: id.clone(),
            from: installed_version,
            to: module.version.clone(),
        });
        changed.insert(id);
    }

    txn.stage_artifacts(&changed)?;
    let ids: Vec<String> = changed.into_iter().collect();
    let summary = if ids.is_empty() {
        "everything up to date".to_string()
    } else {
        format!("updated {}", ids.join(", "))
    };
    txn.commit("update", &ids, &summary)?;
    Ok(outcome)
}

/// Artifacts whose file no longer matches the digest recorded at render time.
pub fn stale_artifacts(store: &Store, manifest: &Manifest) -> Result<Vec<String>, LodestarError> {
    let mut stale = Vec::new();
    for (id, entry) in &manifest.installed {
        let Some(expected) = &entry.artifact_sha256 else {
            continue;
        };
        let path = store.artifact_path(id);
        let actual = if path.is_file() {
            Some(artifact_digest(&std::fs::read_to_string(&path)?))
        } else {
            None
        };
        if actual.as_ref() != Some(expected) {
            stale.push(id.clone());
        }
    }
    Ok(stale)
}
