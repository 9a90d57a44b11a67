//! Drift detection: diff a fresh scan against each stored snapshot, and
//! surface tools that appeared in or vanished from the project tree.

use crate::core::config::LodestarConfig;
use crate::core::error::LodestarError;
use crate::core::formats::{self, ValueMap};
use crate::core::store::Store;
use crate::core::time;
use crate::plugins::detect::ProjectView;
use crate::plugins::lifecycle::{ConfigSnapshot, Manifest, Transaction};
use crate::plugins::registry::Registry;
use crate::plugins::scanner::{self, ScanFailure, ScanResult};
use serde::Serialize;
use std::collections::BTreeSet;

/// One dotted path that differs. `None` marks the side where it is absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DriftChange {
    pub key: String,
    pub old: Option<String>,
    pub new: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleDrift {
    pub module: String,
    pub changes: Vec<DriftChange>,
    /// Why the fresh scan came back empty, when it did.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip)]
    pub fresh: ValueMap,
    #[serde(skip)]
    pub config_file: Option<String>,
    #[serde(skip)]
    pub config_section: Option<String>,
}

/// A module whose config exists but could not be parsed. Its stored
/// values are kept as they are until the file reads cleanly again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnreadableConfig {
    pub module: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DriftReport {
    pub changed: Vec<ModuleDrift>,
    pub unchanged: Vec<String>,
    /// Installed, but no longer in the catalog.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub unchecked: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub unreadable: Vec<UnreadableConfig>,
    pub new_tools: Vec<String>,
    pub removed_tools: Vec<String>,
}

impl DriftReport {
    pub fn is_clean(&self) -> bool {
        self.changed.is_empty() && self.new_tools.is_empty() && self.removed_tools.is_empty()
    }
}

/// Compare one snapshot with a fresh scan. `None` means unchanged.
pub fn diff_snapshot(snapshot: &ConfigSnapshot, fresh: &ScanResult) -> Option<ModuleDrift> {
    let old = formats::flatten(&snapshot.values);
    let new = formats::flatten(&fresh.values);

    let keys: BTreeSet<&String> = old.keys().chain(new.keys()).collect();
    let changes: Vec<DriftChange> = keys
        .into_iter()
        .filter_map(|key| {
            let (before, after) = (old.get(key), new.get(key));
            (before != after).then(|| DriftChange {
                key: key.clone(),
                old: before.cloned(),
                new: after.cloned(),
            })
        })
        .collect();

    if changes.is_empty() {
        return None;
    }
    Some(ModuleDrift {
        module: snapshot.id.clone(),
        changes,
        reason: fresh.reason(),
        fresh: fresh.values.clone(),
        config_file: fresh.config_file.clone(),
        config_section: fresh.config_section.clone(),
    })
}

/// Rescan every installed module and classify it as changed or unchanged.
/// A parse failure says nothing about the values, so it is reported as
/// unreadable and never diffed.
pub fn detect_value_drift(
    store: &Store,
    registry: &Registry,
    manifest: &Manifest,
) -> Result<DriftReport, LodestarError> {
    let mut report = DriftReport::default();
    for id in manifest.installed.keys() {
        let Some(module) = registry.get(id) else {
            report.unchecked.push(id.clone());
            continue;
        };
        let fresh = scanner::scan_module(module, &store.project_root);
        if matches!(fresh.failure, Some(ScanFailure::ParseError { .. })) {
            report.unreadable.push(UnreadableConfig {
                module: id.clone(),
                reason: fresh.reason().unwrap_or_default(),
            });
            continue;
        }
        let snapshot = crate::plugins::lifecycle::load_snapshot(store, id)?
            .unwrap_or_else(|| ConfigSnapshot::build(module, &ScanResult::default(), None));
        match diff_snapshot(&snapshot, &fresh) {
            Some(drift) => report.changed.push(drift),
            None => report.unchanged.push(id.clone()),
        }
    }
    Ok(report)
}

/// Catalog modules not installed whose detection rules now match, sorted.
pub fn detect_new_tools(
    registry: &Registry,
    view: &mut ProjectView,
    installed: &BTreeSet<String>,
    config: &LodestarConfig,
) -> Vec<String> {
    let mut found: Vec<String> = registry
        .modules()
        .filter(|m| !installed.contains(&m.id) && !config.is_ignored(&m.id))
        .filter(|m| !m.category.contract().auto && !m.detect.is_empty())
        .filter(|m| view.match_rules(&m.detect).is_some())
        .map(|m| m.id.clone())
        .collect();
    found.sort();
    found.dedup();
    found
}

/// Installed modules whose detection rules no longer match anything, sorted.
/// Modules without rules are assumed always present.
pub fn detect_removed_tools(
    registry: &Registry,
    view: &mut ProjectView,
    installed: &BTreeSet<String>,
) -> Vec<String> {
    let mut gone: Vec<String> = installed
        .iter()
        .filter_map(|id| registry.get(id))
        .filter(|m| !m.detect.is_empty())
        .filter(|m| view.match_rules(&m.detect).is_none())
        .map(|m| m.id.clone())
        .collect();
    gone.sort();
    gone
}

/// Rewrite only the changed paths into `snapshot`. Returns whether
/// anything moved; meta fields are left alone.
pub fn apply_drift_updates(snapshot: &mut ConfigSnapshot, drift: &ModuleDrift) -> bool {
    let mut touched = false;
    for change in &drift.changes {
        match &change.new {
            Some(_) => {
                if let Some(value) = formats::lookup(&drift.fresh, &change.key) {
                    formats::set_path(&mut snapshot.values, &change.key, value.clone());
                    touched = true;
                }
            }
            None => {
                touched |= formats::remove_path(&mut snapshot.values, &change.key);
            }
        }
    }
    if touched {
        snapshot.config_file = drift.config_file.clone();
        snapshot.config_section = drift.config_section.clone();
    }
    touched
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncOutcome {
    #[serde(flatten)]
    pub report: DriftReport,
    pub applied: Vec<String>,
    pub dry_run: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<String>,
}

/// The `sync` verb: report drift, then apply value changes unless `dry_run`.
pub fn sync(
    store: &Store,
    registry: &Registry,
    config: &LodestarConfig,
    dry_run: bool,
) -> Result<SyncOutcome, LodestarError> {
    let mut txn = Transaction::open(store, registry, config)?;
    let installed = txn.manifest.installed_ids();
    let mut report = detect_value_drift(store, registry, &txn.manifest)?;

    let mut view = ProjectView::open(&store.project_root);
    report.new_tools = detect_new_tools(registry, &mut view, &installed, config);
    report.removed_tools = detect_removed_tools(registry, &mut view, &installed);

    let mut outcome = SyncOutcome {
        report,
        applied: Vec::new(),
        dry_run,
        conditions: view.conditions,
    };
    if dry_run {
        return Ok(outcome);
    }

    let now = time::now_epoch_z();
    let mut changed = BTreeSet::new();
    for drift in &outcome.report.changed {
        let Some(mut snapshot) = txn.snapshot(&drift.module)? else {
            let Some(module) = registry.get(&drift.module) else {
                continue;
            };
            let fresh = ScanResult {
                module: drift.module.clone(),
                found: drift.config_file.is_some(),
                config_file: drift.config_file.clone(),
                config_section: drift.config_section.clone(),
                values: drift.fresh.clone(),
                ..ScanResult::default()
            };
            let package_manager = txn.package_manager();
            txn.stage_snapshot(ConfigSnapshot::build(module, &fresh, package_manager.as_deref()))?;
            changed.insert(drift.module.clone());
            continue;
        };
        if apply_drift_updates(&mut snapshot, drift) {
            snapshot.synced_at = now.clone();
            txn.stage_snapshot(snapshot)?;
            changed.insert(drift.module.clone());
        }
    }
    outcome.applied = changed.iter().cloned().collect();

    txn.stage_artifacts(&changed)?;
    let summary = if outcome.applied.is_empty() {
        "no drift".to_string()
    } else {
        format!("synced {}", outcome.applied.join(", "))
    };
    txn.commit("sync", &outcome.applied, &summary)?;
    Ok(outcome)
}
