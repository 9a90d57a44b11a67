use lodestar::core::config::{self, LodestarConfig};
use lodestar::core::error::{LodestarError, Lookup};
use lodestar::core::journal;
use lodestar::core::store::Store;
use lodestar::plugins::lifecycle::{
    self, Manifest, UpdateTarget, add_modules, init, install, remove, update_modules,
};
use lodestar::plugins::notes;
use lodestar::plugins::registry::{Category, ModuleDefinition, Registry};
use std::fs;
use std::path::Path;
use tempfile::tempdir;

fn ids(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

fn python_project(root: &Path, line_length: u32) {
    fs::write(
        root.join("pyproject.toml"),
        format!(
            "[project]\nname = \"demo\"\nrequires-python = \">=3.11\"\n\n[tool.ruff]\nline-length = {line_length}\n\n[tool.ruff.lint]\nselect = [\"E\", \"F\"]\n"
        ),
    )
    .unwrap();
}

fn uv_config() -> LodestarConfig {
    LodestarConfig {
        package_manager: Some("uv".to_string()),
        ..LodestarConfig::default()
    }
}

#[test]
fn add_pulls_in_requirements_and_renders_artifacts() {
    let tmp = tempdir().unwrap();
    python_project(tmp.path(), 120);
    let store = Store::for_project(tmp.path());
    let registry = Registry::load(None).unwrap();

    let outcome = add_modules(&store, &registry, &uv_config(), &ids(&["ruff"])).unwrap();
    assert_eq!(outcome.installed_ids(), vec!["python", "ruff"]);
    assert_eq!(outcome.pulled_in, vec!["python"]);
    assert!(outcome.installed.iter().all(|r| r.found));

    let manifest = Manifest::load(&store).unwrap();
    assert_eq!(manifest.installed["ruff"].category, Category::Linter);
    assert!(manifest.installed["ruff"].artifact_sha256.is_some());

    let artifact = fs::read_to_string(store.artifact_path("ruff")).unwrap();
    assert!(artifact.contains("Maximum line length: 120"));
    assert!(artifact.contains("Selected rule sets: E, F"));
    assert!(artifact.contains("`uv run ruff check .`"));
    assert!(artifact.contains("> Config source: `pyproject.toml`"));

    let snapshot = lifecycle::load_snapshot(&store, "ruff").unwrap().unwrap();
    assert_eq!(snapshot.config_section.as_deref(), Some("tool.ruff"));
    assert_eq!(snapshot.commands["fix"], "uv run ruff check --fix .");

    let status = fs::read_to_string(store.status_artifact_path()).unwrap();
    assert!(status.contains("### linter"));
    assert!(status.contains("- ruff (1.1.0)"));

    let history = journal::recent(&store, 10).unwrap();
    assert_eq!(history.entries.len(), 1);
    assert_eq!(history.entries[0].op, "add");

    // Re-adding is reported, not an error.
    let again = install(&store, &registry, &uv_config(), "ruff").unwrap();
    assert!(again.installed.is_empty());
    assert_eq!(again.already_installed, vec!["ruff"]);
}

#[test]
fn conflicting_add_leaves_state_untouched() {
    let tmp = tempdir().unwrap();
    python_project(tmp.path(), 100);
    let store = Store::for_project(tmp.path());
    let registry = Registry::load(None).unwrap();
    let config = LodestarConfig::default();

    add_modules(&store, &registry, &config, &ids(&["ruff"])).unwrap();
    let manifest_before = fs::read(store.manifest_path()).unwrap();

    let err = add_modules(&store, &registry, &config, &ids(&["mypy", "flake8"])).unwrap_err();
    match &err {
        LodestarError::ModuleConflict { id, conflicts } => {
            assert_eq!(id, "flake8");
            assert_eq!(conflicts, &vec!["ruff".to_string()]);
        }
        other => panic!("unexpected {other}"),
    }
    assert_eq!(fs::read(store.manifest_path()).unwrap(), manifest_before);
    assert!(!store.snapshot_path("mypy").exists());
    assert!(!store.artifact_path("flake8").exists());

    // Two conflicting ids in one batch are caught against each other too.
    let tmp2 = tempdir().unwrap();
    let store2 = Store::for_project(tmp2.path());
    let err = add_modules(&store2, &registry, &config, &ids(&["ruff", "flake8"])).unwrap_err();
    assert_eq!(err.kind(), "MODULE_CONFLICT");
    assert!(!store2.manifest_path().exists());
}

#[test]
fn unknown_module_is_not_found_in_catalog() {
    let tmp = tempdir().unwrap();
    let store = Store::for_project(tmp.path());
    let registry = Registry::load(None).unwrap();
    let err = install(&store, &registry, &LodestarConfig::default(), "cobol").unwrap_err();
    assert!(matches!(
        err,
        LodestarError::ModuleNotFound { ref id, lookup: Lookup::Catalog } if id == "cobol"
    ));
}

#[test]
fn remove_respects_dependents_order() {
    let tmp = tempdir().unwrap();
    fs::create_dir(tmp.path().join(".git")).unwrap();
    let store = Store::for_project(tmp.path());
    let registry = Registry::load(None).unwrap();
    let config = LodestarConfig::default();

    add_modules(&store, &registry, &config, &ids(&["commit-rules"])).unwrap();
    let err = remove(&store, &registry, &config, "git").unwrap_err();
    match err {
        LodestarError::ModuleRequiredBy { id, dependents } => {
            assert_eq!(id, "git");
            assert_eq!(dependents, vec!["commit-rules"]);
        }
        other => panic!("unexpected {other}"),
    }
    assert!(Manifest::load(&store).unwrap().is_installed("git"));

    remove(&store, &registry, &config, "commit-rules").unwrap();
    remove(&store, &registry, &config, "git").unwrap();
    let manifest = Manifest::load(&store).unwrap();
    assert!(manifest.installed.is_empty());
    assert!(!store.snapshot_path("git").exists());
    assert!(!store.artifact_path("git").exists());

    let err = remove(&store, &registry, &config, "git").unwrap_err();
    assert!(matches!(err, LodestarError::ModuleNotFound { lookup: Lookup::Manifest, .. }));
}

#[test]
fn removing_a_module_reports_but_keeps_orphaned_tasks() {
    let tmp = tempdir().unwrap();
    python_project(tmp.path(), 88);
    let store = Store::for_project(tmp.path());
    store.ensure_layout().unwrap();
    let config_text = "[tasks]\nlint = \"uv run Ruff check .\"\ntest = \"uv run pytest\"\n";
    fs::write(store.config_path(), config_text).unwrap();
    let config = config::load_layers(None, &store.config_path()).unwrap();
    let registry = Registry::load(None).unwrap();

    add_modules(&store, &registry, &config, &ids(&["ruff"])).unwrap();
    let outcome = remove(&store, &registry, &config, "ruff").unwrap();
    assert_eq!(outcome.orphaned_tasks, vec!["lint"]);

    assert_eq!(fs::read_to_string(store.config_path()).unwrap(), config_text);
    let reloaded = config::load_layers(None, &store.config_path()).unwrap();
    assert!(reloaded.tasks.contains_key("lint"));

    let history = journal::recent(&store, 10).unwrap();
    assert!(history.entries.last().unwrap().summary.contains("orphaned tasks: lint"));
}

fn tool(version: &str, template: &str) -> ModuleDefinition {
    let mut m = ModuleDefinition::new("taskfile", Category::Tool);
    m.version = version.to_string();
    m.template = template.to_string();
    m.config = vec![lodestar::plugins::registry::ConfigLocation {
        file: "Taskfile.yml".into(),
        format: lodestar::core::formats::ConfigFormat::Yaml,
        section: None,
    }];
    m.config_keys = vec![lodestar::plugins::registry::ConfigKey {
        path: "version".into(),
        store_as: Some("schema".into()),
    }];
    m.commands.insert("run".into(), "task {{pkg_run}}".into());
    m
}

#[test]
fn update_rerenders_newer_versions_only_and_never_touches_user_files() {
    let tmp = tempdir().unwrap();
    fs::write(tmp.path().join("Taskfile.yml"), "version: '3'\n").unwrap();
    let store = Store::for_project(tmp.path());
    store.ensure_layout().unwrap();
    fs::write(store.config_path(), "[tasks]\nci = \"task ci\"\n").unwrap();
    let config = config::load_layers(None, &store.config_path()).unwrap();

    let v1 = Registry::from_modules(vec![tool("1.0.0", "# Taskfile\n\nSchema {{schema}}\n")]).unwrap();
    add_modules(&store, &v1, &config, &ids(&["taskfile"])).unwrap();
    notes::add(&store, "taskfile", "run tasks through the wrapper").unwrap();

    let config_before = fs::read(store.config_path()).unwrap();
    let notes_before = fs::read(store.notes_path()).unwrap();

    // Same version: skipped.
    let outcome = update_modules(&store, &v1, &config, &UpdateTarget::All).unwrap();
    assert!(outcome.updated.is_empty());
    assert_eq!(outcome.skipped[0].id, "taskfile");

    // Project config changes are not picked up by update; only sync does that.
    fs::write(tmp.path().join("Taskfile.yml"), "version: '4'\n").unwrap();
    let v2 = Registry::from_modules(vec![tool("1.1.0", "# Taskfile v2\n\nSchema version {{schema}}\n")]).unwrap();
    let outcome =
        update_modules(&store, &v2, &config, &UpdateTarget::One("taskfile".into())).unwrap();
    assert_eq!(outcome.updated.len(), 1);
    assert_eq!(outcome.updated[0].from, "1.0.0");
    assert_eq!(outcome.updated[0].to, "1.1.0");

    let artifact = fs::read_to_string(store.artifact_path("taskfile")).unwrap();
    assert!(artifact.starts_with("# Taskfile v2"));
    assert!(artifact.contains("Schema version 3"));
    assert_eq!(Manifest::load(&store).unwrap().installed["taskfile"].version, "1.1.0");
    let snapshot = lifecycle::load_snapshot(&store, "taskfile").unwrap().unwrap();
    assert_eq!(snapshot.version, "1.1.0");

    assert_eq!(fs::read(store.config_path()).unwrap(), config_before);
    assert_eq!(fs::read(store.notes_path()).unwrap(), notes_before);

    // Older catalog never downgrades.
    let outcome = update_modules(&store, &v1, &config, &UpdateTarget::All).unwrap();
    assert!(outcome.updated.is_empty());
    assert_eq!(outcome.skipped[0].catalog.as_deref(), Some("1.0.0"));

    let err = update_modules(&store, &v2, &config, &UpdateTarget::One("ghost".into())).unwrap_err();
    assert_eq!(err.kind(), "MODULE_NOT_FOUND");
}

#[test]
fn init_installs_unambiguous_proposals_and_reports_conflicts() {
    let tmp = tempdir().unwrap();
    python_project(tmp.path(), 100);
    fs::write(tmp.path().join(".flake8"), "[flake8]\nmax-line-length = 100\n").unwrap();
    fs::write(tmp.path().join("uv.lock"), "").unwrap();
    let store = Store::for_project(tmp.path());
    let registry = Registry::load(None).unwrap();

    let outcome = init(&store, &registry, &LodestarConfig::default()).unwrap();
    assert!(store.is_initialized());
    assert_eq!(outcome.conflicts, vec![("flake8".to_string(), "ruff".to_string())]);

    let manifest = Manifest::load(&store).unwrap();
    assert!(manifest.is_installed("python"));
    assert!(manifest.is_installed("uv"));
    assert!(!manifest.is_installed("ruff"));
    assert!(!manifest.is_installed("flake8"));
    assert_eq!(manifest.profile.primary_language.as_deref(), Some("python"));
    assert_eq!(manifest.profile.package_manager.as_deref(), Some("uv"));

    // The stored profile drives command variables for later installs.
    add_modules(&store, &registry, &LodestarConfig::default(), &ids(&["ruff"])).unwrap();
    let artifact = fs::read_to_string(store.artifact_path("ruff")).unwrap();
    assert!(artifact.contains("`uv run ruff check .`"));

    // Running init again never reinstalls.
    let again = init(&store, &registry, &LodestarConfig::default()).unwrap();
    assert!(again.added.installed.is_empty());
}

#[test]
fn edited_artifacts_are_reported_stale() {
    let tmp = tempdir().unwrap();
    python_project(tmp.path(), 100);
    let store = Store::for_project(tmp.path());
    let registry = Registry::load(None).unwrap();
    add_modules(&store, &registry, &LodestarConfig::default(), &ids(&["python"])).unwrap();

    let manifest = Manifest::load(&store).unwrap();
    assert!(lifecycle::stale_artifacts(&store, &manifest).unwrap().is_empty());
    fs::write(store.artifact_path("python"), "# hand edited\n").unwrap();
    assert_eq!(lifecycle::stale_artifacts(&store, &manifest).unwrap(), vec!["python"]);
}
