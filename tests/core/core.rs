use lodestar::core::assets;
use lodestar::core::config::{self, TaskCommand};
use lodestar::core::error::{LodestarError, Lookup};
use lodestar::core::formats::{self, ConfigFormat, ConfigValue};
use lodestar::core::journal;
use lodestar::core::store::{self, Store};
use lodestar::core::time;
use std::fs;
use tempfile::tempdir;

#[test]
fn store_layout_and_atomic_writes() {
    let tmp = tempdir().unwrap();
    let store = Store::for_project(tmp.path());
    assert!(!store.is_initialized());
    store.ensure_layout().unwrap();
    assert!(store.is_initialized());
    assert!(store.snapshot_path("ruff").ends_with(".lodestar/modules/ruff.json"));
    assert!(store.status_artifact_path().ends_with(".lodestar/retrieve/_status.md"));

    let target = store.root.join("manifest.json");
    store::write_json(&target, &serde_json::json!({"b": 1, "a": 2})).unwrap();
    store::write_json(&target, &serde_json::json!({"a": 3})).unwrap();
    let leftovers: Vec<_> = fs::read_dir(&store.root)
        .unwrap()
        .filter_map(Result::ok)
        .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
        .collect();
    assert!(leftovers.is_empty());
    let back: serde_json::Value = store::read_json(&target).unwrap().unwrap();
    assert_eq!(back["a"], 3);

    fs::write(&target, "{ not json").unwrap();
    let err = store::read_json::<serde_json::Value>(&target).unwrap_err();
    assert_eq!(err.kind(), "PARSE_ERROR");
    assert!(err.to_string().contains("manifest.json"));

    assert!(store::remove_if_present(&target).unwrap());
    assert!(!store::remove_if_present(&target).unwrap());
}

#[test]
fn project_root_is_found_from_nested_dirs() {
    let tmp = tempdir().unwrap();
    Store::for_project(tmp.path()).ensure_layout().unwrap();
    let nested = tmp.path().join("src").join("pkg");
    fs::create_dir_all(&nested).unwrap();
    assert_eq!(store::find_project_root(&nested).as_deref(), Some(tmp.path()));
}

#[test]
fn journal_appends_and_tolerates_garbage() {
    let tmp = tempdir().unwrap();
    let store = Store::for_project(tmp.path());
    journal::append(&store, "add", "ok", &["ruff".to_string()], "installed ruff").unwrap();
    fs::OpenOptions::new()
        .append(true)
        .open(store.history_path())
        .and_then(|mut f| std::io::Write::write_all(&mut f, b"not a record\n"))
        .unwrap();
    journal::append(&store, "remove", "ok", &["ruff".to_string()], "removed ruff").unwrap();

    let recent = journal::recent(&store, 10).unwrap();
    assert_eq!(recent.skipped_lines, 1);
    let ops: Vec<&str> = recent.entries.iter().map(|e| e.op.as_str()).collect();
    assert_eq!(ops, vec!["add", "remove"]);
    assert_ne!(recent.entries[0].event_id, recent.entries[1].event_id);

    let last = journal::recent(&store, 1).unwrap();
    assert_eq!(last.entries.len(), 1);
    assert_eq!(last.entries[0].op, "remove");
}

#[test]
fn project_config_overrides_global() {
    let tmp = tempdir().unwrap();
    let global = tmp.path().join("global.toml");
    let project = tmp.path().join("project.toml");
    fs::write(
        &global,
        "package_manager = \"pip\"\nignore_modules = [\"black\"]\n\n[tasks]\nlint = \"flake8 .\"\nfmt = \"black .\"\n",
    )
    .unwrap();
    fs::write(
        &project,
        "package_manager = \"uv\"\nignore_modules = [\"mypy\"]\n\n[tasks]\nlint = [\"uv run ruff check .\", \"uv run mypy .\"]\n\n[retrieve_links]\npytest = [\"ruff\"]\n",
    )
    .unwrap();

    let cfg = config::load_layers(Some(&global), &project).unwrap();
    assert_eq!(cfg.package_manager.as_deref(), Some("uv"));
    assert!(cfg.is_ignored("black") && cfg.is_ignored("mypy"));
    assert_eq!(cfg.tasks["fmt"], TaskCommand::Single("black .".into()));
    assert_eq!(cfg.tasks["lint"].commands(), vec!["uv run ruff check .", "uv run mypy ."]);
    assert_eq!(cfg.retrieve_links["pytest"], vec!["ruff"]);

    let missing = config::load_layers(None, &tmp.path().join("absent.toml")).unwrap();
    assert!(missing.tasks.is_empty());

    fs::write(&project, "tasks = 3").unwrap();
    assert_eq!(config::load_layers(None, &project).unwrap_err().kind(), "PARSE_ERROR");
}

#[test]
fn every_format_normalises_to_text_values() {
    let toml = formats::parse(ConfigFormat::Toml, "[tool.black]\nline-length = 100\nskip = true\n").unwrap();
    assert_eq!(
        formats::lookup(&toml, "tool.black.line-length"),
        Some(&ConfigValue::scalar("100"))
    );
    assert_eq!(formats::lookup(&toml, "tool.black.skip"), Some(&ConfigValue::scalar("true")));

    let json = formats::parse(
        ConfigFormat::Json,
        "{\n  // comment\n  \"compilerOptions\": {\"strict\": true, \"target\": \"ES2022\"}\n}",
    )
    .unwrap();
    assert_eq!(
        formats::lookup(&json, "compilerOptions.strict"),
        Some(&ConfigValue::scalar("true"))
    );

    let ini = formats::parse(ConfigFormat::Ini, "[flake8]\nmax-line-length = 100\n").unwrap();
    assert_eq!(
        formats::lookup(&ini, "flake8.max-line-length"),
        Some(&ConfigValue::scalar("100"))
    );

    let yaml = formats::parse(ConfigFormat::Yaml, "linters:\n  enable:\n    - govet\n    - errcheck\n").unwrap();
    assert_eq!(formats::flatten(&yaml)["linters.enable"], "govet, errcheck");

    let gomod = formats::parse(ConfigFormat::Gomod, "module example.com/app\n\ngo 1.22\n").unwrap();
    assert_eq!(formats::lookup(&gomod, "go"), Some(&ConfigValue::scalar("1.22")));

    assert!(formats::parse(ConfigFormat::Json, "[1, 2]").is_err());
    assert!(formats::parse(ConfigFormat::Toml, "a = = 1").is_err());
}

#[test]
fn error_envelopes_carry_kind_and_payload() {
    let err = LodestarError::ModuleRequiredBy {
        id: "git".into(),
        dependents: vec!["commit-rules".into(), "github".into()],
    };
    let envelope = time::error_envelope("remove", &err);
    assert_eq!(envelope["status"], "error");
    assert_eq!(envelope["cmd"], "remove");
    assert_eq!(envelope["kind"], "MODULE_REQUIRED_BY");
    assert_eq!(envelope["payload"]["dependents"][1], "github");
    assert!(envelope["detail"].as_str().unwrap().contains("commit-rules, github"));

    let ok = time::command_envelope("add", "ok", serde_json::json!({"installed": ["ruff"]}));
    assert_eq!(ok["status"], "ok");
    assert_eq!(ok["installed"][0], "ruff");
    assert!(ok["event_id"].as_str().is_some());

    let missing = LodestarError::ModuleNotFound {
        id: "ruff".into(),
        lookup: Lookup::Manifest,
    };
    assert_eq!(time::error_envelope("remove", &missing)["payload"]["lookup"], "manifest");
}

#[test]
fn bundled_catalog_ships_module_and_template_per_bundle() {
    let bundles = assets::embedded_bundles();
    assert!(bundles.contains_key("ruff"));
    for (id, bundle) in &bundles {
        assert!(bundle.module_toml.is_some(), "{id} lacks module.toml");
        assert!(bundle.template.is_some(), "{id} lacks template.md");
    }
    assert_eq!(
        assets::catalog_override(Some("/tmp/catalog".into())).as_deref(),
        Some(std::path::Path::new("/tmp/catalog"))
    );
}
