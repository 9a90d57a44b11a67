use lodestar::core::error::LodestarError;
use lodestar::plugins::registry::{
    Category, ModuleDefinition, Registry, check_conflicts, check_removal,
    find_init_conflicts, requirement_closure,
};
use std::collections::BTreeSet;
use std::fs;
use tempfile::tempdir;

fn linter(id: &str, conflicts: &[&str]) -> ModuleDefinition {
    let mut m = ModuleDefinition::new(id, Category::Linter);
    m.for_languages = vec!["python".into()];
    m.conflicts_with = conflicts.iter().map(|s| s.to_string()).collect();
    m.commands.insert("check".into(), format!("{id} ."));
    m
}

fn installed(ids: &[&str]) -> BTreeSet<String> {
    ids.iter().map(|s| s.to_string()).collect()
}

fn violation_messages(err: LodestarError) -> Vec<String> {
    match err {
        LodestarError::CategoryContractViolation { violations } => {
            violations.into_iter().map(|v| v.to_string()).collect()
        }
        other => panic!("expected contract violation, got {other}"),
    }
}

#[test]
fn bundled_catalog_satisfies_every_contract() {
    let registry = Registry::load(None).expect("bundled catalog must load");
    assert!(registry.len() >= 25);
    for id in ["python", "ruff", "flake8", "git", "commit-rules", "uv", "cargo"] {
        assert!(registry.get(id).is_some(), "missing {id}");
    }

    // Symmetry holds for every pair in the shipped catalog.
    for module in registry.modules() {
        for other in &module.conflicts_with {
            let back = registry.get(other).expect("conflict target exists");
            assert!(back.conflicts_with.contains(&module.id), "{} -> {other}", module.id);
        }
    }
}

#[test]
fn asymmetric_conflicts_are_rejected_at_load() {
    let err = Registry::from_modules(vec![linter("ruff", &["flake8"]), linter("flake8", &[])])
        .unwrap_err();
    assert_eq!(err.kind(), "CATEGORY_CONTRACT_VIOLATION");
    let messages = violation_messages(err);
    assert!(messages.iter().any(|m| m.contains("not symmetric")));
}

#[test]
fn every_violation_is_collected() {
    let mut nameless = ModuleDefinition::new("tox", Category::Testing);
    nameless.name = String::new();
    let mut selfish = ModuleDefinition::new("loop", Category::Tool);
    selfish.requires = vec!["loop".into(), "ghost".into()];

    let messages = violation_messages(Registry::from_modules(vec![nameless, selfish]).unwrap_err());
    assert!(messages.iter().any(|m| m.contains("tox: missing required field 'name'")));
    assert!(messages.iter().any(|m| m.contains("tox: category 'testing' requires for_languages")));
    assert!(messages.iter().any(|m| m.contains("expects command 'test'")));
    assert!(messages.iter().any(|m| m.contains("loop: requires itself")));
    assert!(messages.iter().any(|m| m.contains("unknown module 'ghost'")));
}

#[test]
fn single_instance_siblings_must_conflict() {
    let messages =
        violation_messages(Registry::from_modules(vec![linter("ruff", &[]), linter("pylint", &[])]).unwrap_err());
    assert_eq!(messages.len(), 1);
    assert!(messages[0].contains("'pylint' and 'ruff'") || messages[0].contains("'ruff' and 'pylint'"));

    // Different languages do not collide.
    let mut clippy = ModuleDefinition::new("clippy", Category::Linter);
    clippy.for_languages = vec!["rust".into()];
    clippy.commands.insert("check".into(), "cargo clippy".into());
    assert!(Registry::from_modules(vec![linter("ruff", &[]), clippy]).is_ok());
}

#[test]
fn conflict_check_names_every_installed_conflict() {
    let registry = Registry::from_modules(vec![
        linter("ruff", &["flake8", "pylint"]),
        linter("flake8", &["ruff", "pylint"]),
        linter("pylint", &["ruff", "flake8"]),
    ])
    .unwrap();

    let err = check_conflicts(&registry, &installed(&["flake8", "pylint"]), "ruff").unwrap_err();
    match err {
        LodestarError::ModuleConflict { id, conflicts } => {
            assert_eq!(id, "ruff");
            assert_eq!(conflicts, vec!["flake8", "pylint"]);
        }
        other => panic!("unexpected {other}"),
    }
    assert!(check_conflicts(&registry, &installed(&[]), "ruff").is_ok());

    let pairs = find_init_conflicts(&registry, &["pylint".into(), "ruff".into(), "flake8".into()]);
    assert_eq!(
        pairs,
        vec![
            ("flake8".to_string(), "pylint".to_string()),
            ("flake8".to_string(), "ruff".to_string()),
            ("pylint".to_string(), "ruff".to_string()),
        ]
    );
}

#[test]
fn removal_is_blocked_by_dependents() {
    let mut git = ModuleDefinition::new("git", Category::Vcs);
    for cmd in ["commit", "status", "diff", "log"] {
        git.commands.insert(cmd.into(), format!("git {cmd}"));
    }
    let mut rules = ModuleDefinition::new("commit-rules", Category::Tool);
    rules.requires = vec!["git".into()];
    let registry = Registry::from_modules(vec![git, rules]).unwrap();

    let err = check_removal(&registry, &installed(&["git", "commit-rules"]), "git").unwrap_err();
    assert_eq!(err.kind(), "MODULE_REQUIRED_BY");
    assert!(err.to_string().contains("commit-rules"));
    assert!(check_removal(&registry, &installed(&["git"]), "git").is_ok());

    assert_eq!(requirement_closure(&registry, "commit-rules").unwrap(), vec!["git"]);
}

#[test]
fn catalog_directory_bundles_are_checked() {
    let tmp = tempdir().unwrap();
    let bundle = tmp.path().join("taskfile");
    fs::create_dir_all(&bundle).unwrap();
    fs::write(
        bundle.join("module.toml"),
        "id = \"taskfile\"\nname = \"Taskfile\"\ncategory = \"tool\"\nversion = \"1.0.0\"\ndescription = \"Task runner\"\n",
    )
    .unwrap();
    let err = Registry::from_dir(tmp.path()).unwrap_err();
    assert!(violation_messages(err).iter().any(|m| m.contains("missing template.md")));

    fs::write(bundle.join("template.md"), "# Taskfile\n").unwrap();
    let registry = Registry::from_dir(tmp.path()).unwrap();
    assert_eq!(registry.ids().collect::<Vec<_>>(), vec!["taskfile"]);

    fs::write(bundle.join("module.toml"), "id = [").unwrap();
    assert_eq!(Registry::from_dir(tmp.path()).unwrap_err().kind(), "PARSE_ERROR");
}
