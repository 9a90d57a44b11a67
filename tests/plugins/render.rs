use lodestar::core::config::LodestarConfig;
use lodestar::core::formats::{self, ConfigValue, ValueMap};
use lodestar::core::store::Store;
use lodestar::plugins::lifecycle::add_modules;
use lodestar::plugins::notes;
use lodestar::plugins::registry::Registry;
use lodestar::plugins::render::{condense, filter_sections, render, render_modules};
use std::collections::BTreeMap;
use std::fs;
use tempfile::tempdir;

const TEMPLATE: &str = "# Ruff\n\n## Style\n\n- Line length: {{ style.line_length | 88 }}\n- Quotes: {{ style.quote | double }}\n\n### Docstrings\n\n- Convention: {{docstring.convention}}\n\n## Rules\n\n{{#if rules.select}}\n- Selected: {{rules.select}}\n{{else}}\n- Defaults\n{{/if}}\n\n## Commands\n\n```sh\n## fence-marker\n```\n";

fn values() -> ValueMap {
    let mut map = ValueMap::new();
    formats::set_path(&mut map, "style.line_length", ConfigValue::scalar("100"));
    formats::set_path(
        &mut map,
        "rules.select",
        ConfigValue::List(vec![ConfigValue::scalar("E"), ConfigValue::scalar("W")]),
    );
    map
}

#[test]
fn rendering_is_deterministic() {
    let filter = vec!["style".to_string()];
    let first = render(TEMPLATE, &values(), &filter);
    for _ in 0..3 {
        assert_eq!(render(TEMPLATE, &values(), &filter), first);
    }
    assert_eq!(render(TEMPLATE, &values(), &[]), render(TEMPLATE, &values(), &[]));
}

#[test]
fn values_defaults_and_conditionals() {
    let out = render(TEMPLATE, &values(), &[]);
    assert!(out.contains("- Line length: 100\n"));
    assert!(out.contains("- Quotes: double\n"));
    assert!(out.contains("- Convention: {{docstring.convention}}\n"));
    assert!(out.contains("- Selected: E, W\n"));
    assert!(!out.contains("Defaults"));
    assert!(!out.contains("{{#if"));

    let bare = render(TEMPLATE, &ValueMap::new(), &[]);
    assert!(bare.contains("- Line length: 88\n"));
    assert!(bare.contains("- Defaults\n"));
}

#[test]
fn section_filter_keeps_matching_sections_with_subsections() {
    let out = render(TEMPLATE, &values(), &["STYLE".to_string()]);
    assert!(out.starts_with("## Style\n"));
    assert!(out.contains("### Docstrings"));
    assert!(!out.contains("## Rules"));
    assert!(!out.contains("## Commands"));

    // Fenced lines are body text, not headings.
    let fenced = render(TEMPLATE, &values(), &["fence-marker".to_string()]);
    assert!(fenced.starts_with("## Commands\n"));

    let sub = filter_sections(&render(TEMPLATE, &values(), &[]), &["convention".to_string()]);
    assert!(sub.starts_with("### Docstrings"));
    assert!(!sub.contains("Line length"));

    assert_eq!(render(TEMPLATE, &values(), &["kubernetes".to_string()]), "");
}

#[test]
fn filtering_never_changes_substituted_values() {
    let full = render(TEMPLATE, &values(), &[]);
    let filtered = render(TEMPLATE, &values(), &["rules".to_string()]);
    assert!(full.contains(&filtered));
}

#[test]
fn condense_demotes_the_first_sections() {
    let md = "# Tool\n\n## One\n\na\n\n### Deep\n\nb\n\n## Two\n\nc\n\n## Three\n\nd\n";
    let short = condense(md, 2);
    assert!(short.contains("#### One"));
    assert!(short.contains("##### Deep"));
    assert!(short.contains("#### Two"));
    assert!(!short.contains("Three"));
}

#[test]
fn render_modules_serves_artifacts_snapshots_and_catalog() {
    let tmp = tempdir().unwrap();
    fs::write(tmp.path().join("ruff.toml"), "line-length = 100\n").unwrap();
    fs::write(tmp.path().join("requirements.txt"), "").unwrap();
    let store = Store::for_project(tmp.path());
    let registry = Registry::load(None).unwrap();
    add_modules(&store, &registry, &LodestarConfig::default(), &["ruff".to_string()]).unwrap();
    notes::add(&store, "ruff", "run fix before committing").unwrap();

    let out = render_modules(&store, &registry, &["ruff".to_string()], &[]).unwrap();
    assert_eq!(out.modules[0].origin, "artifact");
    assert!(out.document.contains("Maximum line length: 100"));
    assert!(out.document.trim_end().ends_with("## Notes\n\n- run fix before committing"));

    // Notes survive a filter that drops every template section.
    let filtered =
        render_modules(&store, &registry, &["ruff".to_string()], &["zzz".to_string()]).unwrap();
    assert!(filtered.document.starts_with("## Notes"));

    fs::remove_file(store.artifact_path("ruff")).unwrap();
    let rebuilt = render_modules(&store, &registry, &["ruff".to_string()], &[]).unwrap();
    assert_eq!(rebuilt.modules[0].origin, "snapshot");
    assert!(rebuilt.document.contains("Maximum line length: 100"));

    let both = render_modules(
        &store,
        &registry,
        &["python".to_string(), "black".to_string()],
        &[],
    )
    .unwrap();
    assert_eq!(both.modules[1].origin, "catalog");
    assert_eq!(both.document.matches("\n\n---\n\n").count(), 1);

    let err = render_modules(&store, &registry, &["cobol".to_string()], &[]).unwrap_err();
    assert_eq!(err.kind(), "MODULE_NOT_FOUND");
}

#[test]
fn retrieve_links_append_condensed_summaries() {
    let tmp = tempdir().unwrap();
    fs::write(tmp.path().join("ruff.toml"), "line-length = 100\n").unwrap();
    fs::write(tmp.path().join("pytest.ini"), "[pytest]\n").unwrap();
    let store = Store::for_project(tmp.path());
    let registry = Registry::load(None).unwrap();
    let mut links = BTreeMap::new();
    links.insert("pytest".to_string(), vec!["ruff".to_string()]);
    let config = LodestarConfig {
        retrieve_links: links,
        ..LodestarConfig::default()
    };

    add_modules(&store, &registry, &config, &["pytest".to_string()]).unwrap();
    let alone = fs::read_to_string(store.artifact_path("pytest")).unwrap();
    assert!(!alone.contains("## Related: ruff"));

    // Installing the linked module re-renders the artifact that links to it.
    add_modules(&store, &registry, &config, &["ruff".to_string()]).unwrap();
    let linked = fs::read_to_string(store.artifact_path("pytest")).unwrap();
    assert!(linked.contains("## Related: ruff"));
    assert!(linked.contains("#### Style"));
}
