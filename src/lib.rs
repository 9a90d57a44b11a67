//! Lodestar: pre-computed project knowledge for coding agents.
//!
//! Lodestar looks at a project tree, works out which languages, tools and
//! frameworks are in use, reads their *actual* configuration values, and
//! renders one small markdown document per module that an agent can read
//! instead of guessing.
//!
//! # Pipeline
//!
//! - **Detect** (`plugins::detect`): match the tree against each catalog
//!   module's declarative rules and propose modules.
//! - **Scan** (`plugins::scanner`): parse the module's config file and
//!   project out the declared dotted keys.
//! - **Validate** (`plugins::registry`): category contracts at catalog
//!   load, conflicts and dependents on every add/remove.
//! - **Lifecycle** (`plugins::lifecycle`): install, remove and update
//!   modules against `.lodestar/manifest.json`.
//! - **Drift** (`plugins::drift`): diff fresh scans against snapshots and
//!   spot tools that appeared or disappeared.
//! - **Render** (`plugins::render`): substitute values into templates and
//!   persist `retrieve/<id>.md`.
//!
//! # State
//!
//! Everything lives in `<project>/.lodestar/` and is written atomically.
//! `config.toml` and `notes.json` belong to the user; pipeline verbs only
//! read them.
//!
//! ```bash
//! lodestar init
//! lodestar add ruff
//! lodestar render ruff --filter style
//! lodestar sync --dry-run
//! ```

pub mod core;
pub mod plugins;

mod cli;

use crate::cli::{CatalogCommand, Cli, Command, NoteCommand, OutputFormat};
use crate::core::config::{self, LodestarConfig};
use crate::core::error::LodestarError;
use crate::core::store::{self, Store};
use crate::core::tui::{self, ItemStatus};
use crate::core::{assets, journal, time};
use crate::plugins::detect::Detection;
use crate::plugins::drift::{self, SyncOutcome};
use crate::plugins::lifecycle::{self, AddOutcome, Manifest, UpdateTarget};
use crate::plugins::registry::{self, Category, Registry};
use crate::plugins::{detect, notes, render, scanner};
use clap::Parser;
use colored::Colorize;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::path::PathBuf;

/// Everything a verb needs, resolved once per invocation.
struct Context {
    store: Store,
    catalog: Option<PathBuf>,
    format: OutputFormat,
}

impl Context {
    fn registry(&self) -> Result<Registry, LodestarError> {
        Registry::load(self.catalog.as_deref())
    }

    fn config(&self) -> Result<LodestarConfig, LodestarError> {
        config::load_config(&self.store)
    }

    fn json(&self) -> bool {
        self.format == OutputFormat::Json
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<JsonValue, LodestarError> {
    serde_json::to_value(value)
        .map_err(|e| LodestarError::IoError(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))
}

fn command_name(command: &Command) -> &'static str {
    match command {
        Command::Init => "init",
        Command::Detect => "detect",
        Command::Add { .. } => "add",
        Command::Remove { .. } => "remove",
        Command::Sync { .. } => "sync",
        Command::Update { .. } => "update",
        Command::Render { .. } => "render",
        Command::Scan { .. } => "scan",
        Command::Status => "status",
        Command::Catalog(_) => "catalog",
        Command::Note(_) => "note",
    }
}

pub fn run() -> Result<(), LodestarError> {
    let cli = Cli::parse();
    let current_dir = std::env::current_dir()?;
    let project_root = match cli.dir {
        Some(dir) => dir,
        None => store::find_project_root(&current_dir).unwrap_or(current_dir),
    };
    let ctx = Context {
        store: Store::for_project(&project_root),
        catalog: assets::catalog_override(cli.catalog),
        format: cli.format,
    };
    let cmd = command_name(&cli.command);

    match dispatch(&ctx, cli.command) {
        Ok(payload) => {
            if ctx.json() {
                println!("{}", time::command_envelope(cmd, "ok", payload));
            }
            Ok(())
        }
        Err(err) => {
            if ctx.json() {
                println!("{}", time::error_envelope(cmd, &err));
            } else {
                tui::print_error(err.kind(), &err.to_string());
            }
            Err(err)
        }
    }
}

/// Run one verb. Text output is printed here; the returned payload feeds
/// the JSON envelope.
fn dispatch(ctx: &Context, command: Command) -> Result<JsonValue, LodestarError> {
    match command {
        Command::Init => {
            let registry = ctx.registry()?;
            let outcome = lifecycle::init(&ctx.store, &registry, &ctx.config()?)?;
            if !ctx.json() {
                print_detection(&outcome.detection);
                print_added(&outcome.added);
                for (a, b) in &outcome.conflicts {
                    tui::print_item(&format!("{a} conflicts with {b}: choose one with `lodestar add`"), ItemStatus::Warning);
                }
            }
            to_json(&outcome)
        }
        Command::Detect => {
            let registry = ctx.registry()?;
            let detection = detect::detect(&registry, &ctx.store.project_root, &ctx.config()?);
            let conflicts = registry::find_init_conflicts(&registry, &detection.ids());
            if !ctx.json() {
                print_detection(&detection);
                for (a, b) in &conflicts {
                    tui::print_item(&format!("{a} conflicts with {b}"), ItemStatus::Warning);
                }
            }
            Ok(serde_json::json!({ "detection": to_json(&detection)?, "conflicts": conflicts }))
        }
        Command::Add { ids } => {
            let registry = ctx.registry()?;
            let outcome = lifecycle::add_modules(&ctx.store, &registry, &ctx.config()?, &ids)?;
            if !ctx.json() {
                tui::print_header("lodestar add");
                print_added(&outcome);
            }
            to_json(&outcome)
        }
        Command::Remove { id } => {
            let registry = ctx.registry()?;
            let outcome = lifecycle::remove(&ctx.store, &registry, &ctx.config()?, &id)?;
            if !ctx.json() {
                tui::print_item(&format!("removed {}", outcome.removed), ItemStatus::Removed);
                for task in &outcome.orphaned_tasks {
                    tui::print_item(
                        &format!("task '{task}' still references {id}; it was kept"),
                        ItemStatus::Warning,
                    );
                }
            }
            to_json(&outcome)
        }
        Command::Sync { dry_run } => {
            let registry = ctx.registry()?;
            let outcome = drift::sync(&ctx.store, &registry, &ctx.config()?, dry_run)?;
            if !ctx.json() {
                print_sync(&outcome);
            }
            to_json(&outcome)
        }
        Command::Update { id, all } => {
            let target = match (id, all) {
                (Some(id), false) => UpdateTarget::One(id),
                _ => UpdateTarget::All,
            };
            let registry = ctx.registry()?;
            let outcome = lifecycle::update_modules(&ctx.store, &registry, &ctx.config()?, &target)?;
            if !ctx.json() {
                tui::print_header("lodestar update");
                for change in &outcome.updated {
                    tui::print_item(&format!("{} {} -> {}", change.id, change.from, change.to), ItemStatus::Updated);
                }
                for skip in &outcome.skipped {
                    let catalog = skip.catalog.as_deref().unwrap_or("not in catalog");
                    tui::print_item(&format!("{} {} (catalog: {catalog})", skip.id, skip.installed), ItemStatus::Skipped);
                }
            }
            to_json(&outcome)
        }
        Command::Render { ids, filter } => {
            let registry = ctx.registry()?;
            let output = render::render_modules(&ctx.store, &registry, &ids, &filter)?;
            if !ctx.json() {
                println!("{}", output.document);
            }
            to_json(&output)
        }
        Command::Scan { id } => {
            let registry = ctx.registry()?;
            let result = scanner::scan(&registry, &id, &ctx.store.project_root)?;
            if !ctx.json() {
                tui::print_header(&format!("lodestar scan {id}"));
                match &result.config_file {
                    Some(file) => tui::print_item(&format!("config: {file}"), ItemStatus::Info),
                    None => tui::print_item(&result.reason().unwrap_or_default(), ItemStatus::Skipped),
                }
                for (key, value) in crate::core::formats::flatten(&result.values) {
                    tui::print_item(&format!("{key} = {value}"), ItemStatus::Unchanged);
                }
            }
            to_json(&result)
        }
        Command::Status => status(ctx),
        Command::Catalog(catalog) => match catalog.command {
            CatalogCommand::List { category } => {
                let registry = ctx.registry()?;
                let wanted = category
                    .map(|c| c.parse::<Category>())
                    .transpose()
                    .map_err(|e| LodestarError::parse("--category", e))?;
                let modules: Vec<JsonValue> = registry
                    .modules()
                    .filter(|m| wanted.is_none_or(|c| m.category == c))
                    .map(|m| {
                        if !ctx.json() {
                            println!(
                                "  {:<18} {:<12} {:<8} {}",
                                m.id.bold(),
                                m.category.as_str(),
                                m.version,
                                m.description.bright_black()
                            );
                        }
                        serde_json::json!({
                            "id": m.id,
                            "category": m.category,
                            "version": m.version,
                            "description": m.description,
                        })
                    })
                    .collect();
                Ok(serde_json::json!({ "origin": registry.origin().to_string_lossy(), "modules": modules }))
            }
            CatalogCommand::Validate => {
                let registry = ctx.registry()?;
                if !ctx.json() {
                    tui::print_item(
                        &format!("{} modules satisfy their category contracts", registry.len()),
                        ItemStatus::Created,
                    );
                }
                Ok(serde_json::json!({ "modules": registry.len(), "violations": [] }))
            }
        },
        Command::Note(note) => match note.command {
            NoteCommand::Add { module, text } => {
                ctx.registry()?.require(&module)?;
                let added = notes::add(&ctx.store, &module, &text)?;
                if !ctx.json() {
                    tui::print_item(&format!("{module}: {}", added.text), ItemStatus::Created);
                }
                to_json(&added)
            }
            NoteCommand::Remove { module, which } => {
                let removed = notes::remove(&ctx.store, &module, which)?;
                if !ctx.json() {
                    if removed.is_empty() {
                        tui::print_item(&format!("{module}: no matching note"), ItemStatus::Skipped);
                    }
                    for n in &removed {
                        tui::print_item(&format!("{module}: {}", n.text), ItemStatus::Removed);
                    }
                }
                to_json(&removed)
            }
            NoteCommand::List { module } => {
                let mut book = notes::load(&ctx.store)?;
                if let Some(module) = &module {
                    book.retain(|id, _| id == module);
                }
                if !ctx.json() {
                    for (id, entries) in &book {
                        tui::print_section(id);
                        for (i, n) in entries.iter().enumerate() {
                            tui::print_item(&format!("{}. {}", i + 1, n.text), ItemStatus::Info);
                        }
                    }
                }
                to_json(&book)
            }
        },
    }
}

fn status(ctx: &Context) -> Result<JsonValue, LodestarError> {
    let manifest = Manifest::load(&ctx.store)?;
    let stale = lifecycle::stale_artifacts(&ctx.store, &manifest)?;
    let recent = journal::recent(&ctx.store, 8)?;

    if !ctx.json() {
        tui::print_header("lodestar status");
        if !ctx.store.is_initialized() {
            tui::print_item("not initialized; run `lodestar init`", ItemStatus::Warning);
        }
        if let Some(lang) = &manifest.profile.primary_language {
            tui::print_item(&format!("primary language: {lang}"), ItemStatus::Info);
        }
        tui::print_section("Installed");
        for (id, m) in &manifest.installed {
            let state = if stale.contains(id) {
                ItemStatus::Warning
            } else {
                ItemStatus::Unchanged
            };
            tui::print_item(&format!("{id} {} ({})", m.version, m.category), state);
        }
        if !recent.entries.is_empty() {
            tui::print_section("Recent");
            let now = time::now_secs();
            for entry in recent.entries.iter().rev() {
                tui::print_item(
                    &format!("{} {} ({})", entry.op, entry.summary, time::relative_age(&entry.ts, now)),
                    ItemStatus::Info,
                );
            }
        }
    }

    Ok(serde_json::json!({
        "initialized": ctx.store.is_initialized(),
        "profile": to_json(&manifest.profile)?,
        "installed": to_json(&manifest.installed)?,
        "stale_artifacts": stale,
        "recent": to_json(&recent.entries)?,
        "skipped_history_lines": recent.skipped_lines,
    }))
}

fn print_detection(detection: &Detection) {
    tui::print_header("lodestar detect");
    if let Some(lang) = &detection.profile.primary_language {
        tui::print_item(&format!("primary language: {lang}"), ItemStatus::Info);
    }
    for p in &detection.proposals {
        tui::print_item(&format!("{} ({}) via {}", p.id, p.category, p.evidence), ItemStatus::Info);
    }
    for id in &detection.ignored {
        tui::print_item(&format!("{id} ignored by config"), ItemStatus::Skipped);
    }
    for condition in &detection.conditions {
        tui::print_item(condition, ItemStatus::Warning);
    }
}

fn print_added(outcome: &AddOutcome) {
    for report in &outcome.installed {
        let line = match (&report.config_file, &report.reason) {
            (Some(file), _) => format!("{} {} (config: {file})", report.id, report.version),
            (None, Some(reason)) => format!("{} {} ({reason})", report.id, report.version),
            (None, None) => format!("{} {}", report.id, report.version),
        };
        tui::print_item(&line, ItemStatus::Created);
    }
    if !outcome.pulled_in.is_empty() {
        tui::print_item(&format!("required: {}", outcome.pulled_in.join(", ")), ItemStatus::Info);
    }
    for id in &outcome.already_installed {
        tui::print_item(&format!("{id} already installed"), ItemStatus::Unchanged);
    }
    for blocked in &outcome.blocked {
        tui::print_item(
            &format!("{} skipped: conflicts with {}", blocked.id, blocked.conflicts.join(", ")),
            ItemStatus::Warning,
        );
    }
}

fn print_sync(outcome: &SyncOutcome) {
    let title = if outcome.dry_run { "lodestar sync (dry run)" } else { "lodestar sync" };
    tui::print_header(title);
    let report = &outcome.report;
    for drift in &report.changed {
        tui::print_section(&drift.module);
        for change in &drift.changes {
            let old = change.old.as_deref().unwrap_or("(absent)");
            let new = change.new.as_deref().unwrap_or("(absent)");
            tui::print_item(&format!("{}: {old} -> {new}", change.key), ItemStatus::Updated);
        }
        if let Some(reason) = &drift.reason {
            tui::print_item(reason, ItemStatus::Warning);
        }
    }
    if report.changed.is_empty() {
        tui::print_item(&format!("{} module(s) unchanged", report.unchanged.len()), ItemStatus::Unchanged);
    }
    for id in &report.new_tools {
        tui::print_item(&format!("{id} detected; install with `lodestar add {id}`"), ItemStatus::Info);
    }
    for id in &report.removed_tools {
        tui::print_item(&format!("{id} no longer detected"), ItemStatus::Warning);
    }
    for id in &report.unchecked {
        tui::print_item(&format!("{id} is not in the catalog"), ItemStatus::Skipped);
    }
    for skipped in &report.unreadable {
        tui::print_item(&format!("{}: {}", skipped.module, skipped.reason), ItemStatus::Warning);
    }
}
