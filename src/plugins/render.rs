//! Artifact rendering.
//!
//! Templates are rendered in two passes over the value map:
//!
//! 1. `{{#if key}} .. {{else}} .. {{/if}}` and `{{#unless key}} .. {{/unless}}`
//!    blocks are resolved (they nest; a tag alone on its line takes the line
//!    with it).
//! 2. `{{key}}` and `{{ key | default }}` placeholders are substituted with
//!    the value's display text, the declared default, or left verbatim.
//!
//! An optional section filter then narrows the markdown to headings whose
//! own text mentions a keyword. Everything here is a pure function of its
//! inputs; the same template, values and filter give byte-identical output.

use crate::core::error::LodestarError;
use crate::core::formats::{self, ConfigValue, ValueMap};
use crate::core::journal::JournalEntry;
use crate::core::store::{self, Store};
use crate::core::time;
use crate::plugins::detect::ProjectProfile;
use crate::plugins::lifecycle::{self, Manifest};
use crate::plugins::notes;
use crate::plugins::registry::{Category, Registry};
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::sync::LazyLock;

static BLOCK_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*(#if|#unless|else|/if|/unless)\s*([A-Za-z0-9_.\-]*)\s*\}\}")
        .expect("static regex")
});

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z0-9_][A-Za-z0-9_.\-]*)\s*(?:\|\s*([^}]*?)\s*)?\}\}")
        .expect("static regex")
});

/// Present and neither empty nor `false`.
pub fn is_truthy(values: &ValueMap, key: &str) -> bool {
    match formats::lookup(values, key) {
        None => false,
        Some(ConfigValue::Scalar(s)) => {
            let s = s.trim();
            !s.is_empty() && !s.eq_ignore_ascii_case("false")
        }
        Some(ConfigValue::List(items)) => !items.is_empty(),
        Some(ConfigValue::Table(t)) => !t.is_empty(),
    }
}

struct Frame {
    parent_active: bool,
    condition: bool,
}

/// First pass: resolve conditional blocks. Stray `else`/closing tags stay verbatim.
pub fn resolve_conditionals(template: &str, values: &ValueMap) -> String {
    let mut out = String::with_capacity(template.len());
    let mut stack: Vec<Frame> = Vec::new();
    let mut active = true;
    let mut last = 0;

    for caps in BLOCK_TAG.captures_iter(template) {
        let Some(whole) = caps.get(0) else { continue };
        let (start, end) = standalone_span(template, last, whole.start(), whole.end());
        if active {
            out.push_str(&template[last..start]);
        }
        last = end;

        let tag = caps.get(1).map_or("", |m| m.as_str());
        let key = caps.get(2).map_or("", |m| m.as_str());
        match tag {
            "#if" | "#unless" => {
                let condition = is_truthy(values, key) != (tag == "#unless");
                stack.push(Frame {
                    parent_active: active,
                    condition,
                });
                active = active && condition;
            }
            "else" => match stack.last() {
                Some(frame) => active = frame.parent_active && !frame.condition,
                None if active => out.push_str(&template[start..end]),
                None => {}
            },
            _ => match stack.pop() {
                Some(frame) => active = frame.parent_active,
                None if active => out.push_str(&template[start..end]),
                None => {}
            },
        }
    }
    if active {
        out.push_str(&template[last..]);
    }
    out
}

/// Widen a tag's span to its whole line when nothing else is on that line.
fn standalone_span(text: &str, floor: usize, start: usize, end: usize) -> (usize, usize) {
    let line_start = text[..start].rfind('\n').map_or(0, |i| i + 1);
    if line_start < floor || !text[line_start..start].trim().is_empty() {
        return (start, end);
    }
    let rest = &text[end..];
    let line_end = rest.find('\n').map_or(text.len(), |i| end + i + 1);
    if text[end..line_end].trim().is_empty() {
        (line_start, line_end)
    } else {
        (start, end)
    }
}

/// Second pass: substitute scalar placeholders.
pub fn substitute(text: &str, values: &ValueMap) -> String {
    PLACEHOLDER
        .replace_all(text, |caps: &regex::Captures| {
            let key = caps.get(1).map_or("", |m| m.as_str());
            match formats::lookup(values, key) {
                Some(value) => value.to_string(),
                None => match caps.get(2) {
                    Some(default) => default.as_str().to_string(),
                    None => caps.get(0).map_or("", |m| m.as_str()).to_string(),
                },
            }
        })
        .into_owned()
}

pub fn render_template(template: &str, values: &ValueMap) -> String {
    substitute(&resolve_conditionals(template, values), values)
}

struct Heading {
    line: usize,
    level: usize,
}

fn heading_level(line: &str) -> Option<usize> {
    let hashes = line.bytes().take_while(|b| *b == b'#').count();
    if (1..=6).contains(&hashes) && line[hashes..].starts_with([' ', '\t', '\n', '\r']) {
        Some(hashes)
    } else if (1..=6).contains(&hashes) && line.len() == hashes {
        Some(hashes)
    } else {
        None
    }
}

fn headings(lines: &[&str]) -> Vec<Heading> {
    let mut out = Vec::new();
    let mut in_fence = false;
    for (idx, line) in lines.iter().enumerate() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
            in_fence = !in_fence;
            continue;
        }
        if in_fence {
            continue;
        }
        if let Some(level) = heading_level(line) {
            out.push(Heading { line: idx, level });
        }
    }
    out
}

/// Keep only sections whose heading or own body mentions any keyword
/// (case-insensitive). A kept section carries its subsections along.
/// Text before the first heading is dropped; no match yields "".
pub fn filter_sections(markdown: &str, keywords: &[String]) -> String {
    let keywords: Vec<String> = keywords
        .iter()
        .map(|k| k.trim().to_lowercase())
        .filter(|k| !k.is_empty())
        .collect();
    if keywords.is_empty() {
        return markdown.to_string();
    }

    let lines: Vec<&str> = markdown.split_inclusive('\n').collect();
    let heads = headings(&lines);
    let mut keep = vec![false; lines.len()];

    for (i, head) in heads.iter().enumerate() {
        let own_end = heads.get(i + 1).map_or(lines.len(), |h| h.line);
        let own_text = lines[head.line..own_end].concat().to_lowercase();
        if !keywords.iter().any(|k| own_text.contains(k)) {
            continue;
        }
        let end = heads[i + 1..]
            .iter()
            .find(|h| h.level <= head.level)
            .map_or(lines.len(), |h| h.line);
        keep[head.line..end].iter_mut().for_each(|k| *k = true);
    }

    lines
        .iter()
        .zip(keep)
        .filter_map(|(line, k)| k.then_some(*line))
        .collect()
}

pub fn render(template: &str, values: &ValueMap, filter: &[String]) -> String {
    filter_sections(&render_template(template, values), filter)
}

/// The first `count` level-2 sections, headings demoted two levels.
pub fn condense(markdown: &str, count: usize) -> String {
    let lines: Vec<&str> = markdown.split_inclusive('\n').collect();
    let heads = headings(&lines);
    let mut out = String::new();
    for head in heads.iter().filter(|h| h.level == 2).take(count) {
        let end = heads
            .iter()
            .find(|h| h.line > head.line && h.level <= 2)
            .map_or(lines.len(), |h| h.line);
        for line in &lines[head.line..end] {
            match heading_level(line) {
                Some(level) if level + 2 <= 6 => {
                    out.push_str("##");
                    out.push_str(line);
                }
                _ => out.push_str(line),
            }
        }
    }
    out
}

/// Everything that goes into one module's artifact.
pub struct ArtifactInput<'a> {
    pub template: &'a str,
    pub values: &'a ValueMap,
    pub commands: &'a BTreeMap<String, String>,
    pub config_file: Option<&'a str>,
    /// `(module id, that module's artifact)` for configured links.
    pub linked: Vec<(String, String)>,
}

pub fn compose_artifact(input: &ArtifactInput<'_>) -> String {
    let mut context = input.values.clone();
    for (name, cmd) in input.commands {
        formats::set_path(&mut context, &format!("commands.{name}"), ConfigValue::scalar(cmd));
    }
    let mut out = render_template(input.template, &context);
    if !out.ends_with('\n') {
        out.push('\n');
    }
    if let Some(file) = input.config_file {
        out.push_str(&format!("\n> Config source: `{file}`\n"));
    }
    for (id, text) in &input.linked {
        let summary = condense(text, 2);
        if summary.trim().is_empty() {
            continue;
        }
        out.push_str(&format!("\n## Related: {id}\n\n{}", summary.trim_start()));
        if !out.ends_with('\n') {
            out.push('\n');
        }
    }
    out
}

/// Row of the installed-modules table in the status artifact.
pub struct StatusEntry<'a> {
    pub id: &'a str,
    pub category: Category,
    pub version: &'a str,
}

pub fn render_status(
    profile: &ProjectProfile,
    installed: &[StatusEntry<'_>],
    recent: &[JournalEntry],
    now: u64,
) -> String {
    let mut out = String::from("# Project Status\n\n## Profile\n\n");
    let languages = if profile.languages.is_empty() {
        "none detected".to_string()
    } else {
        profile.languages.join(", ")
    };
    out.push_str(&format!("- Languages: {languages}\n"));
    out.push_str(&format!(
        "- Primary language: {}\n",
        profile.primary_language.as_deref().unwrap_or("unknown")
    ));
    out.push_str(&format!(
        "- Package manager: {}\n",
        profile.package_manager.as_deref().unwrap_or("none")
    ));

    out.push_str("\n## Installed Modules\n");
    if installed.is_empty() {
        out.push_str("\nNo modules installed.\n");
    }
    let mut by_category: BTreeMap<Category, Vec<&StatusEntry>> = BTreeMap::new();
    for entry in installed {
        by_category.entry(entry.category).or_default().push(entry);
    }
    for (category, entries) in by_category {
        out.push_str(&format!("\n### {category}\n\n"));
        for e in entries {
            out.push_str(&format!("- {} ({})\n", e.id, e.version));
        }
    }

    if !recent.is_empty() {
        out.push_str("\n## Recent Activity\n\n");
        for entry in recent.iter().rev() {
            out.push_str(&format!(
                "- {} {}: {}\n",
                time::relative_age(&entry.ts, now),
                entry.op,
                entry.summary
            ));
        }
    }

    out.push_str("\n## Retrievable\n\n");
    if installed.is_empty() {
        out.push_str("Nothing yet; run `lodestar init` or `lodestar add <id>`.\n");
    } else {
        let ids: Vec<&str> = installed.iter().map(|e| e.id).collect();
        out.push_str(&format!("`lodestar render <id>` for: {}\n", ids.join(", ")));
    }
    out
}

#[derive(Debug, Clone, Serialize)]
pub struct RenderedModule {
    pub id: String,
    /// `artifact`, `snapshot` or `catalog`: where the text came from.
    pub origin: &'static str,
    pub text: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RenderOutput {
    pub modules: Vec<RenderedModule>,
    pub document: String,
}

/// The `render` verb: serve pre-built artifacts, building on the fly when
/// one is missing, then filter and append the module's notes.
pub fn render_modules(
    store: &Store,
    registry: &Registry,
    ids: &[String],
    filter: &[String],
) -> Result<RenderOutput, LodestarError> {
    let manifest = Manifest::load(store)?;
    let all_notes = notes::load(store)?;
    let mut modules = Vec::new();

    for id in ids {
        let artifact_path = store.artifact_path(id);
        let (origin, body) = if artifact_path.is_file() {
            ("artifact", fs::read_to_string(&artifact_path)?)
        } else if manifest.installed.contains_key(id) {
            let module = registry.require(id)?;
            let snapshot = lifecycle::load_snapshot(store, id)?;
            let (values, commands, config_file) = match &snapshot {
                Some(s) => (s.values.clone(), s.commands.clone(), s.config_file.clone()),
                None => (ValueMap::new(), BTreeMap::new(), None),
            };
            let text = compose_artifact(&ArtifactInput {
                template: &module.template,
                values: &values,
                commands: &commands,
                config_file: config_file.as_deref(),
                linked: Vec::new(),
            });
            ("snapshot", text)
        } else {
            let module = registry.require(id)?;
            let commands = lifecycle::resolve_commands(&module.commands, manifest.profile.package_manager.as_deref());
            let text = compose_artifact(&ArtifactInput {
                template: &module.template,
                values: &ValueMap::new(),
                commands: &commands,
                config_file: None,
                linked: Vec::new(),
            });
            ("catalog", text)
        };

        let mut text = filter_sections(&body, filter);
        if let Some(module_notes) = all_notes.get(id)
            && !module_notes.is_empty()
        {
            if !text.is_empty() {
                if !text.ends_with('\n') {
                    text.push('\n');
                }
                text.push('\n');
            }
            text.push_str("## Notes\n\n");
            for note in module_notes {
                text.push_str(&format!("- {}\n", note.text));
            }
        }
        modules.push(RenderedModule {
            id: id.clone(),
            origin,
            text,
        });
    }

    let document = modules
        .iter()
        .map(|m| m.text.trim_end().to_string())
        .collect::<Vec<_>>()
        .join("\n\n---\n\n");
    Ok(RenderOutput { modules, document })
}

/// Rewrite `retrieve/_status.md` from the manifest and recent history.
pub fn rebuild_status(store: &Store, manifest: &Manifest) -> Result<(), LodestarError> {
    let recent = crate::core::journal::recent(store, 8)?;
    let entries: Vec<StatusEntry> = manifest
        .installed
        .iter()
        .map(|(id, m)| StatusEntry {
            id,
            category: m.category,
            version: &m.version,
        })
        .collect();
    let text = render_status(&manifest.profile, &entries, &recent.entries, time::now_secs());
    store::write_atomic(&store.status_artifact_path(), text.as_bytes())
}
