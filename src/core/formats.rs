//! Config file parsers that normalise every supported format into one
//! nested [`ValueMap`].
//!
//! Scalars keep their textual form: `line-length = 100` becomes `"100"`,
//! `strict: yes` stays `"yes"`. Nothing downstream coerces types; values
//! are compared and rendered as display text.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::fmt;

pub type ValueMap = BTreeMap<String, ConfigValue>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "JsonValue", into = "JsonValue")]
pub enum ConfigValue {
    Scalar(String),
    List(Vec<ConfigValue>),
    Table(ValueMap),
}

impl ConfigValue {
    pub fn scalar(s: impl Into<String>) -> Self {
        ConfigValue::Scalar(s.into())
    }

    pub fn as_table(&self) -> Option<&ValueMap> {
        match self {
            ConfigValue::Table(t) => Some(t),
            _ => None,
        }
    }
}

impl fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigValue::Scalar(s) => write!(f, "{s}"),
            ConfigValue::List(items) => {
                let parts: Vec<String> = items.iter().map(|i| i.to_string()).collect();
                write!(f, "{}", parts.join(", "))
            }
            ConfigValue::Table(t) => {
                let parts: Vec<String> = t.iter().map(|(k, v)| format!("{k}: {v}")).collect();
                write!(f, "{{{}}}", parts.join(", "))
            }
        }
    }
}

impl From<JsonValue> for ConfigValue {
    fn from(value: JsonValue) -> Self {
        match value {
            JsonValue::Null => ConfigValue::scalar("null"),
            JsonValue::Bool(b) => ConfigValue::scalar(b.to_string()),
            JsonValue::Number(n) => ConfigValue::scalar(n.to_string()),
            JsonValue::String(s) => ConfigValue::Scalar(s),
            JsonValue::Array(items) => ConfigValue::List(items.into_iter().map(Into::into).collect()),
            JsonValue::Object(obj) => {
                ConfigValue::Table(obj.into_iter().map(|(k, v)| (k, v.into())).collect())
            }
        }
    }
}

impl From<ConfigValue> for JsonValue {
    fn from(value: ConfigValue) -> Self {
        match value {
            ConfigValue::Scalar(s) => JsonValue::String(s),
            ConfigValue::List(items) => JsonValue::Array(items.into_iter().map(Into::into).collect()),
            ConfigValue::Table(t) => {
                JsonValue::Object(t.into_iter().map(|(k, v)| (k, v.into())).collect())
            }
        }
    }
}

impl From<toml::Value> for ConfigValue {
    fn from(value: toml::Value) -> Self {
        match value {
            toml::Value::String(s) => ConfigValue::Scalar(s),
            toml::Value::Integer(i) => ConfigValue::scalar(i.to_string()),
            toml::Value::Boolean(b) => ConfigValue::scalar(b.to_string()),
            toml::Value::Datetime(dt) => ConfigValue::scalar(dt.to_string()),
            float @ toml::Value::Float(_) => ConfigValue::scalar(float.to_string()),
            toml::Value::Array(items) => ConfigValue::List(items.into_iter().map(Into::into).collect()),
            toml::Value::Table(t) => {
                ConfigValue::Table(t.into_iter().map(|(k, v)| (k, v.into())).collect())
            }
        }
    }
}

/// File formats a module can declare for its config locations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigFormat {
    Toml,
    Json,
    Ini,
    Yaml,
    Gomod,
    /// File presence only.
    Exists,
    /// Directory presence only.
    Dir,
    /// Any top-level entry matching a glob pattern.
    Glob,
}

/// Parse `text` as `format`. Presence-only formats yield an empty map.
pub fn parse(format: ConfigFormat, text: &str) -> Result<ValueMap, String> {
    match format {
        ConfigFormat::Toml => parse_toml(text),
        ConfigFormat::Json => parse_json(text),
        ConfigFormat::Ini => parse_ini(text),
        ConfigFormat::Yaml => parse_yaml(text),
        ConfigFormat::Gomod => parse_gomod(text),
        ConfigFormat::Exists | ConfigFormat::Dir | ConfigFormat::Glob => Ok(ValueMap::new()),
    }
}

pub fn parse_toml(text: &str) -> Result<ValueMap, String> {
    let table = text.parse::<toml::Table>().map_err(|e| e.to_string())?;
    Ok(table.into_iter().map(|(k, v)| (k, v.into())).collect())
}

pub fn parse_json(text: &str) -> Result<ValueMap, String> {
    let stripped = strip_json_comments(text);
    let value: JsonValue = serde_json::from_str(&stripped).map_err(|e| e.to_string())?;
    match value.into() {
        ConfigValue::Table(t) => Ok(t),
        _ => Err("top-level JSON value is not an object".to_string()),
    }
}

/// Drop `//` and `/* */` comments outside strings (tsconfig, biome.jsonc).
fn strip_json_comments(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    let mut in_string = false;
    while let Some(c) = chars.next() {
        if in_string {
            out.push(c);
            if c == '\\' {
                if let Some(escaped) = chars.next() {
                    out.push(escaped);
                }
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match (c, chars.peek()) {
            ('"', _) => {
                in_string = true;
                out.push(c);
            }
            ('/', Some('/')) => {
                for skipped in chars.by_ref() {
                    if skipped == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            ('/', Some('*')) => {
                chars.next();
                let mut prev = ' ';
                for skipped in chars.by_ref() {
                    if prev == '*' && skipped == '/' {
                        break;
                    }
                    prev = skipped;
                }
            }
            _ => out.push(c),
        }
    }
    out
}

/// INI / setup.cfg style: `[section]`, `key = value` or `key: value`,
/// indented continuation lines appended to the previous value.
pub fn parse_ini(text: &str) -> Result<ValueMap, String> {
    let mut root = ValueMap::new();
    let mut section: Option<String> = None;
    let mut last_key: Option<String> = None;

    for (idx, raw) in text.lines().enumerate() {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with(';') {
            continue;
        }

        let is_continuation = raw.starts_with([' ', '\t']) && last_key.is_some();
        if is_continuation {
            let Some(key) = last_key.as_ref() else { continue };
            let target = ini_target(&mut root, section.as_deref());
            if let Some(ConfigValue::Scalar(existing)) = target.get_mut(key) {
                if !existing.is_empty() {
                    existing.push('\n');
                }
                existing.push_str(trimmed);
            }
            continue;
        }

        if trimmed.starts_with('[') {
            let name = trimmed
                .strip_prefix('[')
                .and_then(|s| s.strip_suffix(']'))
                .ok_or_else(|| format!("unterminated section header at line {}", idx + 1))?;
            let name = name.trim().to_string();
            root.entry(name.clone())
                .or_insert_with(|| ConfigValue::Table(ValueMap::new()));
            section = Some(name);
            last_key = None;
            continue;
        }

        let split_at = trimmed
            .find(['=', ':'])
            .ok_or_else(|| format!("expected 'key = value' at line {}", idx + 1))?;
        let key = trimmed[..split_at].trim().to_string();
        let value = trimmed[split_at + 1..].trim().to_string();
        if key.is_empty() {
            return Err(format!("empty key at line {}", idx + 1));
        }
        ini_target(&mut root, section.as_deref()).insert(key.clone(), ConfigValue::Scalar(value));
        last_key = Some(key);
    }
    Ok(root)
}

fn ini_target<'a>(root: &'a mut ValueMap, section: Option<&str>) -> &'a mut ValueMap {
    let Some(name) = section else { return root };
    let entry = root
        .entry(name.to_string())
        .or_insert_with(|| ConfigValue::Table(ValueMap::new()));
    if !matches!(entry, ConfigValue::Table(_)) {
        *entry = ConfigValue::Table(ValueMap::new());
    }
    match entry {
        ConfigValue::Table(t) => t,
        _ => unreachable!("entry was just normalised to a table"),
    }
}

struct YamlLine<'a> {
    number: usize,
    indent: usize,
    text: &'a str,
}

/// Indentation-based YAML subset: nested mappings, block and flow
/// sequences, quoted scalars, comments. Anchors, multi-document streams
/// and block scalars beyond `|`/`>` folding are out of scope.
pub fn parse_yaml(text: &str) -> Result<ValueMap, String> {
    let lines: Vec<YamlLine> = text
        .lines()
        .enumerate()
        .filter_map(|(idx, raw)| {
            let without_comment = strip_yaml_comment(raw);
            let trimmed = without_comment.trim_end();
            if trimmed.trim().is_empty() || trimmed.trim() == "---" {
                return None;
            }
            Some(YamlLine {
                number: idx + 1,
                indent: trimmed.len() - trimmed.trim_start().len(),
                text: trimmed.trim_start(),
            })
        })
        .collect();

    if lines.is_empty() {
        return Ok(ValueMap::new());
    }
    let mut pos = 0;
    let indent = lines[0].indent;
    let value = yaml_block(&lines, &mut pos, indent)?;
    if pos < lines.len() {
        return Err(format!("unexpected indentation at line {}", lines[pos].number));
    }
    match value {
        ConfigValue::Table(t) => Ok(t),
        _ => Err("top-level YAML value is not a mapping".to_string()),
    }
}

fn strip_yaml_comment(line: &str) -> &str {
    let mut in_single = false;
    let mut in_double = false;
    let mut prev = ' ';
    for (i, c) in line.char_indices() {
        match c {
            '\'' if !in_double => in_single = !in_single,
            '"' if !in_single => in_double = !in_double,
            '#' if !in_single && !in_double && (i == 0 || prev.is_whitespace()) => {
                return &line[..i];
            }
            _ => {}
        }
        prev = c;
    }
    line
}

fn yaml_block(lines: &[YamlLine], pos: &mut usize, indent: usize) -> Result<ConfigValue, String> {
    if lines[*pos].text.starts_with('-') {
        yaml_sequence(lines, pos, indent)
    } else {
        yaml_mapping(lines, pos, indent).map(ConfigValue::Table)
    }
}

fn yaml_mapping(lines: &[YamlLine], pos: &mut usize, indent: usize) -> Result<ValueMap, String> {
    let mut map = ValueMap::new();
    while *pos < lines.len() {
        let line = &lines[*pos];
        if line.indent < indent {
            break;
        }
        if line.indent > indent {
            return Err(format!("unexpected indentation at line {}", line.number));
        }
        if line.text.starts_with('-') {
            break;
        }
        let (key, rest) = split_yaml_key(line.text)
            .ok_or_else(|| format!("expected 'key: value' at line {}", line.number))?;
        *pos += 1;
        let value = yaml_key_value(lines, pos, indent, rest)?;
        map.insert(key, value);
    }
    Ok(map)
}

/// Value of a `key: rest` line whose key sits at `indent`: inline, or the
/// nested block / block scalar / same-indent sequence that follows it.
fn yaml_key_value(lines: &[YamlLine], pos: &mut usize, indent: usize, rest: &str) -> Result<ConfigValue, String> {
    if !(rest.is_empty() || rest == "|" || rest == ">") {
        return Ok(yaml_scalar(rest));
    }
    Ok(match lines.get(*pos) {
        Some(next) if next.indent > indent => {
            if rest.is_empty() {
                yaml_block(lines, pos, next.indent)?
            } else {
                yaml_block_scalar(lines, pos, indent, rest == ">")
            }
        }
        Some(next) if next.indent == indent && next.text.starts_with('-') => yaml_sequence(lines, pos, indent)?,
        _ => ConfigValue::scalar(""),
    })
}

fn yaml_sequence(lines: &[YamlLine], pos: &mut usize, indent: usize) -> Result<ConfigValue, String> {
    let mut items = Vec::new();
    while *pos < lines.len() {
        let line = &lines[*pos];
        if line.indent != indent || !line.text.starts_with('-') {
            if line.indent > indent {
                return Err(format!("unexpected indentation at line {}", line.number));
            }
            break;
        }
        let item = line.text[1..].trim_start();
        *pos += 1;
        if item.is_empty() {
            match lines.get(*pos) {
                Some(next) if next.indent > indent => items.push(yaml_block(lines, pos, next.indent)?),
                _ => items.push(ConfigValue::scalar("")),
            }
        } else if let Some((key, rest)) = split_yaml_key(item) {
            // `- name: x` followed by sibling keys aligned under `name`.
            let item_indent = indent + (line.text.len() - item.len());
            let mut entry = ValueMap::new();
            let value = yaml_key_value(lines, pos, item_indent, rest)?;
            entry.insert(key, value);
            if let Some(next) = lines.get(*pos)
                && next.indent == item_indent
                && !next.text.starts_with('-')
            {
                entry.extend(yaml_mapping(lines, pos, item_indent)?);
            }
            items.push(ConfigValue::Table(entry));
        } else {
            items.push(yaml_scalar(item));
        }
    }
    Ok(ConfigValue::List(items))
}

fn yaml_block_scalar(lines: &[YamlLine], pos: &mut usize, indent: usize, folded: bool) -> ConfigValue {
    let mut parts = Vec::new();
    while *pos < lines.len() && lines[*pos].indent > indent {
        parts.push(lines[*pos].text);
        *pos += 1;
    }
    ConfigValue::scalar(parts.join(if folded { " " } else { "\n" }))
}

fn split_yaml_key(text: &str) -> Option<(String, &str)> {
    let (key, rest) = if let Some(stripped) = text.strip_suffix(':') {
        (stripped, "")
    } else {
        let idx = text.find(": ")?;
        (&text[..idx], text[idx + 2..].trim())
    };
    let key = unquote(key.trim());
    if key.is_empty() || key.starts_with('-') {
        return None;
    }
    Some((key, rest))
}

fn yaml_scalar(raw: &str) -> ConfigValue {
    let raw = raw.trim();
    if let Some(inner) = raw.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
        let items = inner
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| ConfigValue::Scalar(unquote(s)))
            .collect();
        return ConfigValue::List(items);
    }
    ConfigValue::Scalar(unquote(raw))
}

fn unquote(s: &str) -> String {
    let s = s.trim();
    for q in ['"', '\''] {
        if s.len() >= 2 && s.starts_with(q) && s.ends_with(q) {
            return s[1..s.len() - 1].to_string();
        }
    }
    s.to_string()
}

/// go.mod: `module`, `go`, `toolchain` directives plus `require` entries
/// (single-line or parenthesised block) as `"<path> <version>"` items.
pub fn parse_gomod(text: &str) -> Result<ValueMap, String> {
    let mut map = ValueMap::new();
    let mut requires = Vec::new();
    let mut block: Option<(String, usize)> = None;

    for (idx, raw) in text.lines().enumerate() {
        let line = raw.split("//").next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }
        if let Some((directive, _)) = &block {
            if line == ")" {
                block = None;
            } else if directive == "require" {
                requires.push(ConfigValue::scalar(line.split_whitespace().collect::<Vec<_>>().join(" ")));
            }
            continue;
        }
        let mut parts = line.splitn(2, char::is_whitespace);
        let directive = parts.next().unwrap_or_default();
        let rest = parts.next().unwrap_or_default().trim();
        match directive {
            "module" | "go" | "toolchain" => {
                map.insert(directive.to_string(), ConfigValue::Scalar(unquote(rest)));
            }
            // Other directives (replace, tool, godebug, ...) carry nothing we
            // project, but their blocks still have to be skipped.
            _ if rest == "(" => {
                block = Some((directive.to_string(), idx + 1));
            }
            "require" => {
                requires.push(ConfigValue::scalar(rest.split_whitespace().collect::<Vec<_>>().join(" ")));
            }
            _ => {}
        }
    }
    if let Some((directive, line)) = block {
        return Err(format!("unterminated {directive} block opened at line {line}"));
    }
    if !requires.is_empty() {
        map.insert("require".to_string(), ConfigValue::List(requires));
    }
    Ok(map)
}

/// Resolve a dotted path. Keys that themselves contain dots are matched
/// before splitting, so `{"a.b": 1}` answers `a.b`.
pub fn lookup<'a>(map: &'a ValueMap, dotted: &str) -> Option<&'a ConfigValue> {
    if dotted.is_empty() {
        return None;
    }
    if let Some(v) = map.get(dotted) {
        return Some(v);
    }
    for (idx, _) in dotted.match_indices('.') {
        let (head, tail) = (&dotted[..idx], &dotted[idx + 1..]);
        if let Some(ConfigValue::Table(child)) = map.get(head)
            && let Some(found) = lookup(child, tail)
        {
            return Some(found);
        }
    }
    None
}

/// Insert at a dotted path, creating intermediate tables.
pub fn set_path(map: &mut ValueMap, dotted: &str, value: ConfigValue) {
    match dotted.split_once('.') {
        None => {
            map.insert(dotted.to_string(), value);
        }
        Some((head, tail)) => {
            let entry = map
                .entry(head.to_string())
                .or_insert_with(|| ConfigValue::Table(ValueMap::new()));
            if !matches!(entry, ConfigValue::Table(_)) {
                *entry = ConfigValue::Table(ValueMap::new());
            }
            if let ConfigValue::Table(child) = entry {
                set_path(child, tail, value);
            }
        }
    }
}

/// Remove a dotted path, pruning tables left empty. Returns whether anything was removed.
pub fn remove_path(map: &mut ValueMap, dotted: &str) -> bool {
    if map.remove(dotted).is_some() {
        return true;
    }
    let Some((head, tail)) = dotted.split_once('.') else {
        return false;
    };
    let removed = match map.get_mut(head) {
        Some(ConfigValue::Table(child)) => remove_path(child, tail),
        _ => false,
    };
    if removed && matches!(map.get(head), Some(ConfigValue::Table(t)) if t.is_empty()) {
        map.remove(head);
    }
    removed
}

/// `{dotted.path: display text}` over every leaf. Lists are leaves.
pub fn flatten(map: &ValueMap) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    flatten_into(map, "", &mut out);
    out
}

fn flatten_into(map: &ValueMap, prefix: &str, out: &mut BTreeMap<String, String>) {
    for (key, value) in map {
        let full = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        match value {
            ConfigValue::Table(child) => flatten_into(child, &full, out),
            leaf => {
                out.insert(full, leaf.to_string());
            }
        }
    }
}
