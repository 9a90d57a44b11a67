//! Module catalog bundled into the binary.
//!
//! The `catalog/` tree (one directory per module holding `module.toml`
//! and `template.md`) is baked in at compile time so a bare `lodestar`
//! binary works without any files on disk. A directory passed with
//! `--catalog` or `LODESTAR_CATALOG_DIR` replaces it wholesale.

use rust_embed::RustEmbed;
use std::collections::BTreeMap;
use std::path::PathBuf;

#[derive(RustEmbed)]
#[folder = "catalog/"]
#[include = "*/module.toml"]
#[include = "*/template.md"]
struct EmbeddedCatalog;

pub const CATALOG_ENV: &str = "LODESTAR_CATALOG_DIR";
pub const MODULE_FILE: &str = "module.toml";
pub const TEMPLATE_FILE: &str = "template.md";

/// Raw files of one catalog bundle, before parsing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BundleSource {
    pub module_toml: Option<String>,
    pub template: Option<String>,
}

/// Every embedded bundle keyed by directory name.
pub fn embedded_bundles() -> BTreeMap<String, BundleSource> {
    let mut bundles: BTreeMap<String, BundleSource> = BTreeMap::new();
    for path in EmbeddedCatalog::iter() {
        let Some((dir, file)) = path.split_once('/') else {
            continue;
        };
        let Some(content) = EmbeddedCatalog::get(&path) else {
            continue;
        };
        let text = String::from_utf8_lossy(&content.data).into_owned();
        let entry = bundles.entry(dir.to_string()).or_default();
        match file {
            MODULE_FILE => entry.module_toml = Some(text),
            TEMPLATE_FILE => entry.template = Some(text),
            _ => {}
        }
    }
    bundles
}

/// Catalog directory override: explicit flag first, then the environment.
pub fn catalog_override(flag: Option<PathBuf>) -> Option<PathBuf> {
    flag.or_else(|| std::env::var_os(CATALOG_ENV).map(PathBuf::from))
}
