//! CLI struct definitions for the Lodestar command-line interface.
//!
//! All clap-derived types live here. Dispatch lives in `lib.rs`.

use crate::plugins::notes::NoteSelector;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(
    name = "lodestar",
    version = env!("CARGO_PKG_VERSION"),
    about = "Lodestar detects a project's stack, extracts its real configuration values, and pre-renders them into documents coding agents read on demand."
)]
pub(crate) struct Cli {
    /// Project directory (defaults to the nearest ancestor with `.lodestar/`, else the cwd).
    #[clap(long, global = true)]
    pub dir: Option<PathBuf>,
    /// Module catalog directory (overrides LODESTAR_CATALOG_DIR and the bundled catalog).
    #[clap(long, global = true)]
    pub catalog: Option<PathBuf>,
    /// Output format.
    #[clap(long, global = true, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Command {
    /// Create `.lodestar/`, detect the stack and install unambiguous modules
    Init,
    /// Propose modules for the project without changing anything
    Detect,
    /// Install modules (and whatever they require)
    Add {
        #[clap(required = true)]
        ids: Vec<String>,
    },
    /// Uninstall a module
    Remove { id: String },
    /// Re-scan installed modules and apply config drift
    Sync {
        /// Report drift without writing
        #[clap(long)]
        dry_run: bool,
    },
    /// Re-render modules whose catalog version is newer
    Update {
        /// Module to update
        #[clap(conflicts_with = "all", required_unless_present = "all")]
        id: Option<String>,
        /// Update every installed module
        #[clap(long)]
        all: bool,
    },
    /// Print rendered knowledge for one or more modules
    Render {
        #[clap(required = true)]
        ids: Vec<String>,
        /// Keep only sections mentioning this keyword (repeatable)
        #[clap(long = "filter")]
        filter: Vec<String>,
    },
    /// Show what a module's config scan extracts right now
    Scan { id: String },
    /// Show installed modules, stale artifacts and recent activity
    Status,
    /// Inspect the module catalog
    Catalog(CatalogCli),
    /// Manage notes attached to modules
    Note(NoteCli),
}

#[derive(clap::Args, Debug)]
pub(crate) struct CatalogCli {
    #[clap(subcommand)]
    pub command: CatalogCommand,
}

#[derive(Subcommand, Debug)]
pub(crate) enum CatalogCommand {
    /// List catalog modules
    List {
        /// Only this category
        #[clap(long)]
        category: Option<String>,
    },
    /// Load the catalog and report contract violations
    Validate,
}

#[derive(clap::Args, Debug)]
pub(crate) struct NoteCli {
    #[clap(subcommand)]
    pub command: NoteCommand,
}

#[derive(Subcommand, Debug)]
pub(crate) enum NoteCommand {
    /// Attach a note to a module
    Add { module: String, text: String },
    /// Remove a note by its number, or all notes for the module
    Remove { module: String, which: NoteSelector },
    /// List notes
    List { module: Option<String> },
}
