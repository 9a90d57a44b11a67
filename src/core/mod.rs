//! Shared primitives for the knowledge pipeline.
//!
//! Nothing in here knows about modules or the catalog; the plugins build
//! on these for storage, parsing, configuration and output.

pub mod assets;
pub mod config;
pub mod error;
pub mod formats;
pub mod journal;
pub mod store;
pub mod time;
pub mod tui;
