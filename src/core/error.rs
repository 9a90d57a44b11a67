//! Error kinds surfaced by every lodestar operation.

use serde::Serialize;
use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Where a module id was looked up when it could not be found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Lookup {
    Catalog,
    Manifest,
}

impl fmt::Display for Lookup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Lookup::Catalog => write!(f, "not in the module catalog"),
            Lookup::Manifest => write!(f, "not installed in this project"),
        }
    }
}

/// One catalog-authoring problem found while loading the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContractViolation {
    pub module: String,
    pub error: String,
}

impl fmt::Display for ContractViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.module, self.error)
    }
}

#[derive(Error, Debug)]
pub enum LodestarError {
    #[error("Module '{id}' {lookup}")]
    ModuleNotFound { id: String, lookup: Lookup },
    #[error("Module '{id}' conflicts with installed module(s): {}", .conflicts.join(", "))]
    ModuleConflict { id: String, conflicts: Vec<String> },
    #[error("Module '{id}' is required by: {}", .dependents.join(", "))]
    ModuleRequiredBy { id: String, dependents: Vec<String> },
    #[error("No config file found for '{module}' (tried: {})", .tried.join(", "))]
    ConfigNotFound { module: String, tried: Vec<String> },
    #[error("Failed to parse {}: {detail}", .file.display())]
    ParseError { file: PathBuf, detail: String },
    #[error("Module catalog violates category contracts: {}", render_violations(.violations))]
    CategoryContractViolation { violations: Vec<ContractViolation> },
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
}

fn render_violations(violations: &[ContractViolation]) -> String {
    violations
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl LodestarError {
    /// Stable error kind exposed across the verb boundary.
    pub fn kind(&self) -> &'static str {
        match self {
            LodestarError::ModuleNotFound { .. } => "MODULE_NOT_FOUND",
            LodestarError::ModuleConflict { .. } => "MODULE_CONFLICT",
            LodestarError::ModuleRequiredBy { .. } => "MODULE_REQUIRED_BY",
            LodestarError::ConfigNotFound { .. } => "CONFIG_NOT_FOUND",
            LodestarError::ParseError { .. } => "PARSE_ERROR",
            LodestarError::CategoryContractViolation { .. } => "CATEGORY_CONTRACT_VIOLATION",
            LodestarError::IoError(_) => "IO_ERROR",
        }
    }

    /// Kind-specific payload (conflicting ids, dependents, offending file).
    pub fn details(&self) -> serde_json::Value {
        match self {
            LodestarError::ModuleNotFound { id, lookup } => {
                serde_json::json!({ "module": id, "lookup": lookup })
            }
            LodestarError::ModuleConflict { id, conflicts } => {
                serde_json::json!({ "module": id, "conflicts": conflicts })
            }
            LodestarError::ModuleRequiredBy { id, dependents } => {
                serde_json::json!({ "module": id, "dependents": dependents })
            }
            LodestarError::ConfigNotFound { module, tried } => {
                serde_json::json!({ "module": module, "tried": tried })
            }
            LodestarError::ParseError { file, .. } => {
                serde_json::json!({ "file": file.to_string_lossy() })
            }
            LodestarError::CategoryContractViolation { violations } => {
                serde_json::json!({ "violations": violations })
            }
            LodestarError::IoError(_) => serde_json::json!({}),
        }
    }

    pub fn parse(file: impl Into<PathBuf>, detail: impl fmt::Display) -> Self {
        LodestarError::ParseError {
            file: file.into(),
            detail: detail.to_string(),
        }
    }
}
