//! Error Taxonomy - Fatal vs. Recoverable
//!
//! Fatal errors abort the cycle. Recoverable ones become diagnostics.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

use crate::hooks::HookPoint;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("Module not found: {0}")]
    ResolutionMiss(String),

    #[error("Transformer '{transformer}' failed on {path}{}: {message}", line_suffix(.line))]
    TransformFailure {
        path: String,
        transformer: String,
        line: Option<usize>,
        message: String,
    },

    #[error("Optimization failed for {path}: {message}")]
    OptimizationFailure { path: String, message: String },

    #[error("Plugin '{plugin}' failed during {point} hook: {message}")]
    HookFailure {
        point: HookPoint,
        plugin: String,
        message: String,
    },

    #[error("Unknown transformer: {0}")]
    UnknownTransformer(String),

    #[error("Invalid pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },

    #[error("Configuration requires engine >= {0}, current is {1}")]
    EngineVersionMismatch(String, String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Artifact path emitted twice in one cycle: {0}")]
    EmitConflict(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

fn line_suffix(line: &Option<usize>) -> String {
    line.map(|l| format!(" (line {})", l)).unwrap_or_default()
}

impl BuildError {
    /// Pipeline stage this error belongs to, as reported in diagnostics.
    pub fn stage(&self) -> &'static str {
        match self {
            BuildError::ResolutionMiss(_) => "resolve",
            BuildError::TransformFailure { .. } => "transform",
            BuildError::OptimizationFailure { .. } => "optimize",
            BuildError::HookFailure { .. } => "hook",
            BuildError::EmitConflict(_) | BuildError::Io(_) => "emit",
            _ => "config",
        }
    }

    /// Module path or plugin name the error is attributed to, if any.
    pub fn subject(&self) -> Option<String> {
        match self {
            BuildError::ResolutionMiss(path) => Some(path.clone()),
            BuildError::TransformFailure { path, .. } => Some(path.clone()),
            BuildError::OptimizationFailure { path, .. } => Some(path.clone()),
            BuildError::HookFailure { plugin, .. } => Some(plugin.clone()),
            BuildError::EmitConflict(path) => Some(path.display().to_string()),
            _ => None,
        }
    }

    pub fn to_diagnostic(&self) -> Diagnostic {
        let line = match self {
            BuildError::TransformFailure { line, .. } => *line,
            _ => None,
        };
        Diagnostic {
            path: self.subject(),
            stage: self.stage().to_string(),
            severity: Severity::Error,
            message: self.to_string(),
            line,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

/// Structured record surfaced to the caller for every reported problem.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Diagnostic {
    pub path: Option<String>,
    pub stage: String,
    pub severity: Severity,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
}

impl Diagnostic {
    pub fn warning(path: impl Into<String>, stage: &str, message: impl Into<String>) -> Self {
        Self {
            path: Some(path.into()),
            stage: stage.to_string(),
            severity: Severity::Warning,
            message: message.into(),
            line: None,
        }
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

pub type Result<T> = std::result::Result<T, BuildError>;
