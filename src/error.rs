//! Error types for confguard
//!
//! This module defines the error types used throughout confguard, following
//! a hierarchical structure with specific error variants for different
//! error categories. Per-file problems (storage reads, faulting rules) are
//! recorded in reports instead of being raised; only the fatal variants of
//! [`EngineError`] abort a run.

use crate::engine::RunReport;
use crate::types::{FileId, RunId};
use std::path::PathBuf;

/// Configuration-related errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// I/O error reading a configuration file
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid TOML syntax or shape
    #[error("Invalid configuration syntax: {0}")]
    Parse(#[from] toml::de::Error),

    /// Semantic validation failure after parsing
    #[error("Invalid configuration: {0}")]
    Validation(String),
}

/// Rule registry and rule definition errors
#[derive(Debug, thiserror::Error)]
pub enum RuleError {
    /// A rule with the same identifier is already registered
    #[error("Duplicate rule ID '{0}'")]
    DuplicateRule(String),

    /// Rule not found
    #[error("Rule not found: {0}")]
    NotFound(String),

    /// A plugin definition could not be loaded
    #[error("Failed to load rule plugin {}: {message}", .path.display())]
    RuleLoad { path: PathBuf, message: String },

    /// Invalid rule definition
    #[error("Invalid rule definition: {0}")]
    InvalidDefinition(String),

    /// Invalid regex or glob pattern inside a rule
    #[error("Invalid pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },
}

/// Errors raised by a storage provider
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    /// The root passed to `list` does not exist or cannot be opened
    #[error("Storage root unreachable: {root}: {message}")]
    RootUnreachable { root: String, message: String },

    /// Listing failed part-way through
    #[error("Failed to list {root}: {message}")]
    List { root: String, message: String },

    /// Reading a single file failed
    #[error("Failed to read {file}: {message}")]
    Read { file: FileId, message: String },

    /// The watch capability could not be started
    #[error("Failed to watch {root}: {message}")]
    Watch { root: String, message: String },

    /// An include or exclude glob did not compile
    #[error("Invalid storage pattern '{pattern}': {message}")]
    Pattern { pattern: String, message: String },
}

/// A rule predicate failed to produce an outcome
///
/// This is distinct from a rule reporting content as invalid: it means the
/// predicate itself errored or panicked.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Rule '{rule}' faulted: {message}")]
pub struct ValidationFault {
    pub rule: String,
    pub message: String,
}

impl ValidationFault {
    pub fn new(rule: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            rule: rule.into(),
            message: message.into(),
        }
    }
}

/// Errors returned by the scheduler
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Concurrency cap must be at least one
    #[error("Concurrency cap must be greater than zero")]
    InvalidConcurrency,

    /// No rules are registered, so nothing can be validated
    #[error("Rule registry is empty; no rules could be loaded")]
    EmptyRegistry,

    /// Listing the storage root failed before any task started
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// The run was cancelled; the partial report is attached
    #[error("Run {run_id} was cancelled")]
    Cancelled {
        run_id: RunId,
        report: Box<RunReport>,
    },
}

/// Errors writing or parsing reports
#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    /// I/O error writing a report
    #[error("I/O error writing {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Serialization or parse error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A line of an NDJSON stream could not be parsed
    #[error("Invalid NDJSON record on line {line}: {source}")]
    Line {
        line: usize,
        source: serde_json::Error,
    },
}

/// Top-level error type for confguard
#[derive(Debug, thiserror::Error)]
pub enum ConfguardError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Rule error
    #[error("Rule error: {0}")]
    Rule(#[from] RuleError),

    /// Engine error
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Report error
    #[error("Report error: {0}")]
    Report(#[from] ReportError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
