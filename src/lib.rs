#![forbid(unsafe_code)]

//! confguard: concurrent configuration validation
//!
//! Configuration files are read from a [`storage::StorageProvider`],
//! checked against the rules in a [`rules::RuleRegistry`] by the
//! bounded [`engine::Scheduler`], and reported as JSON documents or
//! append-only NDJSON streams. [`engine::WatchController`] re-runs
//! validation for files as they change.

pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod output;
pub mod rules;
pub mod storage;
pub mod types;

// Re-export error types for convenient access
pub use error::{
    ConfguardError, ConfigError, EngineError, ReportError, RuleError, StorageError,
    ValidationFault,
};

// Re-export core domain types for convenient access
pub use types::{FileId, GlobPattern, RuleId, RunId, Severity};
