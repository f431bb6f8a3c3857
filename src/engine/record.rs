#![forbid(unsafe_code)]

//! Per-file and per-run result records
//!
//! Records are created once per validation pass and never patched; a later
//! pass produces new records under a new run id.

use crate::error::{StorageError, ValidationFault};
use crate::rules::{CheckOutcome, Rule};
use crate::types::{FileId, RuleId, RunId, Severity};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::time::Duration;
use time::OffsetDateTime;

/// Hex SHA-256 of file content, as stored in [`FileRecord::sha256`]
pub fn content_digest(content: &[u8]) -> String {
    hex::encode(Sha256::digest(content))
}

/// Why a synthetic outcome was recorded instead of a rule result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    /// The file could not be read
    StorageError,
    /// The rule predicate errored or panicked
    ValidationFault,
    /// The file did not finish within the per-file time limit
    Timeout,
    /// The run was cancelled before the file finished
    Cancelled,
}

/// Outcome of one rule for one file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleOutcome {
    pub rule_id: RuleId,
    pub valid: bool,
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

impl RuleOutcome {
    pub fn from_check(rule: &Rule, outcome: CheckOutcome) -> Self {
        Self {
            rule_id: rule.id().clone(),
            valid: outcome.valid,
            severity: rule.severity(),
            message: outcome.message,
            error_kind: None,
        }
    }

    pub fn fault(rule: &Rule, fault: &ValidationFault) -> Self {
        Self {
            rule_id: rule.id().clone(),
            valid: false,
            severity: rule.severity(),
            message: Some(fault.to_string()),
            error_kind: Some(ErrorKind::ValidationFault),
        }
    }

    fn synthetic(id: &str, kind: ErrorKind, message: String) -> Self {
        Self {
            rule_id: RuleId::new(id).unwrap_or_else(|| unreachable!("synthetic ids are valid")),
            valid: false,
            severity: Severity::Error,
            message: Some(message),
            error_kind: Some(kind),
        }
    }

    pub fn storage_error(error: &StorageError) -> Self {
        Self::synthetic("storage-error", ErrorKind::StorageError, error.to_string())
    }

    pub fn cancelled() -> Self {
        Self::synthetic(
            "cancelled",
            ErrorKind::Cancelled,
            "validation cancelled before completion".to_string(),
        )
    }

    pub fn timeout(limit: Duration) -> Self {
        Self::synthetic(
            "file.timeout",
            ErrorKind::Timeout,
            format!("validation timed out after {} ms", limit.as_millis()),
        )
    }

    pub fn task_failure(message: impl Into<String>) -> Self {
        Self::synthetic("task-failure", ErrorKind::ValidationFault, message.into())
    }

    /// Counts towards severity buckets and per-rule failures
    pub fn is_failure(&self) -> bool {
        !self.valid && self.error_kind != Some(ErrorKind::Cancelled)
    }
}

/// Terminal state of a file within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Valid,
    Invalid,
    Cancelled,
}

/// Result of validating one file in one run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub file: FileId,
    pub run_id: RunId,
    /// Applicable rules, in registry order
    pub rules: Vec<RuleId>,
    pub outcomes: Vec<RuleOutcome>,
    pub valid: bool,
    pub status: FileStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub evaluated_at: OffsetDateTime,
    /// Digest of the content that was validated
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    /// Image registry named by the manifest
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry: Option<String>,
}

impl FileRecord {
    /// Record for a file whose rules all ran
    pub fn evaluated(
        file: FileId,
        run_id: RunId,
        rules: Vec<RuleId>,
        outcomes: Vec<RuleOutcome>,
        sha256: Option<String>,
    ) -> Self {
        let valid = outcomes.iter().all(|o| o.valid);
        Self {
            file,
            run_id,
            rules,
            outcomes,
            valid,
            status: if valid {
                FileStatus::Valid
            } else {
                FileStatus::Invalid
            },
            evaluated_at: OffsetDateTime::now_utc(),
            sha256,
            registry: None,
        }
    }

    pub fn with_registry(mut self, registry: Option<String>) -> Self {
        self.registry = registry;
        self
    }

    pub fn storage_failure(
        file: FileId,
        run_id: RunId,
        rules: Vec<RuleId>,
        error: &StorageError,
    ) -> Self {
        Self::evaluated(file, run_id, rules, vec![RuleOutcome::storage_error(error)], None)
    }

    pub fn task_failure(file: FileId, run_id: RunId, rules: Vec<RuleId>, message: &str) -> Self {
        Self::evaluated(file, run_id, rules, vec![RuleOutcome::task_failure(message)], None)
    }

    pub fn timed_out(file: FileId, run_id: RunId, rules: Vec<RuleId>, limit: Duration) -> Self {
        Self::evaluated(file, run_id, rules, vec![RuleOutcome::timeout(limit)], None)
    }

    pub fn cancelled(file: FileId, run_id: RunId, rules: Vec<RuleId>) -> Self {
        Self {
            status: FileStatus::Cancelled,
            ..Self::evaluated(file, run_id, rules, vec![RuleOutcome::cancelled()], None)
        }
    }

    /// Outcomes that represent real failures
    pub fn failures(&self) -> impl Iterator<Item = &RuleOutcome> {
        self.outcomes.iter().filter(|o| o.is_failure())
    }
}

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Completed,
    Cancelled,
}

/// Failing outcome counts per severity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeverityCounts {
    pub error: usize,
    pub warning: usize,
    pub info: usize,
}

impl SeverityCounts {
    pub fn add(&mut self, severity: Severity) {
        match severity {
            Severity::Error => self.error += 1,
            Severity::Warning => self.warning += 1,
            Severity::Info => self.info += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.error + self.warning + self.info
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Totals {
    pub files: usize,
    pub valid: usize,
    pub invalid: usize,
    pub cancelled: usize,
    pub error_count_by_severity: SeverityCounts,
}

/// Everything about a run except its file records
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunMeta {
    pub run_id: RunId,
    pub started_at: OffsetDateTime,
    pub ended_at: OffsetDateTime,
    pub status: RunStatus,
    pub backend: String,
}

/// Aggregated view of one run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: RunId,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub ended_at: OffsetDateTime,
    pub duration_ms: u64,
    pub status: RunStatus,
    pub backend: String,
    pub totals: Totals,
    #[serde(default)]
    pub failures_by_rule: BTreeMap<RuleId, usize>,
    /// Files per image registry, for records that name one
    #[serde(default)]
    pub registry_counts: BTreeMap<String, usize>,
}

impl RunSummary {
    /// Fraction of files that are invalid, 0.0 for an empty run
    pub fn error_rate(&self) -> f64 {
        if self.totals.files == 0 {
            0.0
        } else {
            self.totals.invalid as f64 / self.totals.files as f64
        }
    }

    pub fn is_clean(&self) -> bool {
        self.status == RunStatus::Completed && self.totals.invalid == 0
    }
}

/// Summary plus the file records of a run, sorted by file id
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub summary: RunSummary,
    pub records: Vec<FileRecord>,
}

impl RunReport {
    pub fn record(&self, file: &FileId) -> Option<&FileRecord> {
        self.records
            .binary_search_by(|r| r.file.cmp(file))
            .ok()
            .map(|i| &self.records[i])
    }
}
