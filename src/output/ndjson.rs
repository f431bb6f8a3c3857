#![forbid(unsafe_code)]

//! NDJSON report stream
//!
//! Every run contributes one summary line followed by one line per file,
//! in file identifier order. The stream is append-only: later runs add new
//! lines under their own `run_id` and never rewrite earlier ones, so the
//! file can be tailed by log shippers.

use crate::engine::{FileRecord, RunReport, RunSummary};
use crate::error::ReportError;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// One line of the stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ReportRecord {
    Summary(RunSummary),
    File(FileRecord),
}

/// Render a run as NDJSON lines, summary first
pub fn emit_ndjson(
    summary: &RunSummary,
    records: &[FileRecord],
) -> Result<Vec<String>, ReportError> {
    let mut ordered: Vec<&FileRecord> = records.iter().collect();
    ordered.sort_by(|a, b| a.file.cmp(&b.file));

    let mut lines = Vec::with_capacity(ordered.len() + 1);
    lines.push(serde_json::to_string(&ReportRecord::Summary(summary.clone()))?);
    for record in ordered {
        lines.push(serde_json::to_string(&ReportRecord::File(record.clone()))?);
    }
    Ok(lines)
}

/// Parse an NDJSON stream back into records
///
/// Blank lines are skipped; line numbers in errors are 1-based.
pub fn parse_ndjson(text: &str) -> Result<Vec<ReportRecord>, ReportError> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| {
            serde_json::from_str(line).map_err(|source| ReportError::Line {
                line: index + 1,
                source,
            })
        })
        .collect()
}

/// Appends runs to an NDJSON file
#[derive(Debug)]
pub struct NdjsonWriter {
    path: PathBuf,
    file: File,
}

impl NdjsonWriter {
    /// Open `path` for appending, creating it and its parent directories
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ReportError> {
        let path = path.into();
        let io_error = |source| ReportError::Io {
            path: path.clone(),
            source,
        };

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(io_error)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(io_error)?;

        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append every line of a run, then flush and sync
    pub fn append_run(&mut self, report: &RunReport) -> Result<usize, ReportError> {
        let lines = emit_ndjson(&report.summary, &report.records)?;
        let mut buffer = String::with_capacity(lines.iter().map(|l| l.len() + 1).sum());
        for line in &lines {
            buffer.push_str(line);
            buffer.push('\n');
        }

        let io_error = |source| ReportError::Io {
            path: self.path.clone(),
            source,
        };
        self.file.write_all(buffer.as_bytes()).map_err(io_error)?;
        self.file.flush().map_err(io_error)?;
        self.file.sync_data().map_err(io_error)?;

        tracing::debug!(
            path = %self.path.display(),
            run_id = %report.summary.run_id,
            lines = lines.len(),
            "appended run to NDJSON stream"
        );
        Ok(lines.len())
    }
}
