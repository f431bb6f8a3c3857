#![forbid(unsafe_code)]

//! Self-contained JSON document for one run

use crate::engine::{FileRecord, RunSummary};
use crate::error::ReportError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// The `--report` document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonReport {
    #[serde(flatten)]
    pub summary: RunSummary,
    /// Invalid files divided by total files
    pub error_rate: f64,
    pub files: Vec<FileRecord>,
}

/// Build the JSON document for a run, files sorted by identifier
pub fn emit_json(summary: &RunSummary, records: &[FileRecord]) -> JsonReport {
    let mut files = records.to_vec();
    files.sort_by(|a, b| a.file.cmp(&b.file));
    JsonReport {
        summary: summary.clone(),
        error_rate: summary.error_rate(),
        files,
    }
}

/// Write the document pretty-printed, replacing any previous report
pub fn write_json_report(path: &Path, report: &JsonReport) -> Result<(), ReportError> {
    let io_error = |source| ReportError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(io_error)?;
    }

    let mut json = serde_json::to_string_pretty(report)?;
    json.push('\n');
    fs::write(path, json).map_err(io_error)?;

    tracing::debug!(path = %path.display(), run_id = %report.summary.run_id, "wrote JSON report");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{RunMeta, RunStatus, aggregate};
    use crate::types::{FileId, RunId};
    use tempfile::TempDir;
    use time::OffsetDateTime;

    fn sample() -> (RunSummary, Vec<FileRecord>) {
        let run_id = RunId::new("run-json");
        let records = vec![
            FileRecord::evaluated(FileId::new("z.yaml"), run_id.clone(), vec![], vec![], None),
            FileRecord::cancelled(FileId::new("a.yaml"), run_id.clone(), vec![]),
        ];
        let now = OffsetDateTime::now_utc();
        let meta = RunMeta {
            run_id,
            started_at: now,
            ended_at: now,
            status: RunStatus::Cancelled,
            backend: "local".to_string(),
        };
        (aggregate(&meta, &records), records)
    }

    #[test]
    fn test_document_shape() {
        let (summary, records) = sample();
        let doc = serde_json::to_value(emit_json(&summary, &records)).unwrap();

        assert_eq!(doc["run_id"], "run-json");
        assert_eq!(doc["status"], "cancelled");
        assert_eq!(doc["backend"], "local");
        assert_eq!(doc["totals"]["valid"], 1);
        assert_eq!(doc["totals"]["cancelled"], 1);
        assert_eq!(doc["totals"]["error_count_by_severity"]["error"], 0);
        assert!(doc["started_at"].is_string());
        assert!(doc["ended_at"].is_string());
        assert_eq!(doc["files"][0]["file"], "a.yaml");
        assert_eq!(doc["files"][1]["file"], "z.yaml");
        assert_eq!(doc["error_rate"], 0.0);
    }

    #[test]
    fn test_write_report_overwrites() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("out/report.json");
        let (summary, records) = sample();
        let report = emit_json(&summary, &records);

        write_json_report(&path, &report).unwrap();
        write_json_report(&path, &report).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed["files"].as_array().unwrap().len(), 2);
    }
}
