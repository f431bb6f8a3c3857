#![forbid(unsafe_code)]

//! Run summary aggregation
//!
//! Aggregation is a pure function of the run metadata and the set of file
//! records; the order in which concurrent tasks delivered those records
//! never shows up in the result.

use crate::engine::record::{FileRecord, FileStatus, RunMeta, RunSummary, Totals};
use std::collections::BTreeMap;

/// Sort records by file identifier
pub fn sort_records(records: &mut [FileRecord]) {
    records.sort_by(|a, b| a.file.cmp(&b.file).then_with(|| a.run_id.cmp(&b.run_id)));
}

/// Compute the summary of a run
pub fn aggregate(meta: &RunMeta, records: &[FileRecord]) -> RunSummary {
    let mut ordered: Vec<&FileRecord> = records.iter().collect();
    ordered.sort_by(|a, b| a.file.cmp(&b.file));

    let mut totals = Totals {
        files: ordered.len(),
        ..Totals::default()
    };
    let mut failures_by_rule = BTreeMap::new();
    let mut registry_counts = BTreeMap::new();

    for record in ordered {
        match record.status {
            FileStatus::Valid => totals.valid += 1,
            FileStatus::Invalid => totals.invalid += 1,
            FileStatus::Cancelled => totals.cancelled += 1,
        }
        for outcome in record.failures() {
            totals.error_count_by_severity.add(outcome.severity);
            *failures_by_rule.entry(outcome.rule_id.clone()).or_insert(0) += 1;
        }
        if let Some(registry) = &record.registry {
            *registry_counts.entry(registry.clone()).or_insert(0) += 1;
        }
    }

    let duration = meta.ended_at - meta.started_at;
    RunSummary {
        run_id: meta.run_id.clone(),
        started_at: meta.started_at,
        ended_at: meta.ended_at,
        duration_ms: duration.whole_milliseconds().max(0) as u64,
        status: meta.status,
        backend: meta.backend.clone(),
        totals,
        failures_by_rule,
        registry_counts,
    }
}
