//! Property tests for run aggregation and report ordering

use confguard::engine::{
    FileRecord, RuleOutcome, RunMeta, RunStatus, aggregate, sort_records,
};
use confguard::output::{ReportRecord, emit_ndjson, parse_ndjson};
use confguard::types::{FileId, RuleId, RunId, Severity};
use proptest::prelude::*;
use time::macros::datetime;

fn meta() -> RunMeta {
    RunMeta {
        run_id: RunId::new("run-prop"),
        started_at: datetime!(2024-05-01 12:00:00 UTC),
        ended_at: datetime!(2024-05-01 12:00:02 UTC),
        status: RunStatus::Completed,
        backend: "memory".to_string(),
    }
}

fn severity_strategy() -> impl Strategy<Value = Severity> {
    prop_oneof![
        Just(Severity::Error),
        Just(Severity::Warning),
        Just(Severity::Info),
    ]
}

fn outcome_strategy() -> impl Strategy<Value = RuleOutcome> {
    (0usize..4, any::<bool>(), severity_strategy()).prop_map(|(rule, valid, severity)| {
        RuleOutcome {
            rule_id: RuleId::new(format!("rule-{}", rule)).unwrap(),
            valid,
            severity,
            message: (!valid).then(|| "failed".to_string()),
            error_kind: None,
        }
    })
}

/// Records for distinct files; some are cancelled
fn records_strategy() -> impl Strategy<Value = Vec<FileRecord>> {
    prop::collection::vec(
        (prop::collection::vec(outcome_strategy(), 0..4), any::<bool>()),
        0..24,
    )
    .prop_map(|files| {
        files
            .into_iter()
            .enumerate()
            .map(|(i, (outcomes, cancelled))| {
                let file = FileId::new(format!("svc/{:03}.yaml", i));
                let run_id = RunId::new("run-prop");
                let rules = outcomes.iter().map(|o| o.rule_id.clone()).collect();
                if cancelled && i % 3 == 0 {
                    FileRecord::cancelled(file, run_id, rules)
                } else {
                    FileRecord::evaluated(file, run_id, rules, outcomes, None)
                }
            })
            .collect()
    })
}

proptest! {
    #[test]
    fn prop_aggregate_ignores_completion_order(
        (records, shuffled) in records_strategy()
            .prop_flat_map(|records| (Just(records.clone()), Just(records).prop_shuffle()))
    ) {
        prop_assert_eq!(aggregate(&meta(), &records), aggregate(&meta(), &shuffled));
    }

    #[test]
    fn prop_totals_partition_files(records in records_strategy()) {
        let summary = aggregate(&meta(), &records);
        let totals = &summary.totals;

        prop_assert_eq!(totals.files, records.len());
        prop_assert_eq!(totals.valid + totals.invalid + totals.cancelled, totals.files);

        let failures: usize = records.iter().map(|r| r.failures().count()).sum();
        prop_assert_eq!(totals.error_count_by_severity.total(), failures);
        prop_assert_eq!(summary.failures_by_rule.values().sum::<usize>(), failures);
        prop_assert_eq!(summary.duration_ms, 2000);
    }

    #[test]
    fn prop_ndjson_sorted_by_file(
        records in records_strategy().prop_flat_map(|records| Just(records).prop_shuffle())
    ) {
        let summary = aggregate(&meta(), &records);
        let lines = emit_ndjson(&summary, &records).unwrap();
        let parsed = parse_ndjson(&lines.join("\n")).unwrap();

        prop_assert_eq!(parsed.len(), records.len() + 1);
        prop_assert_eq!(&parsed[0], &ReportRecord::Summary(summary));

        let mut expected = records.clone();
        sort_records(&mut expected);
        for (line, record) in parsed[1..].iter().zip(expected) {
            prop_assert_eq!(line, &ReportRecord::File(record));
        }
    }
}
