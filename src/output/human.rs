#![forbid(unsafe_code)]

//! Human-readable run summaries

use crate::config::ColorOption;
use crate::engine::{FileStatus, RunReport, RunStatus};
use crate::types::Severity;
use std::io::{self, IsTerminal, Write};
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

/// Writes failing files and a one-line tally
#[derive(Debug, Clone, Copy)]
pub struct HumanFormatter {
    choice: ColorChoice,
}

impl HumanFormatter {
    pub fn new(color: ColorOption) -> Self {
        let choice = match color {
            ColorOption::Always => ColorChoice::Always,
            ColorOption::Never => ColorChoice::Never,
            ColorOption::Auto if io::stdout().is_terminal() => ColorChoice::Auto,
            ColorOption::Auto => ColorChoice::Never,
        };
        Self { choice }
    }

    /// Print the report to stdout
    pub fn print(&self, report: &RunReport) -> io::Result<()> {
        let mut stdout = StandardStream::stdout(self.choice);
        self.write_report(&mut stdout, report)
    }

    pub fn write_report(&self, out: &mut dyn WriteColor, report: &RunReport) -> io::Result<()> {
        let summary = &report.summary;

        for record in &report.records {
            match record.status {
                FileStatus::Valid => continue,
                FileStatus::Invalid => {
                    paint(out, Color::Red, true)?;
                    write!(out, "✗ ")?;
                    out.reset()?;
                    writeln!(out, "{}", record.file)?;
                }
                FileStatus::Cancelled => {
                    paint(out, Color::Yellow, false)?;
                    write!(out, "- ")?;
                    out.reset()?;
                    writeln!(out, "{} (cancelled)", record.file)?;
                    continue;
                }
            }

            for outcome in record.failures() {
                write!(out, "    ")?;
                paint(out, severity_color(outcome.severity), false)?;
                write!(out, "{}", outcome.severity)?;
                out.reset()?;
                writeln!(
                    out,
                    " {}: {}",
                    outcome.rule_id,
                    outcome.message.as_deref().unwrap_or("failed")
                )?;
            }
        }

        let counts = summary.totals.error_count_by_severity;
        writeln!(out)?;
        write!(out, "Valid files: ")?;
        paint(out, Color::Green, true)?;
        write!(out, "{}", summary.totals.valid)?;
        out.reset()?;
        write!(out, "  Invalid files: ")?;
        paint(out, Color::Red, summary.totals.invalid > 0)?;
        write!(out, "{}", summary.totals.invalid)?;
        out.reset()?;
        if summary.totals.cancelled > 0 {
            write!(out, "  Cancelled: {}", summary.totals.cancelled)?;
        }
        writeln!(
            out,
            "  Total errors: {} ({} error, {} warning, {} info)",
            counts.total(),
            counts.error,
            counts.warning,
            counts.info
        )?;
        if !summary.registry_counts.is_empty() {
            let registries: Vec<String> = summary
                .registry_counts
                .iter()
                .map(|(registry, files)| format!("{} ({})", registry, files))
                .collect();
            writeln!(out, "Registries: {}", registries.join(", "))?;
        }

        let verdict = match summary.status {
            RunStatus::Cancelled => "cancelled",
            RunStatus::Completed if summary.totals.invalid == 0 => "passed",
            RunStatus::Completed => "failed",
        };
        writeln!(
            out,
            "Run {} {}: {} files in {} ms ({} backend)",
            summary.run_id, verdict, summary.totals.files, summary.duration_ms, summary.backend
        )?;
        out.flush()
    }
}

fn severity_color(severity: Severity) -> Color {
    match severity {
        Severity::Error => Color::Red,
        Severity::Warning => Color::Yellow,
        Severity::Info => Color::Cyan,
    }
}

fn paint(out: &mut dyn WriteColor, color: Color, bold: bool) -> io::Result<()> {
    out.set_color(ColorSpec::new().set_fg(Some(color)).set_bold(bold))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{FileRecord, RuleOutcome, RunMeta, aggregate};
    use crate::types::{FileId, RuleId, RunId};
    use termcolor::Buffer;
    use time::OffsetDateTime;

    fn render(report: &RunReport) -> String {
        let formatter = HumanFormatter::new(ColorOption::Never);
        let mut buffer = Buffer::no_color();
        formatter.write_report(&mut buffer, report).unwrap();
        String::from_utf8(buffer.into_inner()).unwrap()
    }

    fn report(status: RunStatus, records: Vec<FileRecord>) -> RunReport {
        let now = OffsetDateTime::now_utc();
        let meta = RunMeta {
            run_id: RunId::new("run-h"),
            started_at: now,
            ended_at: now,
            status,
            backend: "memory".to_string(),
        };
        RunReport {
            summary: aggregate(&meta, &records),
            records,
        }
    }

    #[test]
    fn test_lists_failing_files_with_messages() {
        let run_id = RunId::new("run-h");
        let failing = RuleOutcome {
            rule_id: RuleId::new("non-empty").unwrap(),
            valid: false,
            severity: Severity::Error,
            message: Some("non-empty: file is empty".to_string()),
            error_kind: None,
        };
        let records = vec![
            FileRecord::evaluated(FileId::new("a"), run_id.clone(), vec![], vec![], None),
            FileRecord::evaluated(FileId::new("b"), run_id.clone(), vec![], vec![failing], None),
        ];

        let text = render(&report(RunStatus::Completed, records));

        assert!(text.contains("✗ b"));
        assert!(!text.contains("✗ a"));
        assert!(text.contains("error non-empty: non-empty: file is empty"));
        assert!(text.contains("Valid files: 1  Invalid files: 1"));
        assert!(text.contains("Total errors: 1 (1 error, 0 warning, 0 info)"));
        assert!(text.contains("Run run-h failed: 2 files"));
    }

    #[test]
    fn test_registry_tally() {
        let run_id = RunId::new("run-h");
        let record = |file: &str, registry: Option<&str>| {
            FileRecord::evaluated(FileId::new(file), run_id.clone(), vec![], vec![], None)
                .with_registry(registry.map(str::to_string))
        };
        let records = vec![
            record("a", Some("ghcr.io")),
            record("b", Some("myregistry.com")),
            record("c", Some("ghcr.io")),
            record("d", None),
        ];

        let text = render(&report(RunStatus::Completed, records));
        assert!(text.contains("Registries: ghcr.io (2), myregistry.com (1)"));

        let text = render(&report(RunStatus::Completed, vec![record("e", None)]));
        assert!(!text.contains("Registries"));
    }

    #[test]
    fn test_cancelled_run() {
        let records = vec![FileRecord::cancelled(FileId::new("c"), RunId::new("run-h"), vec![])];
        let text = render(&report(RunStatus::Cancelled, records));

        assert!(text.contains("c (cancelled)"));
        assert!(text.contains("Cancelled: 1"));
        assert!(text.contains("Run run-h cancelled"));
    }
}
