//! Validate command implementation
//!
//! This module implements the default `confguard` invocation, which:
//! - Loads configuration from confguard.toml and CLI flags
//! - Builds the rule registry (built-ins, plugins, overrides)
//! - Validates every matching file under `--path`
//! - Writes the JSON report, NDJSON stream and human summary
//! - Optionally keeps watching and revalidates changed files
//! - Returns appropriate exit code

use crate::cli::args::Cli;
use crate::cli::common::{
    EXIT_CANCELLED, EXIT_ERROR, EXIT_INVALID, EXIT_PARSE_ERROR, EXIT_SUCCESS,
};
use crate::config::Config;
use crate::engine::{
    CancelToken, RunReport, Scheduler, WatchController, reload_rules_on_change,
};
use crate::error::{ConfigError, EngineError, ReportError, RuleError, StorageError};
use crate::output::{HumanFormatter, NdjsonWriter, emit_json, write_json_report};
use crate::rules::SharedRegistry;
use crate::storage::{ChangeStream, LocalStorage, StorageProvider};
use crate::types::GlobPattern;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Root passed to the storage provider; ids are relative to `--path`
const STORAGE_ROOT: &str = ".";

/// Error type specific to the validate command
#[derive(Debug, thiserror::Error)]
pub(crate) enum ValidateError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Rule error: {0}")]
    Rule(#[from] RuleError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("{0}")]
    Engine(#[from] EngineError),

    #[error("Report error: {0}")]
    Report(#[from] ReportError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// How the command finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Clean,
    Invalid,
    Cancelled,
}

impl Outcome {
    fn exit_code(self) -> i32 {
        match self {
            Outcome::Clean => EXIT_SUCCESS,
            Outcome::Invalid => EXIT_INVALID,
            Outcome::Cancelled => EXIT_CANCELLED,
        }
    }
}

/// Run the validate command
///
/// Exit code:
/// - 0: Every file is valid
/// - 1: At least one file is invalid
/// - 2: Fatal error (registry, storage, I/O)
/// - 3: Configuration parse error
/// - 4: Run cancelled
pub fn run_validate(cli: &Cli) -> i32 {
    match run_validate_inner(cli) {
        Ok(outcome) => outcome.exit_code(),
        Err(e) => {
            eprintln!("Error: {}", e);
            match e {
                ValidateError::Config(ConfigError::Parse(_))
                | ValidateError::Config(ConfigError::Validation(_)) => EXIT_PARSE_ERROR,
                _ => EXIT_ERROR,
            }
        }
    }
}

fn run_validate_inner(cli: &Cli) -> Result<Outcome, ValidateError> {
    let config = super::common::load_config(cli)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(validate(cli, config))
}

/// Where run reports go
struct ReportSinks {
    json: Option<PathBuf>,
    ndjson: Option<NdjsonWriter>,
    human: HumanFormatter,
}

impl ReportSinks {
    fn open(config: &Config) -> Result<Self, ReportError> {
        let ndjson = config
            .output
            .ndjson
            .as_ref()
            .map(NdjsonWriter::open)
            .transpose()?;
        Ok(Self {
            json: config.output.report.clone(),
            ndjson,
            human: HumanFormatter::new(config.output.color),
        })
    }

    fn emit(&mut self, report: &RunReport) -> Result<(), ValidateError> {
        if let Some(writer) = &mut self.ndjson {
            writer.append_run(report)?;
        }
        if let Some(path) = &self.json {
            write_json_report(path, &emit_json(&report.summary, &report.records))?;
        }
        self.human.print(report)?;
        Ok(())
    }
}

async fn validate(cli: &Cli, config: Config) -> Result<Outcome, ValidateError> {
    let (registry, _plugins) = super::common::build_registry(&config)?;
    let registry = SharedRegistry::new(registry);
    let storage = Arc::new(super::common::open_storage(&cli.path, &config)?);
    let scheduler = Arc::new(
        Scheduler::new(
            Arc::clone(&storage) as Arc<dyn StorageProvider>,
            registry.clone(),
            config.confguard.concurrency,
        )?
        .with_grace_period(config.grace_period())
        .with_task_timeout(config.task_timeout()),
    );
    let mut sinks = ReportSinks::open(&config)?;

    let shutdown = CancelToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, cancelling");
                shutdown.cancel();
            }
        });
    }

    let report = match scheduler.run_root(STORAGE_ROOT, &shutdown).await {
        Ok(report) => report,
        Err(EngineError::Cancelled { report, .. }) => {
            sinks.emit(&report)?;
            return Ok(Outcome::Cancelled);
        }
        Err(e) => return Err(e.into()),
    };
    sinks.emit(&report)?;

    let initial = if report.summary.is_clean() {
        Outcome::Clean
    } else {
        Outcome::Invalid
    };
    if !cli.watch {
        return Ok(initial);
    }

    let changes = match storage.watch(STORAGE_ROOT) {
        Some(Ok(changes)) => changes,
        Some(Err(e)) => {
            warn!(error = %e, "watch unavailable, exiting after the initial run");
            return Ok(initial);
        }
        None => {
            warn!(
                backend = storage.name(),
                "storage backend cannot watch, exiting after the initial run"
            );
            return Ok(initial);
        }
    };

    eprintln!(
        "Watching {} for changes (Ctrl-C to stop)...",
        cli.path.display()
    );
    let mut controller = WatchController::new(Arc::clone(&scheduler), config.debounce());
    controller.absorb(&report);

    let plugin_changes = config.rules.plugins.as_deref().and_then(watch_plugins);
    let rules_done = CancelToken::new();
    let watch_files = async {
        let stats = controller
            .run(changes, &shutdown, |batch| {
                if let Err(e) = sinks.emit(batch) {
                    error!(
                        run_id = %batch.summary.run_id,
                        error = %e,
                        "failed to emit batch report"
                    );
                }
            })
            .await;
        rules_done.cancel();
        stats
    };
    let watch_rules = async {
        match plugin_changes {
            Some(plugin_changes) => {
                reload_rules_on_change(
                    &registry,
                    plugin_changes,
                    config.debounce(),
                    &rules_done,
                    || super::common::build_registry(&config).map(|(registry, _)| registry),
                )
                .await
            }
            None => 0,
        }
    };
    let (stats, reloads) = tokio::join!(watch_files, watch_rules);

    let live = controller.live_summary();
    info!(
        events = stats.events,
        batches = stats.batches,
        removed = stats.removed,
        unchanged = stats.unchanged,
        rule_reloads = reloads,
        live_files = live.totals.files,
        live_invalid = live.totals.invalid,
        "watch stopped"
    );

    Ok(if live.totals.invalid == 0 {
        Outcome::Clean
    } else {
        Outcome::Invalid
    })
}

/// Watch the plugin directory for rule definition changes
fn watch_plugins(dir: &Path) -> Option<ChangeStream> {
    if !dir.is_dir() {
        return None;
    }
    let plugins = match LocalStorage::with_patterns(dir, &[GlobPattern::new("*.toml")], &[]) {
        Ok(plugins) => plugins,
        Err(e) => {
            warn!(error = %e, "cannot watch the rule plugin directory");
            return None;
        }
    };
    match plugins.watch(STORAGE_ROOT) {
        Some(Ok(changes)) => {
            info!(dir = %dir.display(), "watching rule plugins for changes");
            Some(changes)
        }
        Some(Err(e)) => {
            warn!(error = %e, "cannot watch the rule plugin directory");
            None
        }
        None => None,
    }
}
