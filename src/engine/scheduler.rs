#![forbid(unsafe_code)]

//! Bounded, cancellable validation runs
//!
//! The scheduler turns a list of file identifiers into one task per file.
//! Admission goes through a semaphore in file order, so at most
//! `concurrency` tasks are in flight and waiting files start first come,
//! first served. Each task reads the file, evaluates the applicable rules
//! sequentially and produces a [`FileRecord`]. Rule predicates are
//! synchronous and may block, so each one runs on the blocking pool while
//! the task keeps watching the cancel token. Per-file failures become
//! records; only the preconditions checked before the first task starts
//! abort a run.

use crate::engine::aggregator::{aggregate, sort_records};
use crate::engine::cancel::CancelToken;
use crate::engine::record::{
    FileRecord, RuleOutcome, RunMeta, RunReport, RunStatus, content_digest,
};
use crate::error::{EngineError, ValidationFault};
use crate::rules::{FileContent, Rule, SharedRegistry};
use crate::storage::StorageProvider;
use crate::types::{FileId, RuleId, RunId};
use std::collections::{BTreeMap, HashSet};
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use time::OffsetDateTime;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn};

/// Default time in-flight tasks get to wind down after cancellation
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(2);

/// Runs validation passes against one storage provider and registry
pub struct Scheduler {
    storage: Arc<dyn StorageProvider>,
    registry: SharedRegistry,
    concurrency: NonZeroUsize,
    grace_period: Duration,
    task_timeout: Option<Duration>,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("backend", &self.storage.name())
            .field("concurrency", &self.concurrency)
            .field("grace_period", &self.grace_period)
            .field("task_timeout", &self.task_timeout)
            .finish()
    }
}

/// Work for a single file, fixed when the run starts
struct FileTask {
    file: FileId,
    rules: Vec<Arc<Rule>>,
}

impl FileTask {
    fn rule_ids(&self) -> Vec<RuleId> {
        self.rules.iter().map(|r| r.id().clone()).collect()
    }
}

/// Bookkeeping shared by the admission loop and the drain phase
struct RunState {
    run_id: RunId,
    pending: BTreeMap<FileId, Vec<RuleId>>,
    records: Vec<FileRecord>,
}

impl RunState {
    fn collect(&mut self, joined: Result<FileRecord, JoinError>) {
        match joined {
            Ok(record) => {
                self.pending.remove(&record.file);
                self.records.push(record);
            }
            Err(e) if e.is_cancelled() => {}
            Err(e) => error!(run_id = %self.run_id, error = %e, "validation task failed"),
        }
    }
}

impl Scheduler {
    /// Create a scheduler
    ///
    /// # Errors
    ///
    /// Returns `EngineError::InvalidConcurrency` if `concurrency` is zero.
    pub fn new(
        storage: Arc<dyn StorageProvider>,
        registry: SharedRegistry,
        concurrency: usize,
    ) -> Result<Self, EngineError> {
        let concurrency = NonZeroUsize::new(concurrency).ok_or(EngineError::InvalidConcurrency)?;
        Ok(Self {
            storage,
            registry,
            concurrency,
            grace_period: DEFAULT_GRACE_PERIOD,
            task_timeout: None,
        })
    }

    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    /// Give up on a file that has not finished within `limit`
    ///
    /// The file is recorded as invalid with a `timeout` outcome. `None`
    /// lets files run for as long as they need.
    pub fn with_task_timeout(mut self, limit: Option<Duration>) -> Self {
        self.task_timeout = limit;
        self
    }

    pub fn concurrency(&self) -> NonZeroUsize {
        self.concurrency
    }

    pub fn backend(&self) -> &str {
        self.storage.name()
    }

    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    pub fn storage(&self) -> &Arc<dyn StorageProvider> {
        &self.storage
    }

    /// List `root` and validate every file found
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Storage` if the root cannot be listed, plus
    /// everything [`Scheduler::run`] returns.
    pub async fn run_root(
        &self,
        root: &str,
        cancel: &CancelToken,
    ) -> Result<RunReport, EngineError> {
        if self.registry.len().await == 0 {
            return Err(EngineError::EmptyRegistry);
        }
        let files = self.storage.list(root).await?;
        self.run(files, cancel).await
    }

    /// Validate `files`
    ///
    /// The registry read guard is held for the whole run, so registry
    /// mutations wait until the run has finished. Duplicate identifiers
    /// are validated once.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::EmptyRegistry` before any task starts if no
    /// rules are registered, and `EngineError::Cancelled` with the partial
    /// report if `cancel` fired during the run.
    pub async fn run(
        &self,
        files: Vec<FileId>,
        cancel: &CancelToken,
    ) -> Result<RunReport, EngineError> {
        let registry = self.registry.read_for_run().await;
        if registry.is_empty() {
            return Err(EngineError::EmptyRegistry);
        }

        let started_at = OffsetDateTime::now_utc();
        let clock = Instant::now();
        let run_id = RunId::generate(started_at);

        let mut seen = HashSet::with_capacity(files.len());
        let plan: Vec<FileTask> = files
            .into_iter()
            .filter(|file| seen.insert(file.clone()))
            .map(|file| FileTask {
                rules: registry.rules_for(&file),
                file,
            })
            .collect();

        info!(
            run_id = %run_id,
            files = plan.len(),
            rules = registry.len(),
            concurrency = self.concurrency.get(),
            "starting validation run"
        );

        let mut state = RunState {
            run_id: run_id.clone(),
            pending: plan.iter().map(|t| (t.file.clone(), t.rule_ids())).collect(),
            records: Vec::with_capacity(plan.len()),
        };
        let mut tasks = JoinSet::new();
        let mut cancelled = self.admit(plan, cancel, &mut tasks, &mut state).await;

        if !cancelled {
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        cancelled = true;
                        break;
                    }
                    joined = tasks.join_next() => match joined {
                        Some(joined) => state.collect(joined),
                        None => break,
                    },
                }
            }
        }

        if cancelled {
            self.drain_with_grace(&mut tasks, &mut state).await;
        }

        let RunState {
            pending,
            mut records,
            ..
        } = state;
        for (file, rules) in pending {
            let record = if cancelled {
                FileRecord::cancelled(file, run_id.clone(), rules)
            } else {
                FileRecord::task_failure(file, run_id.clone(), rules, "validation task failed")
            };
            records.push(record);
        }
        sort_records(&mut records);

        let meta = RunMeta {
            run_id: run_id.clone(),
            started_at,
            ended_at: OffsetDateTime::now_utc(),
            status: if cancelled {
                RunStatus::Cancelled
            } else {
                RunStatus::Completed
            },
            backend: self.storage.name().to_string(),
        };
        let summary = aggregate(&meta, &records);

        info!(
            run_id = %run_id,
            status = ?summary.status,
            valid = summary.totals.valid,
            invalid = summary.totals.invalid,
            cancelled = summary.totals.cancelled,
            elapsed_ms = clock.elapsed().as_millis() as u64,
            "validation run finished"
        );

        let report = RunReport { summary, records };
        drop(registry);

        if cancelled {
            Err(EngineError::Cancelled {
                run_id,
                report: Box::new(report),
            })
        } else {
            Ok(report)
        }
    }

    /// Spawn one task per file as permits become available
    ///
    /// Finished tasks are collected while waiting for a permit. Returns
    /// `true` if admission stopped because of cancellation.
    async fn admit(
        &self,
        plan: Vec<FileTask>,
        cancel: &CancelToken,
        tasks: &mut JoinSet<FileRecord>,
        state: &mut RunState,
    ) -> bool {
        let semaphore = Arc::new(Semaphore::new(self.concurrency.get()));

        for task in plan {
            let permit = loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return true,
                    Some(joined) = tasks.join_next() => state.collect(joined),
                    permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                        Ok(permit) => break permit,
                        Err(_) => return true,
                    },
                }
            };

            let storage = Arc::clone(&self.storage);
            let run_id = state.run_id.clone();
            let cancel = cancel.clone();
            let limit = self.task_timeout;
            tasks.spawn(async move {
                let record = match limit {
                    Some(limit) => {
                        validate_within(storage.as_ref(), task, run_id, &cancel, limit).await
                    }
                    None => validate_file(storage.as_ref(), task, run_id, &cancel).await,
                };
                drop(permit);
                record
            });
        }

        false
    }

    async fn drain_with_grace(&self, tasks: &mut JoinSet<FileRecord>, state: &mut RunState) {
        let drained = tokio::time::timeout(self.grace_period, async {
            while let Some(joined) = tasks.join_next().await {
                state.collect(joined);
            }
        })
        .await;

        if drained.is_err() {
            warn!(
                run_id = %state.run_id,
                abandoned = tasks.len(),
                grace_ms = self.grace_period.as_millis() as u64,
                "grace period elapsed, abandoning in-flight tasks"
            );
            tasks.abort_all();
            tasks.detach_all();
        }
    }
}

/// Validate one file, recording a timeout once `limit` has passed
async fn validate_within(
    storage: &dyn StorageProvider,
    task: FileTask,
    run_id: RunId,
    cancel: &CancelToken,
    limit: Duration,
) -> FileRecord {
    let file = task.file.clone();
    let rule_ids = task.rule_ids();
    let validation = validate_file(storage, task, run_id.clone(), cancel);
    match tokio::time::timeout(limit, validation).await {
        Ok(record) => record,
        Err(_) => {
            warn!(
                run_id = %run_id,
                file = %file,
                limit_ms = limit.as_millis() as u64,
                "file validation timed out"
            );
            FileRecord::timed_out(file, run_id, rule_ids, limit)
        }
    }
}

/// Validate one file
///
/// The cancel token is watched at every suspension point: while reading
/// and while each rule runs on the blocking pool. A rule abandoned on
/// cancellation keeps its blocking thread until it returns, but its result
/// is discarded.
async fn validate_file(
    storage: &dyn StorageProvider,
    task: FileTask,
    run_id: RunId,
    cancel: &CancelToken,
) -> FileRecord {
    let rule_ids = task.rule_ids();
    let FileTask { file, rules } = task;

    let read = tokio::select! {
        biased;
        _ = cancel.cancelled() => return FileRecord::cancelled(file, run_id, rule_ids),
        read = storage.read(&file) => read,
    };

    let content = match read {
        Ok(content) => content,
        Err(e) => {
            warn!(run_id = %run_id, file = %file, error = %e, "failed to read file");
            return FileRecord::storage_failure(file, run_id, rule_ids, &e);
        }
    };
    let digest = content_digest(&content);
    let content = Arc::new(FileContent::new(content));

    let mut outcomes = Vec::with_capacity(rules.len());
    let mut registry = None;
    for rule in &rules {
        if cancel.is_cancelled() {
            return FileRecord::cancelled(file, run_id, rule_ids);
        }

        let evaluation = {
            let rule = Arc::clone(rule);
            let content = Arc::clone(&content);
            tokio::task::spawn_blocking(move || rule.evaluate(&content))
        };
        let checked = tokio::select! {
            biased;
            _ = cancel.cancelled() => return FileRecord::cancelled(file, run_id, rule_ids),
            joined = evaluation => joined.unwrap_or_else(|e| {
                Err(ValidationFault::new(rule.id().to_string(), e.to_string()))
            }),
        };

        let outcome = match checked {
            Ok(outcome) => {
                if registry.is_none() {
                    registry = outcome.registry.clone();
                }
                RuleOutcome::from_check(rule, outcome)
            }
            Err(fault) => {
                warn!(
                    run_id = %run_id,
                    file = %file,
                    rule = %rule.id(),
                    error = %fault,
                    "rule faulted"
                );
                RuleOutcome::fault(rule, &fault)
            }
        };
        outcomes.push(outcome);
    }

    debug!(run_id = %run_id, file = %file, rules = rules.len(), "validated file");
    FileRecord::evaluated(file, run_id, rule_ids, outcomes, Some(digest)).with_registry(registry)
}
