#![forbid(unsafe_code)]

//! Debounced re-validation driven by storage change events
//!
//! The controller remembers when each file last changed. Once no change has
//! arrived for the debounce window, every changed file is revalidated in a
//! single batch. Changes that arrive while a batch is running are queued
//! for the next one, so batches never overlap. The latest record of every
//! file is kept as a live view. A file whose content digest still matches
//! its live record is not revalidated.

use crate::engine::aggregator::aggregate;
use crate::engine::cancel::CancelToken;
use crate::engine::record::{
    FileRecord, RunMeta, RunReport, RunStatus, RunSummary, content_digest,
};
use crate::engine::scheduler::Scheduler;
use crate::error::{EngineError, RuleError};
use crate::rules::{RuleRegistry, SharedRegistry};
use crate::storage::{ChangeEvent, ChangeKind, ChangeStream, StorageProvider};
use crate::types::{FileId, RunId};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{Instant, sleep, sleep_until};
use tracing::{debug, error, info, warn};

/// Default quiet period before a batch fires
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(250);

/// Observable controller state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    Idle,
    Debouncing,
    Revalidating,
}

/// Counters returned when the controller stops
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatchStats {
    /// Change events received
    pub events: usize,
    /// Revalidation batches started
    pub batches: usize,
    /// Batches dropped because no file content had changed
    pub unchanged: usize,
    /// Files dropped from the live view because they were removed
    pub removed: usize,
}

/// `Ok(None)` means the batch found nothing to revalidate
type BatchOutput = Result<Option<RunReport>, EngineError>;
type BatchResult = Result<BatchOutput, JoinError>;

struct Batch {
    handle: JoinHandle<BatchOutput>,
    cancel: CancelToken,
}

/// Watch-mode controller
pub struct WatchController {
    scheduler: Arc<Scheduler>,
    debounce: Duration,
    state: watch::Sender<WatchState>,
    live: BTreeMap<FileId, FileRecord>,
}

impl std::fmt::Debug for WatchController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchController")
            .field("debounce", &self.debounce)
            .field("state", &*self.state.borrow())
            .field("live_files", &self.live.len())
            .finish()
    }
}

impl WatchController {
    pub fn new(scheduler: Arc<Scheduler>, debounce: Duration) -> Self {
        let (state, _) = watch::channel(WatchState::Idle);
        Self {
            scheduler,
            debounce,
            state,
            live: BTreeMap::new(),
        }
    }

    /// Subscribe to state transitions
    pub fn subscribe(&self) -> watch::Receiver<WatchState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> WatchState {
        *self.state.borrow()
    }

    /// Seed the live view, typically with the initial full run
    pub fn absorb(&mut self, report: &RunReport) {
        for record in &report.records {
            self.live.insert(record.file.clone(), record.clone());
        }
    }

    /// Latest record per file
    pub fn live_view(&self) -> &BTreeMap<FileId, FileRecord> {
        &self.live
    }

    /// Summary over the live view
    ///
    /// Records in the live view may come from different runs; the summary
    /// gets its own `live-` run id.
    pub fn live_summary(&self) -> RunSummary {
        let now = OffsetDateTime::now_utc();
        let started_at = self
            .live
            .values()
            .map(|r| r.evaluated_at)
            .min()
            .unwrap_or(now);
        let meta = RunMeta {
            run_id: RunId::new(format!("live-{}", now.unix_timestamp())),
            started_at,
            ended_at: now,
            status: RunStatus::Completed,
            backend: self.scheduler.backend().to_string(),
        };
        let records: Vec<FileRecord> = self.live.values().cloned().collect();
        aggregate(&meta, &records)
    }

    fn publish(&self, next: WatchState) {
        self.state.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                debug!(from = ?*current, to = ?next, "watch state changed");
                *current = next;
                true
            }
        });
    }

    /// Run until `shutdown` fires or the change stream closes
    ///
    /// `sink` receives every batch report, including the partial report of
    /// a batch cut short by shutdown.
    pub async fn run<F>(
        &mut self,
        mut changes: ChangeStream,
        shutdown: &CancelToken,
        mut sink: F,
    ) -> WatchStats
    where
        F: FnMut(&RunReport),
    {
        let mut stats = WatchStats::default();
        let mut dirty: HashMap<FileId, (Instant, ChangeKind)> = HashMap::new();
        let mut inflight: Option<Batch> = None;
        let mut stream_open = true;

        loop {
            let deadline = if inflight.is_none() {
                dirty.values().map(|(at, _)| *at).max().map(|at| at + self.debounce)
            } else {
                None
            };

            self.publish(match (&inflight, deadline) {
                (Some(_), _) => WatchState::Revalidating,
                (None, Some(_)) => WatchState::Debouncing,
                (None, None) => WatchState::Idle,
            });

            if !stream_open && inflight.is_none() && dirty.is_empty() {
                break;
            }

            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    if let Some(batch) = inflight.take() {
                        batch.cancel.cancel();
                        let result = batch.handle.await;
                        self.finish_batch(result, &mut stats, &mut sink);
                    }
                    break;
                }
                result = join_batch(&mut inflight) => {
                    inflight = None;
                    self.finish_batch(result, &mut stats, &mut sink);
                }
                change = changes.recv(), if stream_open => match change {
                    Some(ChangeEvent { file, kind }) => {
                        stats.events += 1;
                        debug!(file = %file, kind = ?kind, "change received");
                        dirty.insert(file, (Instant::now(), kind));
                    }
                    None => {
                        debug!("change stream closed");
                        stream_open = false;
                    }
                },
                _ = wait_until(deadline) => {
                    let mut files = Vec::new();
                    for (file, (_, kind)) in dirty.drain() {
                        match kind {
                            ChangeKind::Modified => files.push(file),
                            ChangeKind::Removed => {
                                if self.live.remove(&file).is_some() {
                                    stats.removed += 1;
                                }
                                info!(file = %file, "file removed, dropped from live view");
                            }
                        }
                    }
                    if !files.is_empty() {
                        files.sort();
                        stats.batches += 1;
                        inflight = Some(self.start_batch(files));
                    }
                }
            }
        }

        self.publish(WatchState::Idle);
        stats
    }

    fn start_batch(&self, files: Vec<FileId>) -> Batch {
        let known: HashMap<FileId, String> = files
            .iter()
            .filter_map(|file| {
                let digest = self.live.get(file)?.sha256.clone()?;
                Some((file.clone(), digest))
            })
            .collect();
        let cancel = CancelToken::new();
        let scheduler = Arc::clone(&self.scheduler);
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            let files = tokio::select! {
                biased;
                _ = token.cancelled() => return Ok(None),
                files = retain_changed(scheduler.storage().as_ref(), files, &known) => files,
            };
            if files.is_empty() {
                return Ok(None);
            }
            info!(files = files.len(), "revalidating changed files");
            scheduler.run(files, &token).await.map(Some)
        });
        Batch { handle, cancel }
    }

    fn finish_batch<F>(&mut self, result: BatchResult, stats: &mut WatchStats, sink: &mut F)
    where
        F: FnMut(&RunReport),
    {
        match result {
            Ok(Ok(Some(report))) => {
                self.absorb(&report);
                sink(&report);
            }
            Ok(Ok(None)) => {
                stats.unchanged += 1;
                debug!("no file content changed, batch skipped");
            }
            Ok(Err(EngineError::Cancelled { run_id, report })) => {
                warn!(run_id = %run_id, "revalidation batch cancelled");
                sink(&report);
            }
            Ok(Err(e)) => error!(error = %e, "revalidation batch failed"),
            Err(e) => error!(error = %e, "revalidation task panicked"),
        }
    }
}

/// Rebuild the rule registry whenever rule definitions change
///
/// A burst of changes is debounced into one rebuild. The new registry goes
/// through [`SharedRegistry::reload`], so it waits for any in-flight run and
/// takes effect from the next one. A rebuild that fails or yields no rules
/// keeps the previous registry. Runs until `shutdown` fires or the stream
/// closes and returns the number of reloads applied.
pub async fn reload_rules_on_change<F>(
    registry: &SharedRegistry,
    mut changes: ChangeStream,
    debounce: Duration,
    shutdown: &CancelToken,
    mut rebuild: F,
) -> usize
where
    F: FnMut() -> Result<RuleRegistry, RuleError>,
{
    let mut reloads = 0;
    let mut stream_open = true;

    while stream_open {
        let first = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            change = changes.recv() => change,
        };
        let Some(first) = first else {
            break;
        };
        debug!(file = %first.file, "rule definition changed");

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => return reloads,
                change = changes.recv() => match change {
                    Some(change) => debug!(file = %change.file, "rule definition changed"),
                    None => {
                        stream_open = false;
                        break;
                    }
                },
                _ = sleep(debounce) => break,
            }
        }

        match rebuild() {
            Ok(next) if next.is_empty() => {
                warn!("rule reload produced no rules, keeping the current registry");
            }
            Ok(next) => {
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => return reloads,
                    _ = registry.reload(next) => reloads += 1,
                }
            }
            Err(e) => warn!(error = %e, "rule reload failed, keeping the current registry"),
        }
    }

    reloads
}

/// Keep the files whose content no longer matches the known digest
///
/// Files without a known digest, and files that cannot be read, are kept so
/// the scheduler records their current state.
async fn retain_changed(
    storage: &dyn StorageProvider,
    files: Vec<FileId>,
    known: &HashMap<FileId, String>,
) -> Vec<FileId> {
    let mut changed = Vec::with_capacity(files.len());
    for file in files {
        let Some(previous) = known.get(&file) else {
            changed.push(file);
            continue;
        };
        match storage.read(&file).await {
            Ok(content) if content_digest(&content) == *previous => {
                debug!(file = %file, "content unchanged, not revalidating");
            }
            _ => changed.push(file),
        }
    }
    changed
}

async fn join_batch(inflight: &mut Option<Batch>) -> BatchResult {
    match inflight {
        Some(batch) => (&mut batch.handle).await,
        None => std::future::pending().await,
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
