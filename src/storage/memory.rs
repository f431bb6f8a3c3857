//! In-process storage for embedding and tests

use super::{CHANGE_CHANNEL_CAPACITY, ChangeEvent, ChangeStream, StorageProvider};
use crate::error::StorageError;
use crate::types::FileId;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;

/// A map of file identifiers to content
///
/// Every mutation is broadcast to active watchers. Reads can be slowed down
/// or made to fail per file.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    inner: Arc<Mutex<State>>,
}

#[derive(Debug, Default)]
struct State {
    files: BTreeMap<FileId, Vec<u8>>,
    failing: HashSet<FileId>,
    read_delay: Option<Duration>,
    watchers: Vec<mpsc::Sender<ChangeEvent>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a storage from `(id, content)` pairs
    pub fn with_files<I, K, V>(files: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<FileId>,
        V: Into<Vec<u8>>,
    {
        let storage = Self::new();
        {
            let mut state = storage.lock();
            for (id, content) in files {
                state.files.insert(id.into(), content.into());
            }
        }
        storage
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // A panic while holding the lock cannot leave the map half-written
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Insert or overwrite a file and notify watchers
    pub fn insert(&self, file: impl Into<FileId>, content: impl Into<Vec<u8>>) {
        let file = file.into();
        let mut state = self.lock();
        state.files.insert(file.clone(), content.into());
        state.notify(ChangeEvent::modified(file));
    }

    /// Remove a file and notify watchers
    pub fn remove(&self, file: &FileId) -> Option<Vec<u8>> {
        let mut state = self.lock();
        let removed = state.files.remove(file);
        if removed.is_some() {
            state.notify(ChangeEvent::removed(file.clone()));
        }
        removed
    }

    /// Make reads of `file` fail until cleared
    pub fn fail_reads(&self, file: impl Into<FileId>) {
        self.lock().failing.insert(file.into());
    }

    pub fn clear_failures(&self) {
        self.lock().failing.clear();
    }

    /// Delay every read by `delay`
    pub fn set_read_delay(&self, delay: Option<Duration>) {
        self.lock().read_delay = delay;
    }

    pub fn len(&self) -> usize {
        self.lock().files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().files.is_empty()
    }
}

impl State {
    fn notify(&mut self, event: ChangeEvent) {
        self.watchers.retain(|tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(file = %event.file, "change channel full, dropping event");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }
}

fn under_root(file: &FileId, root: &str) -> bool {
    match root.trim_start_matches("./").trim_end_matches('/') {
        "" | "." => true,
        prefix => file
            .as_str()
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('/')),
    }
}

#[async_trait]
impl StorageProvider for MemoryStorage {
    fn name(&self) -> &str {
        "memory"
    }

    async fn list(&self, root: &str) -> Result<Vec<FileId>, StorageError> {
        let state = self.lock();
        let files: Vec<FileId> = state
            .files
            .keys()
            .filter(|file| under_root(file, root))
            .cloned()
            .collect();

        let is_base = matches!(root.trim_start_matches("./"), "" | ".");
        if files.is_empty() && !is_base {
            return Err(StorageError::RootUnreachable {
                root: root.to_string(),
                message: "no such prefix".to_string(),
            });
        }
        Ok(files)
    }

    async fn read(&self, file: &FileId) -> Result<Vec<u8>, StorageError> {
        let delay = self.lock().read_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let state = self.lock();
        if state.failing.contains(file) {
            return Err(StorageError::Read {
                file: file.clone(),
                message: "injected read failure".to_string(),
            });
        }
        state
            .files
            .get(file)
            .cloned()
            .ok_or_else(|| StorageError::Read {
                file: file.clone(),
                message: "no such file".to_string(),
            })
    }

    fn watch(&self, _root: &str) -> Option<Result<ChangeStream, StorageError>> {
        let (tx, rx) = mpsc::channel(CHANGE_CHANNEL_CAPACITY);
        self.lock().watchers.push(tx);
        Some(Ok(ChangeStream::new(rx)))
    }
}
