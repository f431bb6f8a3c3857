#![forbid(unsafe_code)]

//! Storage providers: where configuration files come from
//!
//! The engine only depends on [`StorageProvider`]. A provider lists file
//! identifiers under a root, reads their content, and optionally streams
//! change notifications for watch mode.

pub mod local;
pub mod memory;

pub use local::LocalStorage;
pub use memory::MemoryStorage;

use crate::error::StorageError;
use crate::types::FileId;
use async_trait::async_trait;
use std::any::Any;
use std::fmt;
use tokio::sync::mpsc;

/// Capacity of the channel between a watcher and its consumer
pub const CHANGE_CHANNEL_CAPACITY: usize = 1024;

#[async_trait]
pub trait StorageProvider: Send + Sync + 'static {
    /// Backend name recorded in run summaries
    fn name(&self) -> &str;

    /// List the file identifiers under `root`, sorted
    async fn list(&self, root: &str) -> Result<Vec<FileId>, StorageError>;

    /// Read one file's content
    async fn read(&self, file: &FileId) -> Result<Vec<u8>, StorageError>;

    /// Subscribe to changes under `root`
    ///
    /// `None` means the backend cannot watch; callers fall back to single
    /// runs.
    fn watch(&self, root: &str) -> Option<Result<ChangeStream, StorageError>> {
        let _ = root;
        None
    }
}

/// What happened to a file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// Created or modified; content should be revalidated
    Modified,
    /// Deleted or renamed away
    Removed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub file: FileId,
    pub kind: ChangeKind,
}

impl ChangeEvent {
    pub fn modified(file: impl Into<FileId>) -> Self {
        Self {
            file: file.into(),
            kind: ChangeKind::Modified,
        }
    }

    pub fn removed(file: impl Into<FileId>) -> Self {
        Self {
            file: file.into(),
            kind: ChangeKind::Removed,
        }
    }
}

/// A stream of change events
///
/// Holds whatever keeps the underlying watcher alive; dropping the stream
/// stops watching.
pub struct ChangeStream {
    events: mpsc::Receiver<ChangeEvent>,
    _guard: Option<Box<dyn Any + Send>>,
}

impl ChangeStream {
    pub fn new(events: mpsc::Receiver<ChangeEvent>) -> Self {
        Self {
            events,
            _guard: None,
        }
    }

    pub fn with_guard(events: mpsc::Receiver<ChangeEvent>, guard: impl Any + Send) -> Self {
        Self {
            events,
            _guard: Some(Box::new(guard)),
        }
    }

    /// Next change, or `None` once the source is gone
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        self.events.recv().await
    }
}

impl fmt::Debug for ChangeStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeStream")
            .field("guarded", &self._guard.is_some())
            .finish()
    }
}
