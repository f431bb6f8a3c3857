//! Local filesystem storage with gitignore support
//!
//! Files are discovered with the ignore crate's walker and filtered by
//! include/exclude globs matched against the path relative to the base
//! directory. That relative path is the file identifier. Watch mode is
//! backed by notify.

use super::{CHANGE_CHANNEL_CAPACITY, ChangeEvent, ChangeStream, StorageProvider};
use crate::error::StorageError;
use crate::types::{FileId, GlobPattern};
use async_trait::async_trait;
use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::WalkBuilder;
use notify::{EventKind, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Directories never descended into
pub const EXCLUDED_DIRS: &[&str] = &[".git", "node_modules", ".idea", ".venv", "__pycache__"];

/// Archive extensions never listed, even when an include glob matches
pub const ARCHIVE_EXTENSIONS: &[&str] = &["zip", "tar", "gz", "tgz", "bz2", "xz", "7z", "rar"];

/// Storage provider backed by a local directory
#[derive(Clone)]
pub struct LocalStorage {
    base: PathBuf,
    filter: Arc<PathFilter>,
}

struct PathFilter {
    include: GlobSet,
    exclude: GlobSet,
}

impl PathFilter {
    fn accepts(&self, relative: &str) -> bool {
        if !self.include.is_match(relative) || self.exclude.is_match(relative) {
            return false;
        }
        let in_excluded_dir = relative
            .split('/')
            .any(|component| EXCLUDED_DIRS.contains(&component));
        let is_archive = Path::new(relative)
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ARCHIVE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()));
        !in_excluded_dir && !is_archive
    }
}

impl LocalStorage {
    /// Storage over `base` listing `*.yaml` and `*.yml` files
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self::with_patterns(
            base,
            &[GlobPattern::new("**/*.yaml"), GlobPattern::new("**/*.yml")],
            &[],
        )
        .unwrap_or_else(|_| unreachable!("default patterns are valid globs"))
    }

    /// Storage over `base` with explicit include and exclude patterns
    ///
    /// An empty include list includes every file.
    pub fn with_patterns(
        base: impl Into<PathBuf>,
        include: &[GlobPattern],
        exclude: &[GlobPattern],
    ) -> Result<Self, StorageError> {
        let include = if include.is_empty() {
            build_globset(&[GlobPattern::new("**")])?
        } else {
            build_globset(include)?
        };
        let exclude = build_globset(exclude)?;

        Ok(Self {
            base: base.into(),
            filter: Arc::new(PathFilter { include, exclude }),
        })
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    fn resolve(&self, root: &str) -> PathBuf {
        match root.trim_start_matches("./") {
            "" | "." => self.base.clone(),
            rel => self.base.join(rel),
        }
    }

    /// File identifier for an absolute or base-relative path
    fn file_id(&self, path: &Path, canonical_base: Option<&Path>) -> Option<FileId> {
        let relative = path
            .strip_prefix(&self.base)
            .ok()
            .or_else(|| canonical_base.and_then(|base| path.strip_prefix(base).ok()))?;
        let id = FileId::new(relative.to_string_lossy());
        if id.as_str().is_empty() {
            None
        } else {
            Some(id)
        }
    }
}

impl std::fmt::Debug for LocalStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalStorage")
            .field("base", &self.base)
            .finish()
    }
}

fn build_globset(patterns: &[GlobPattern]) -> Result<GlobSet, StorageError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern.as_str()).map_err(|e| StorageError::Pattern {
            pattern: pattern.as_str().to_string(),
            message: e.to_string(),
        })?;
        builder.add(glob);
    }
    builder.build().map_err(|e| StorageError::Pattern {
        pattern: "<globset>".to_string(),
        message: e.to_string(),
    })
}

#[async_trait]
impl StorageProvider for LocalStorage {
    fn name(&self) -> &str {
        "local"
    }

    async fn list(&self, root: &str) -> Result<Vec<FileId>, StorageError> {
        let dir = self.resolve(root);
        if !dir.is_dir() {
            return Err(StorageError::RootUnreachable {
                root: root.to_string(),
                message: format!("{} is not a directory", dir.display()),
            });
        }

        let storage = self.clone();
        let root_name = root.to_string();
        tokio::task::spawn_blocking(move || storage.walk(&dir))
            .await
            .map_err(|e| StorageError::List {
                root: root_name,
                message: e.to_string(),
            })
    }

    async fn read(&self, file: &FileId) -> Result<Vec<u8>, StorageError> {
        tokio::fs::read(self.base.join(file.as_str()))
            .await
            .map_err(|e| StorageError::Read {
                file: file.clone(),
                message: e.to_string(),
            })
    }

    fn watch(&self, root: &str) -> Option<Result<ChangeStream, StorageError>> {
        Some(self.start_watcher(root))
    }
}

impl LocalStorage {
    fn walk(&self, dir: &Path) -> Vec<FileId> {
        let walker = WalkBuilder::new(dir)
            .hidden(false) // Don't skip hidden files by default
            .git_ignore(true) // Respect .gitignore
            .filter_entry(|entry| {
                let is_dir = entry.file_type().is_some_and(|ft| ft.is_dir());
                !(is_dir
                    && entry
                        .file_name()
                        .to_str()
                        .is_some_and(|name| EXCLUDED_DIRS.contains(&name)))
            })
            .build();

        let mut files = Vec::new();
        for result in walker {
            let entry = match result {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(error = %e, "skipping unreadable path while listing");
                    continue;
                }
            };
            if !entry.file_type().is_some_and(|ft| ft.is_file()) {
                continue;
            }
            if let Some(id) = self.file_id(entry.path(), None)
                && self.filter.accepts(id.as_str())
            {
                files.push(id);
            }
        }

        files.sort();
        debug!(dir = %dir.display(), files = files.len(), "listed local storage");
        files
    }

    fn start_watcher(&self, root: &str) -> Result<ChangeStream, StorageError> {
        let dir = self.resolve(root);
        let watch_error = |message: String| StorageError::Watch {
            root: root.to_string(),
            message,
        };

        let canonical_base = std::fs::canonicalize(&self.base).ok();
        let (tx, rx) = mpsc::channel(CHANGE_CHANNEL_CAPACITY);
        let storage = self.clone();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            let event = match res {
                Ok(event) => event,
                Err(e) => {
                    warn!(error = %e, "file watcher error");
                    return;
                }
            };
            for change in storage.translate(&event, canonical_base.as_deref()) {
                // The receiver is gone once the consumer stopped watching
                if tx.blocking_send(change).is_err() {
                    return;
                }
            }
        })
        .map_err(|e| watch_error(e.to_string()))?;

        watcher
            .watch(&dir, RecursiveMode::Recursive)
            .map_err(|e| watch_error(e.to_string()))?;

        debug!(dir = %dir.display(), "watching local storage");
        Ok(ChangeStream::with_guard(rx, watcher))
    }

    fn translate(&self, event: &notify::Event, canonical_base: Option<&Path>) -> Vec<ChangeEvent> {
        let removal = match event.kind {
            EventKind::Create(_) | EventKind::Modify(_) => false,
            EventKind::Remove(_) => true,
            EventKind::Access(_) | EventKind::Any | EventKind::Other => return Vec::new(),
        };

        event
            .paths
            .iter()
            .filter_map(|path| {
                let id = self.file_id(path, canonical_base)?;
                if !self.filter.accepts(id.as_str()) {
                    return None;
                }
                // Renames report the old name as a modification
                if removal || !path.exists() {
                    Some(ChangeEvent::removed(id))
                } else if path.is_file() {
                    Some(ChangeEvent::modified(id))
                } else {
                    None
                }
            })
            .collect()
    }
}
