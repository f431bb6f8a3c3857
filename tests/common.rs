//! Test utilities for confguard integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use confguard::StorageError;
use confguard::rules::{Rule, RuleKind, RuleRegistry, SharedRegistry, TargetPattern};
use confguard::storage::{ChangeStream, MemoryStorage, StorageProvider};
use confguard::types::{FileId, RuleId, Severity};
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Result type alias for tests
pub type TestResult<T = ()> = Result<T, Box<dyn std::error::Error>>;

/// Extract Ok value or panic with context
#[macro_export]
macro_rules! assert_ok {
    ($expr:expr) => {
        match $expr {
            Ok(v) => v,
            Err(e) => panic!("assertion failed: expected Ok, got Err({:?})", e),
        }
    };
    ($expr:expr, $msg:literal) => {
        match $expr {
            Ok(v) => v,
            Err(e) => panic!("{}: {:?}", $msg, e),
        }
    };
}

/// Extract Some value or panic with context
#[macro_export]
macro_rules! assert_some {
    ($expr:expr) => {
        match $expr {
            Some(v) => v,
            None => panic!("assertion failed: expected Some, got None"),
        }
    };
    ($expr:expr, $msg:literal) => {
        match $expr {
            Some(v) => v,
            None => panic!("{}: got None", $msg),
        }
    };
}

pub fn rule_id(id: &str) -> RuleId {
    RuleId::new(id).unwrap()
}

/// The `non-empty` rule applied to every file
pub fn non_empty_rule() -> Rule {
    Rule::new(
        rule_id("non-empty"),
        "File must not be empty",
        Severity::Error,
        TargetPattern::any(),
        RuleKind::NonEmpty,
    )
}

/// Wrap rules into a shared registry, in order
pub fn shared_registry(rules: impl IntoIterator<Item = Rule>) -> SharedRegistry {
    let mut registry = RuleRegistry::new();
    for rule in rules {
        registry.register(rule).unwrap();
    }
    SharedRegistry::new(registry)
}

/// `count` small files named `f00`, `f01`, ...
pub fn numbered_files(count: usize) -> MemoryStorage {
    MemoryStorage::with_files((0..count).map(|i| (format!("f{:02}", i), format!("content {}", i))))
}

/// Storage wrapper that tracks how many reads are in flight at once
#[derive(Debug, Clone)]
pub struct CountingStorage {
    inner: MemoryStorage,
    current: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    reads: Arc<AtomicUsize>,
}

impl CountingStorage {
    pub fn new(inner: MemoryStorage) -> Self {
        Self {
            inner,
            current: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
            reads: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Highest number of reads observed in flight simultaneously
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Total reads started
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn inner(&self) -> &MemoryStorage {
        &self.inner
    }
}

/// Decrements the in-flight counter even if the read future is dropped
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl StorageProvider for CountingStorage {
    fn name(&self) -> &str {
        "counting"
    }

    async fn list(&self, root: &str) -> Result<Vec<FileId>, StorageError> {
        self.inner.list(root).await
    }

    async fn read(&self, file: &FileId) -> Result<Vec<u8>, StorageError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let depth = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = InFlight(&self.current);
        self.peak.fetch_max(depth, Ordering::SeqCst);
        self.inner.read(file).await
    }

    fn watch(&self, root: &str) -> Option<Result<ChangeStream, StorageError>> {
        self.inner.watch(root)
    }
}

/// Storage wrapper that delays reads of selected files
///
/// A sleeping stall yields to the runtime like a slow network read. A
/// blocking stall holds the worker thread, like a provider doing
/// synchronous I/O inside its async read.
#[derive(Debug, Clone)]
pub struct SlowFileStorage {
    inner: MemoryStorage,
    slow: HashSet<FileId>,
    delay: Duration,
    blocking: bool,
}

impl SlowFileStorage {
    pub fn sleeping(inner: MemoryStorage, slow: &[&str], delay: Duration) -> Self {
        Self {
            inner,
            slow: slow.iter().map(|f| FileId::new(*f)).collect(),
            delay,
            blocking: false,
        }
    }

    pub fn blocking(inner: MemoryStorage, slow: &[&str], delay: Duration) -> Self {
        Self {
            blocking: true,
            ..Self::sleeping(inner, slow, delay)
        }
    }
}

#[async_trait]
impl StorageProvider for SlowFileStorage {
    fn name(&self) -> &str {
        "slow"
    }

    async fn list(&self, root: &str) -> Result<Vec<FileId>, StorageError> {
        self.inner.list(root).await
    }

    async fn read(&self, file: &FileId) -> Result<Vec<u8>, StorageError> {
        if self.slow.contains(file) {
            if self.blocking {
                std::thread::sleep(self.delay);
            } else {
                tokio::time::sleep(self.delay).await;
            }
        }
        self.inner.read(file).await
    }
}
