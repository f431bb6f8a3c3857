#![forbid(unsafe_code)]

//! Rule registry for managing and loading rules
//!
//! The RuleRegistry is responsible for:
//! - Registering rules with unique ids, keeping registration order
//! - Loading rule plugins from a directory on a best-effort basis
//! - Applying configuration overrides (disable, severity)
//! - Answering which rules apply to a given file
//!
//! [`SharedRegistry`] wraps a registry for concurrent use: runs take a read
//! guard for their whole duration, mutation takes the write guard.

use crate::config::{RuleOverride, RulesConfig};
use crate::error::RuleError;
use crate::rules::Rule;
use crate::rules::plugin::{discover_plugins, load_plugin};
use crate::types::{FileId, RuleId};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{OwnedRwLockReadGuard, RwLock};
use tracing::{debug, info, warn};

/// Registry for storing and managing all rules
///
/// Rules are kept in registration order; the id index points into that
/// order so lookups stay O(1) while `rules_for` stays deterministic.
#[derive(Debug, Default, Clone)]
pub struct RuleRegistry {
    rules: Vec<Arc<Rule>>,
    index: HashMap<RuleId, usize>,
}

/// Outcome of a best-effort plugin load
#[derive(Debug, Default)]
pub struct PluginReport {
    /// Ids of rules that were registered, in load order
    pub loaded: Vec<RuleId>,
    /// One entry per plugin that was skipped
    pub warnings: Vec<RuleError>,
}

impl PluginReport {
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }
}

impl RuleRegistry {
    /// Create a new empty RuleRegistry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a rule
    ///
    /// # Errors
    ///
    /// Returns `RuleError::DuplicateRule` if a rule with the same id exists.
    pub fn register(&mut self, rule: Rule) -> Result<(), RuleError> {
        let id = rule.id().clone();
        if self.index.contains_key(&id) {
            return Err(RuleError::DuplicateRule(id.to_string()));
        }
        debug!(rule = %id, kind = rule.kind_name(), "registered rule");
        self.index.insert(id, self.rules.len());
        self.rules.push(Arc::new(rule));
        Ok(())
    }

    /// Replace an existing rule, keeping its registration slot
    ///
    /// # Errors
    ///
    /// Returns `RuleError::NotFound` if no rule with that id is registered.
    pub fn replace(&mut self, rule: Rule) -> Result<Arc<Rule>, RuleError> {
        let id = rule.id().clone();
        let slot = *self
            .index
            .get(&id)
            .ok_or_else(|| RuleError::NotFound(id.to_string()))?;
        info!(
            rule = %id,
            old_target = ?self.rules[slot].target(),
            new_target = ?rule.target(),
            "re-registered rule"
        );
        Ok(std::mem::replace(&mut self.rules[slot], Arc::new(rule)))
    }

    /// Remove a rule
    ///
    /// # Errors
    ///
    /// Returns `RuleError::NotFound` if no rule with that id is registered.
    pub fn unregister(&mut self, id: &RuleId) -> Result<Arc<Rule>, RuleError> {
        let slot = self
            .index
            .remove(id)
            .ok_or_else(|| RuleError::NotFound(id.to_string()))?;
        let removed = self.rules.remove(slot);
        for position in self.index.values_mut() {
            if *position > slot {
                *position -= 1;
            }
        }
        debug!(rule = %id, "unregistered rule");
        Ok(removed)
    }

    /// Rules whose target matches `file`, in registration order
    pub fn rules_for(&self, file: &FileId) -> Vec<Arc<Rule>> {
        self.rules
            .iter()
            .filter(|rule| rule.applies_to(file))
            .cloned()
            .collect()
    }

    /// Load every plugin in `dir`
    ///
    /// Malformed plugins and duplicate ids are collected as warnings; the
    /// remaining plugins are still registered. A missing directory is only
    /// a warning.
    pub fn load_plugins(&mut self, dir: &Path) -> PluginReport {
        let mut report = PluginReport::default();

        if !dir.exists() {
            warn!(dir = %dir.display(), "rule plugin directory does not exist");
            return report;
        }

        let paths = match discover_plugins(dir) {
            Ok(paths) => paths,
            Err(e) => {
                warn!(error = %e, "failed to scan plugin directory");
                report.warnings.push(e);
                return report;
            }
        };

        for path in paths {
            let result = load_plugin(&path).and_then(|rule| {
                let id = rule.id().clone();
                self.register(rule).map(|_| id).map_err(|e| RuleError::RuleLoad {
                    path: path.clone(),
                    message: e.to_string(),
                })
            });
            match result {
                Ok(id) => report.loaded.push(id),
                Err(e) => {
                    warn!(error = %e, "skipping rule plugin");
                    report.warnings.push(e);
                }
            }
        }

        info!(
            dir = %dir.display(),
            loaded = report.loaded.len(),
            skipped = report.warnings.len(),
            "loaded rule plugins"
        );
        report
    }

    /// Apply configuration overrides
    ///
    /// Disabled rules are removed; severity overrides replace the rule with a
    /// copy carrying the new severity. Overrides naming unknown rules are
    /// logged and ignored.
    pub fn filter_by_config(&mut self, config: &RulesConfig) {
        let mut ids: Vec<&RuleId> = config.overrides.keys().collect();
        ids.sort();

        for rule_id in ids {
            let Some(slot) = self.index.get(rule_id).copied() else {
                warn!(rule = %rule_id, "override names an unknown rule");
                continue;
            };
            match &config.overrides[rule_id] {
                RuleOverride::Enabled(true) => {}
                RuleOverride::Enabled(false) => {
                    let _ = self.unregister(rule_id);
                }
                RuleOverride::Settings(settings) => {
                    if let Some(severity) = settings.severity {
                        let updated = self.rules[slot].with_severity(severity);
                        self.rules[slot] = Arc::new(updated);
                    }
                }
            }
        }
    }

    /// Get a rule by its ID
    pub fn get_rule(&self, id: &RuleId) -> Option<&Arc<Rule>> {
        self.index.get(id).map(|&slot| &self.rules[slot])
    }

    /// Iterate over all rules in registration order
    pub fn iter_rules(&self) -> impl Iterator<Item = &Arc<Rule>> {
        self.rules.iter()
    }

    /// Get the number of rules in the registry
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Check if the registry is empty
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// A registry shared between the scheduler, the watch controller and
/// whoever reloads rules
///
/// The lock is fair: a queued writer blocks new readers, so a reload
/// requested during a run is applied after that run and before the next.
#[derive(Debug, Clone, Default)]
pub struct SharedRegistry {
    inner: Arc<RwLock<RuleRegistry>>,
}

impl SharedRegistry {
    pub fn new(registry: RuleRegistry) -> Self {
        Self {
            inner: Arc::new(RwLock::new(registry)),
        }
    }

    /// Read access held for the duration of a run
    pub async fn read_for_run(&self) -> OwnedRwLockReadGuard<RuleRegistry> {
        self.inner.clone().read_owned().await
    }

    /// Apply a mutation once no run holds the registry
    pub async fn mutate<T>(&self, f: impl FnOnce(&mut RuleRegistry) -> T) -> T {
        let mut guard = self.inner.write().await;
        f(&mut guard)
    }

    /// Swap in a freshly built registry, e.g. after plugin rediscovery
    pub async fn reload(&self, registry: RuleRegistry) {
        let mut guard = self.inner.write().await;
        info!(
            previous = guard.len(),
            current = registry.len(),
            "rule registry reloaded"
        );
        *guard = registry;
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }
}
