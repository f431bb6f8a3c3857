#![forbid(unsafe_code)]

//! Core Rule type and the predicate wrapper applied at construction time

use crate::error::{RuleError, ValidationFault};
use crate::rules::builtin::{YamlCheck, parse_manifest};
use crate::types::{FileId, GlobPattern, RuleId, Severity};
use globset::{Glob, GlobSet, GlobSetBuilder};
use regex::Regex;
use serde_yaml::Mapping;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, OnceLock};
use std::time::Instant;

/// Result of evaluating one rule against one file's content
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckOutcome {
    pub valid: bool,
    pub message: Option<String>,
    /// Image registry the check found in the manifest, if any
    pub registry: Option<String>,
}

impl CheckOutcome {
    pub fn pass() -> Self {
        Self {
            valid: true,
            message: None,
            registry: None,
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            valid: false,
            message: Some(message.into()),
            registry: None,
        }
    }

    pub fn with_registry(mut self, registry: impl Into<String>) -> Self {
        self.registry = Some(registry.into());
        self
    }
}

/// Content of one file, shared by every rule evaluated against it
///
/// The YAML manifest view is parsed on first use and cached, so a file is
/// parsed once no matter how many manifest checks apply to it.
pub struct FileContent {
    bytes: Vec<u8>,
    manifest: OnceLock<Result<Mapping, String>>,
}

impl FileContent {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            manifest: OnceLock::new(),
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// The content parsed as a service manifest
    ///
    /// # Errors
    ///
    /// Returns the parse error message when the content is not a YAML
    /// mapping.
    pub fn manifest(&self) -> Result<&Mapping, &str> {
        self.manifest
            .get_or_init(|| parse_manifest(&self.bytes))
            .as_ref()
            .map_err(String::as_str)
    }
}

impl fmt::Debug for FileContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileContent")
            .field("len", &self.bytes.len())
            .field("parsed", &self.manifest.get().is_some())
            .finish()
    }
}

/// A callable rule predicate
///
/// Predicates receive the raw file content. An `Err` means the predicate
/// itself broke, not that the content is invalid.
pub type Predicate = Arc<dyn Fn(&[u8]) -> Result<CheckOutcome, ValidationFault> + Send + Sync>;

/// Predicate form stored on a rule, fed the shared file content
type Evaluator = Arc<dyn Fn(&FileContent) -> Result<CheckOutcome, ValidationFault> + Send + Sync>;

/// Whether a regex rule requires or forbids its pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchMode {
    Require,
    Forbid,
}

/// The closed set of checks a rule can perform
#[derive(Clone)]
pub enum RuleKind {
    /// Fails when the content is empty
    NonEmpty,
    /// Requires or forbids a regular expression match in the content
    Regex { pattern: Regex, mode: MatchMode },
    /// A structural check over a YAML service manifest
    Yaml(YamlCheck),
    /// An in-process predicate supplied by the embedding program
    Custom(Predicate),
}

impl fmt::Debug for RuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleKind::NonEmpty => f.write_str("NonEmpty"),
            RuleKind::Regex { pattern, mode } => f
                .debug_struct("Regex")
                .field("pattern", &pattern.as_str())
                .field("mode", mode)
                .finish(),
            RuleKind::Yaml(check) => f.debug_tuple("Yaml").field(check).finish(),
            RuleKind::Custom(_) => f.write_str("Custom(<fn>)"),
        }
    }
}

impl RuleKind {
    /// Short name used by `--list-rules` output
    pub fn name(&self) -> &'static str {
        match self {
            RuleKind::NonEmpty => "non-empty",
            RuleKind::Regex { .. } => "regex",
            RuleKind::Yaml(check) => check.name(),
            RuleKind::Custom(_) => "custom",
        }
    }

    /// Turn the check into a bare evaluator
    fn into_evaluator(self, rule_id: &RuleId) -> Evaluator {
        match self {
            RuleKind::NonEmpty => {
                let id = rule_id.to_string();
                Arc::new(move |content: &FileContent| {
                    if content.bytes().is_empty() {
                        Ok(CheckOutcome::fail(format!("{}: file is empty", id)))
                    } else {
                        Ok(CheckOutcome::pass())
                    }
                })
            }
            RuleKind::Regex { pattern, mode } => {
                let id = rule_id.to_string();
                Arc::new(move |content: &FileContent| {
                    let text = String::from_utf8_lossy(content.bytes());
                    let found = pattern.find(&text);
                    match (mode, found) {
                        (MatchMode::Require, Some(_)) | (MatchMode::Forbid, None) => {
                            Ok(CheckOutcome::pass())
                        }
                        (MatchMode::Require, None) => Ok(CheckOutcome::fail(format!(
                            "{}: required pattern '{}' not found",
                            id,
                            pattern.as_str()
                        ))),
                        (MatchMode::Forbid, Some(m)) => Ok(CheckOutcome::fail(format!(
                            "{}: forbidden pattern '{}' found: '{}'",
                            id,
                            pattern.as_str(),
                            m.as_str()
                        ))),
                    }
                })
            }
            RuleKind::Yaml(check) => {
                Arc::new(move |content: &FileContent| Ok(check.evaluate(content)))
            }
            RuleKind::Custom(predicate) => {
                Arc::new(move |content: &FileContent| predicate(content.bytes()))
            }
        }
    }
}

/// The set of file identifiers a rule applies to
#[derive(Clone)]
pub struct TargetPattern {
    patterns: Vec<GlobPattern>,
    set: GlobSet,
}

impl TargetPattern {
    /// Compile a target from glob patterns
    ///
    /// An empty list matches every file.
    pub fn new(patterns: &[GlobPattern]) -> Result<Self, RuleError> {
        let patterns = if patterns.is_empty() {
            vec![GlobPattern::new("**")]
        } else {
            patterns.to_vec()
        };

        let mut builder = GlobSetBuilder::new();
        for pattern in &patterns {
            let glob = Glob::new(pattern.as_str()).map_err(|e| RuleError::InvalidPattern {
                pattern: pattern.as_str().to_string(),
                message: e.to_string(),
            })?;
            builder.add(glob);
        }
        let set = builder.build().map_err(|e| RuleError::InvalidPattern {
            pattern: "<globset>".to_string(),
            message: e.to_string(),
        })?;

        Ok(Self { patterns, set })
    }

    /// A target matching every file
    pub fn any() -> Self {
        Self::new(&[]).unwrap_or_else(|_| unreachable!("`**` is a valid glob"))
    }

    pub fn matches(&self, file: &FileId) -> bool {
        self.set.is_match(file.as_str())
    }

    pub fn patterns(&self) -> &[GlobPattern] {
        &self.patterns
    }
}

impl fmt::Debug for TargetPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.patterns.iter()).finish()
    }
}

/// A registered validation rule
///
/// Rules are immutable. The evaluator stored here is already wrapped with
/// panic isolation and timing, so the scheduler calls it directly.
#[derive(Clone)]
pub struct Rule {
    id: RuleId,
    description: String,
    severity: Severity,
    target: TargetPattern,
    kind_name: &'static str,
    evaluator: Evaluator,
}

impl Rule {
    /// Build a rule, composing the instrumentation wrapper around its check
    pub fn new(
        id: RuleId,
        description: impl Into<String>,
        severity: Severity,
        target: TargetPattern,
        kind: RuleKind,
    ) -> Self {
        let kind_name = kind.name();
        let evaluator = instrument(&id, kind.into_evaluator(&id));
        Self {
            id,
            description: description.into(),
            severity,
            target,
            kind_name,
            evaluator,
        }
    }

    /// Convenience constructor for in-process predicates
    pub fn custom<F>(id: RuleId, severity: Severity, target: TargetPattern, check: F) -> Self
    where
        F: Fn(&[u8]) -> Result<CheckOutcome, ValidationFault> + Send + Sync + 'static,
    {
        let description = format!("custom rule {}", id);
        Self::new(id, description, severity, target, RuleKind::Custom(Arc::new(check)))
    }

    pub fn id(&self) -> &RuleId {
        &self.id
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn target(&self) -> &TargetPattern {
        &self.target
    }

    pub fn kind_name(&self) -> &'static str {
        self.kind_name
    }

    pub fn applies_to(&self, file: &FileId) -> bool {
        self.target.matches(file)
    }

    /// Evaluate the rule against raw file content
    pub fn check(&self, content: &[u8]) -> Result<CheckOutcome, ValidationFault> {
        self.evaluate(&FileContent::new(content.to_vec()))
    }

    /// Evaluate the rule against content shared with other rules
    pub fn evaluate(&self, content: &FileContent) -> Result<CheckOutcome, ValidationFault> {
        (self.evaluator)(content)
    }

    /// Copy of this rule with a different severity
    pub fn with_severity(&self, severity: Severity) -> Self {
        Self {
            severity,
            ..self.clone()
        }
    }
}

impl fmt::Debug for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rule")
            .field("id", &self.id)
            .field("severity", &self.severity)
            .field("target", &self.target)
            .field("kind", &self.kind_name)
            .finish()
    }
}

/// Wrap an evaluator with panic isolation and a timing trace event
fn instrument(id: &RuleId, inner: Evaluator) -> Evaluator {
    let id = id.to_string();
    Arc::new(move |content: &FileContent| {
        let started = Instant::now();
        let result = catch_unwind(AssertUnwindSafe(|| inner(content))).unwrap_or_else(|panic| {
            Err(ValidationFault::new(id.clone(), panic_message(panic.as_ref())))
        });
        tracing::trace!(
            rule = %id,
            elapsed_us = started.elapsed().as_micros() as u64,
            "rule evaluated"
        );
        result
    })
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("rule panicked: {}", s)
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("rule panicked: {}", s)
    } else {
        "rule panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule_id(id: &str) -> RuleId {
        RuleId::new(id).unwrap()
    }

    #[test]
    fn test_non_empty_rule() {
        let rule = Rule::new(
            rule_id("non-empty"),
            "File must not be empty",
            Severity::Error,
            TargetPattern::any(),
            RuleKind::NonEmpty,
        );

        assert!(rule.check(b"hello").unwrap().valid);
        let outcome = rule.check(b"").unwrap();
        assert!(!outcome.valid);
        assert!(outcome.message.unwrap().contains("non-empty"));
    }

    #[test]
    fn test_regex_rule_modes() {
        let forbid = Rule::new(
            rule_id("no-latest"),
            "Pin image tags",
            Severity::Warning,
            TargetPattern::any(),
            RuleKind::Regex {
                pattern: Regex::new(":latest").unwrap(),
                mode: MatchMode::Forbid,
            },
        );
        assert!(forbid.check(b"image: nginx:1.25").unwrap().valid);
        assert!(!forbid.check(b"image: nginx:latest").unwrap().valid);

        let require = Rule::new(
            rule_id("has-service"),
            "Must declare a service",
            Severity::Error,
            TargetPattern::any(),
            RuleKind::Regex {
                pattern: Regex::new("(?m)^service:").unwrap(),
                mode: MatchMode::Require,
            },
        );
        assert!(require.check(b"service: api\n").unwrap().valid);
        assert!(!require.check(b"name: api\n").unwrap().valid);
    }

    #[test]
    fn test_custom_rule_fault_is_returned() {
        let rule = Rule::custom(rule_id("broken"), Severity::Error, TargetPattern::any(), |_| {
            Err(ValidationFault::new("broken", "backend unavailable"))
        });
        let err = rule.check(b"x").unwrap_err();
        assert_eq!(err.message, "backend unavailable");
    }

    #[test]
    fn test_panicking_rule_becomes_fault() {
        let rule = Rule::custom(rule_id("explode"), Severity::Error, TargetPattern::any(), |_| {
            panic!("boom")
        });
        let err = rule.check(b"x").unwrap_err();
        assert_eq!(err.rule, "explode");
        assert!(err.message.contains("boom"));
    }

    #[test]
    fn test_target_pattern_matching() {
        let target = TargetPattern::new(&[GlobPattern::new("**/*.yaml")]).unwrap();
        assert!(target.matches(&FileId::new("svc/api.yaml")));
        assert!(target.matches(&FileId::new("api.yaml")));
        assert!(!target.matches(&FileId::new("api.json")));

        assert!(TargetPattern::any().matches(&FileId::new("anything/at/all.txt")));
    }

    #[test]
    fn test_invalid_target_pattern() {
        let result = TargetPattern::new(&[GlobPattern::new("a[")]);
        assert!(matches!(result, Err(RuleError::InvalidPattern { .. })));
    }

    #[test]
    fn test_with_severity_keeps_identity() {
        let rule = Rule::new(
            rule_id("non-empty"),
            "File must not be empty",
            Severity::Error,
            TargetPattern::any(),
            RuleKind::NonEmpty,
        );
        let downgraded = rule.with_severity(Severity::Info);
        assert_eq!(downgraded.id(), rule.id());
        assert_eq!(downgraded.severity(), Severity::Info);
        assert!(!downgraded.check(b"").unwrap().valid);
    }

    #[test]
    fn test_file_content_parses_manifest_once() {
        let content = FileContent::new(b"service: api\nreplicas: 2\n".to_vec());
        let first = content.manifest().unwrap();
        let second = content.manifest().unwrap();
        assert!(std::ptr::eq(first, second));
        assert_eq!(first.len(), 2);

        let broken = FileContent::new(b"service: [unclosed".to_vec());
        assert!(broken.manifest().unwrap_err().starts_with("YAML parse error"));
    }

    #[test]
    fn test_custom_rule_sees_raw_bytes() {
        let rule = Rule::custom(rule_id("len"), Severity::Info, TargetPattern::any(), |bytes| {
            Ok(if bytes.len() == 3 {
                CheckOutcome::pass()
            } else {
                CheckOutcome::fail("wrong length")
            })
        });
        assert!(rule.evaluate(&FileContent::new(b"abc".to_vec())).unwrap().valid);
        assert!(!rule.check(b"abcd").unwrap().valid);
    }

    #[test]
    fn test_rule_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<Rule>();
        assert_sync::<Rule>();
        assert_send::<FileContent>();
        assert_sync::<FileContent>();
    }
}
