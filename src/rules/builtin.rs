#![forbid(unsafe_code)]

//! Built-in service manifest rules
//!
//! These rules understand a small YAML service manifest shape:
//!
//! ```yaml
//! service: user-api
//! replicas: 3
//! image: registry.example.com/user-api:1.4.2
//! env:
//!   DATABASE_URL: postgres://db:5432/users
//! ```
//!
//! A document that is a list of mappings is merged into a single mapping
//! before the checks run. Each check is parameterised by [`ManifestSettings`].

use crate::config::ManifestSettings;
use crate::error::RuleError;
use crate::rules::{CheckOutcome, FileContent, Rule, RuleKind, TargetPattern};
use crate::types::{GlobPattern, RuleId, Severity};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};

/// Target globs shared by every built-in rule
pub const MANIFEST_TARGETS: &[&str] = &["**/*.yaml", "**/*.yml"];

/// Expected casing of `env` keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyCase {
    #[serde(rename = "UPPERCASE")]
    Upper,
    #[serde(rename = "lowercase")]
    Lower,
}

/// A structural check over a parsed YAML manifest
#[derive(Debug, Clone)]
pub enum YamlCheck {
    RequiredKeys(Vec<String>),
    ReplicasRange { min: i64, max: i64 },
    ImageFormat(Regex),
    EnvKeyCase(KeyCase),
    ServiceName,
    EnvValues,
    ForbiddenDatabase(String),
}

impl YamlCheck {
    pub fn name(&self) -> &'static str {
        match self {
            YamlCheck::RequiredKeys(_) => "required-keys",
            YamlCheck::ReplicasRange { .. } => "replicas-range",
            YamlCheck::ImageFormat(_) => "image-format",
            YamlCheck::EnvKeyCase(_) => "env-key-case",
            YamlCheck::ServiceName => "service-name",
            YamlCheck::EnvValues => "env-values",
            YamlCheck::ForbiddenDatabase(_) => "forbidden-database",
        }
    }

    /// Run the check over the manifest view of `content`
    ///
    /// Unparseable content is reported as invalid rather than as a fault:
    /// a broken manifest is a property of the file, not of the rule.
    pub fn evaluate(&self, content: &FileContent) -> CheckOutcome {
        match content.manifest() {
            Ok(doc) => self.check(doc),
            Err(message) => CheckOutcome::fail(message),
        }
    }

    fn check(&self, doc: &Mapping) -> CheckOutcome {
        match self {
            YamlCheck::RequiredKeys(required) => {
                let mut missing: Vec<&str> = required
                    .iter()
                    .filter(|key| !doc.contains_key(key.as_str()))
                    .map(|key| key.as_str())
                    .collect();
                missing.sort_unstable();
                if missing.is_empty() {
                    CheckOutcome::pass()
                } else {
                    CheckOutcome::fail(format!("Missing required keys: [{}]", missing.join(", ")))
                }
            }
            YamlCheck::ReplicasRange { min, max } => {
                let replicas = doc.get("replicas").and_then(Value::as_i64);
                match replicas {
                    Some(n) if (*min..=*max).contains(&n) => CheckOutcome::pass(),
                    _ => CheckOutcome::fail(format!(
                        "replicas must be an integer between {} and {}",
                        min, max
                    )),
                }
            }
            YamlCheck::ImageFormat(pattern) => {
                let Some(image) = doc.get("image").and_then(Value::as_str) else {
                    return CheckOutcome::fail(
                        "image must be a string like registry/service:version",
                    );
                };
                match pattern.captures(image) {
                    None => CheckOutcome::fail("image must match <registry>/<service>:<version>"),
                    Some(captures) => match captures.name("registry") {
                        Some(registry) => CheckOutcome::pass().with_registry(registry.as_str()),
                        None => CheckOutcome::pass(),
                    },
                }
            }
            YamlCheck::EnvKeyCase(case) => {
                let Some(env) = doc.get("env").and_then(Value::as_mapping) else {
                    return CheckOutcome::pass();
                };
                let mut bad: Vec<String> = env
                    .keys()
                    .filter(|key| !key.as_str().is_some_and(|k| has_case(k, *case)))
                    .map(key_label)
                    .collect();
                bad.sort();
                if bad.is_empty() {
                    CheckOutcome::pass()
                } else {
                    let label = match case {
                        KeyCase::Upper => "UPPERCASE",
                        KeyCase::Lower => "lowercase",
                    };
                    CheckOutcome::fail(format!("env keys must be {}: [{}]", label, bad.join(", ")))
                }
            }
            YamlCheck::ServiceName => match doc.get("service").and_then(Value::as_str) {
                Some(name) if !name.trim().is_empty() => CheckOutcome::pass(),
                _ => CheckOutcome::fail("service name must be a non-empty string"),
            },
            YamlCheck::EnvValues => {
                let Some(env) = doc.get("env").and_then(Value::as_mapping) else {
                    return CheckOutcome::pass();
                };
                let mut bad: Vec<String> = env
                    .iter()
                    .filter(|(_, value)| !value.as_str().is_some_and(|v| !v.trim().is_empty()))
                    .map(|(key, _)| key_label(key))
                    .collect();
                bad.sort();
                if bad.is_empty() {
                    CheckOutcome::pass()
                } else {
                    CheckOutcome::fail(format!(
                        "env values must be non-empty strings: [{}]",
                        bad.join(", ")
                    ))
                }
            }
            YamlCheck::ForbiddenDatabase(forbidden) => {
                let Some(env) = doc.get("env").and_then(Value::as_mapping) else {
                    return CheckOutcome::pass();
                };
                let hit = env.iter().any(|(key, value)| {
                    key.as_str().is_some_and(|k| k.trim() == "DATABASE_URL")
                        && value.as_str().is_some_and(|v| v.trim() == forbidden)
                });
                if hit {
                    CheckOutcome::fail(format!(
                        "Database name cannot be '{}': [DATABASE_URL]",
                        forbidden
                    ))
                } else {
                    CheckOutcome::pass()
                }
            }
        }
    }
}

fn has_case(key: &str, case: KeyCase) -> bool {
    let cased = key.chars().any(char::is_alphabetic);
    match case {
        KeyCase::Upper => cased && !key.chars().any(char::is_lowercase),
        KeyCase::Lower => cased && !key.chars().any(char::is_uppercase),
    }
}

fn key_label(key: &Value) -> String {
    match key {
        Value::String(s) => s.clone(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim().to_string())
            .unwrap_or_else(|_| "<key>".to_string()),
    }
}

/// Parse manifest content into a single mapping
pub(crate) fn parse_manifest(content: &[u8]) -> Result<Mapping, String> {
    let value: Value =
        serde_yaml::from_slice(content).map_err(|e| format!("YAML parse error: {}", e))?;
    match value {
        Value::Null => Ok(Mapping::new()),
        Value::Mapping(map) => Ok(map),
        Value::Sequence(items) => {
            let mut merged = Mapping::new();
            for item in items {
                if let Value::Mapping(map) = item {
                    merged.extend(map);
                }
            }
            Ok(merged)
        }
        _ => Err("YAML document must be a mapping".to_string()),
    }
}

/// Build the built-in rule set from manifest settings
///
/// # Errors
///
/// Returns `RuleError::InvalidPattern` if the configured image pattern does
/// not compile.
pub fn builtin_rules(settings: &ManifestSettings) -> Result<Vec<Rule>, RuleError> {
    let image_pattern =
        Regex::new(&settings.image_pattern).map_err(|e| RuleError::InvalidPattern {
            pattern: settings.image_pattern.clone(),
            message: e.to_string(),
        })?;

    let target = TargetPattern::new(
        &MANIFEST_TARGETS
            .iter()
            .map(|g| GlobPattern::new(*g))
            .collect::<Vec<_>>(),
    )?;

    let definitions: Vec<(&str, &str, Severity, YamlCheck)> = vec![
        (
            "required-keys",
            "Manifest declares every required key",
            Severity::Error,
            YamlCheck::RequiredKeys(settings.required_fields.clone()),
        ),
        (
            "replicas-range",
            "Replica count is within the configured range",
            Severity::Error,
            YamlCheck::ReplicasRange {
                min: settings.replicas_min,
                max: settings.replicas_max,
            },
        ),
        (
            "image-format",
            "Image reference is <registry>/<service>:<version>",
            Severity::Error,
            YamlCheck::ImageFormat(image_pattern),
        ),
        (
            "env-key-case",
            "Environment variable names follow the configured case",
            Severity::Warning,
            YamlCheck::EnvKeyCase(settings.env_key_case),
        ),
        (
            "service-name",
            "Service name is a non-empty string",
            Severity::Error,
            YamlCheck::ServiceName,
        ),
        (
            "env-values",
            "Environment variable values are non-empty strings",
            Severity::Error,
            YamlCheck::EnvValues,
        ),
        (
            "forbidden-database",
            "DATABASE_URL does not point at a forbidden database",
            Severity::Error,
            YamlCheck::ForbiddenDatabase(settings.forbidden_database_name.clone()),
        ),
        (
            "replicas-range-1-10",
            "Replica count is between 1 and 10",
            Severity::Warning,
            YamlCheck::ReplicasRange { min: 1, max: 10 },
        ),
    ];

    definitions
        .into_iter()
        .map(|(id, description, severity, check)| {
            let rule_id = RuleId::new(id)
                .ok_or_else(|| RuleError::InvalidDefinition(format!("Invalid rule ID: {}", id)))?;
            Ok(Rule::new(
                rule_id,
                description,
                severity,
                target.clone(),
                RuleKind::Yaml(check),
            ))
        })
        .collect()
}
