#![forbid(unsafe_code)]

//! TOML rule plugin definitions
//!
//! A plugin is one `.toml` file describing one rule. The `[check]` table
//! selects one of the known check kinds; anything else is rejected while
//! parsing, before the rule can reach the registry.
//!
//! ```toml
//! [rule]
//! id = "no-latest-tag"
//! description = "Images must be pinned"
//! severity = "error"
//! target = ["**/*.yaml"]
//!
//! [check]
//! kind = "regex"
//! pattern = ":latest"
//! mode = "forbid"
//! ```

use crate::error::RuleError;
use crate::rules::builtin::{KeyCase, YamlCheck};
use crate::rules::{MatchMode, Rule, RuleKind, TargetPattern};
use crate::types::{GlobPattern, RuleId, Severity};
use regex::Regex;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PluginDefinition {
    rule: RuleSection,
    check: CheckSection,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RuleSection {
    id: String,
    #[serde(default)]
    description: String,
    severity: Severity,
    #[serde(default)]
    target: Vec<GlobPattern>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case", deny_unknown_fields)]
enum CheckSection {
    NonEmpty,
    Regex {
        pattern: String,
        #[serde(default = "default_mode")]
        mode: MatchMode,
    },
    RequiredKeys {
        keys: Vec<String>,
    },
    ReplicasRange {
        min: i64,
        max: i64,
    },
    ImageFormat {
        pattern: String,
    },
    EnvKeyCase {
        case: KeyCase,
    },
    ServiceName,
    EnvValues,
    ForbiddenDatabase {
        name: String,
    },
}

fn default_mode() -> MatchMode {
    MatchMode::Forbid
}

/// Parse a rule from plugin TOML content
///
/// # Errors
///
/// Returns `RuleError::InvalidDefinition` if the TOML is malformed, the id
/// is invalid, or the check section is inconsistent, and
/// `RuleError::InvalidPattern` if a regex or glob does not compile.
pub fn parse_plugin(content: &str) -> Result<Rule, RuleError> {
    let def: PluginDefinition = toml::from_str(content)
        .map_err(|e| RuleError::InvalidDefinition(format!("Failed to parse TOML: {}", e)))?;

    let id = RuleId::new(def.rule.id.clone()).ok_or_else(|| {
        RuleError::InvalidDefinition(format!("Invalid rule ID: '{}'", def.rule.id))
    })?;

    let target = TargetPattern::new(&def.rule.target)?;

    let kind = match def.check {
        CheckSection::NonEmpty => RuleKind::NonEmpty,
        CheckSection::Regex { pattern, mode } => RuleKind::Regex {
            pattern: compile(&pattern)?,
            mode,
        },
        CheckSection::RequiredKeys { keys } => {
            if keys.is_empty() {
                return Err(RuleError::InvalidDefinition(
                    "required-keys check needs at least one key".to_string(),
                ));
            }
            RuleKind::Yaml(YamlCheck::RequiredKeys(keys))
        }
        CheckSection::ReplicasRange { min, max } => {
            if min > max {
                return Err(RuleError::InvalidDefinition(format!(
                    "replicas-range min ({}) is greater than max ({})",
                    min, max
                )));
            }
            RuleKind::Yaml(YamlCheck::ReplicasRange { min, max })
        }
        CheckSection::ImageFormat { pattern } => {
            RuleKind::Yaml(YamlCheck::ImageFormat(compile(&pattern)?))
        }
        CheckSection::EnvKeyCase { case } => RuleKind::Yaml(YamlCheck::EnvKeyCase(case)),
        CheckSection::ServiceName => RuleKind::Yaml(YamlCheck::ServiceName),
        CheckSection::EnvValues => RuleKind::Yaml(YamlCheck::EnvValues),
        CheckSection::ForbiddenDatabase { name } => {
            RuleKind::Yaml(YamlCheck::ForbiddenDatabase(name))
        }
    };

    let description = if def.rule.description.is_empty() {
        format!("{} check", kind.name())
    } else {
        def.rule.description
    };

    Ok(Rule::new(id, description, def.rule.severity, target, kind))
}

/// Parse a rule from a plugin file
///
/// Every failure is reported as `RuleError::RuleLoad` naming the file.
pub fn load_plugin(path: &Path) -> Result<Rule, RuleError> {
    let content = fs::read_to_string(path).map_err(|e| RuleError::RuleLoad {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    parse_plugin(&content).map_err(|e| RuleError::RuleLoad {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

/// List plugin files in a directory, sorted by file name
///
/// Only regular `.toml` files directly inside `dir` are returned. A missing
/// directory yields an empty list.
pub fn discover_plugins(dir: &Path) -> Result<Vec<PathBuf>, RuleError> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let entries = fs::read_dir(dir).map_err(|e| RuleError::RuleLoad {
        path: dir.to_path_buf(),
        message: format!("failed to read plugin directory: {}", e),
    })?;

    let mut paths = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| RuleError::RuleLoad {
            path: dir.to_path_buf(),
            message: format!("failed to read directory entry: {}", e),
        })?;
        let path = entry.path();
        if path.is_file() && path.extension().and_then(|s| s.to_str()) == Some("toml") {
            paths.push(path);
        }
    }

    paths.sort();
    Ok(paths)
}

fn compile(pattern: &str) -> Result<Regex, RuleError> {
    Regex::new(pattern).map_err(|e| RuleError::InvalidPattern {
        pattern: pattern.to_string(),
        message: e.to_string(),
    })
}
