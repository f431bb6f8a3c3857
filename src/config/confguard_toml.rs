//! Parsing and validation for confguard.toml configuration files

use crate::error::ConfigError;
use crate::rules::KeyCase;
use crate::types::{GlobPattern, RuleId, Severity};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file name looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "confguard.toml";

/// Main configuration struct for confguard.toml
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Engine metadata and tuning
    #[serde(default)]
    pub confguard: ConfguardMeta,

    /// Storage backend configuration
    #[serde(default)]
    pub storage: StorageConfig,

    /// Rule configuration
    #[serde(default)]
    pub rules: RulesConfig,

    /// Output configuration
    #[serde(default)]
    pub output: OutputConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Load configuration from `path`, falling back to defaults when the
    /// file does not exist
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            tracing::debug!(path = %path.display(), "no configuration file, using defaults");
            Ok(Self::default())
        }
    }

    /// Parse configuration from a TOML string
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.confguard.version != "1" {
            return Err(ConfigError::Validation(format!(
                "Unsupported configuration version '{}'. Expected '1'",
                self.confguard.version
            )));
        }

        if self.confguard.concurrency == 0 {
            return Err(ConfigError::Validation(
                "concurrency must be greater than zero".to_string(),
            ));
        }

        for pattern in self.storage.include.iter().chain(&self.storage.exclude) {
            globset::Glob::new(pattern.as_str()).map_err(|e| {
                ConfigError::Validation(format!(
                    "Invalid storage glob pattern '{}': {}",
                    pattern.as_str(),
                    e
                ))
            })?;
        }

        self.rules.settings.validate()
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.confguard.grace_period_ms)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.confguard.debounce_ms)
    }

    /// Limit for validating a single file; `None` when disabled
    pub fn task_timeout(&self) -> Option<Duration> {
        match self.confguard.task_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }
}

/// `[confguard]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfguardMeta {
    /// Configuration version (must be "1")
    pub version: String,

    /// Maximum number of files validated at once
    pub concurrency: usize,

    /// How long in-flight tasks may run after cancellation
    pub grace_period_ms: u64,

    /// Quiet period before a watch batch fires
    pub debounce_ms: u64,

    /// Limit for validating a single file, 0 disables it
    pub task_timeout_ms: u64,
}

impl Default for ConfguardMeta {
    fn default() -> Self {
        Self {
            version: "1".to_string(),
            concurrency: 8,
            grace_period_ms: 2000,
            debounce_ms: 250,
            task_timeout_ms: 30_000,
        }
    }
}

/// `[storage]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    #[serde(rename = "type")]
    pub kind: StorageKind,

    /// File patterns to include
    pub include: Vec<GlobPattern>,

    /// File patterns to exclude
    pub exclude: Vec<GlobPattern>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            kind: StorageKind::Local,
            include: vec![GlobPattern::new("**/*.yaml"), GlobPattern::new("**/*.yml")],
            exclude: Vec::new(),
        }
    }
}

/// Storage backends selectable from configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    #[default]
    Local,
}

/// `[rules]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RulesConfig {
    /// Register the built-in manifest checks
    pub builtin: bool,

    /// Directory holding rule plugin definitions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plugins: Option<PathBuf>,

    /// Parameters of the built-in manifest checks
    pub settings: ManifestSettings,

    /// Per-rule enable/disable and severity overrides
    pub overrides: HashMap<RuleId, RuleOverride>,
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            builtin: true,
            plugins: None,
            settings: ManifestSettings::default(),
            overrides: HashMap::new(),
        }
    }
}

/// A rule can be toggled with a boolean or configured with settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RuleOverride {
    /// Simple boolean enable/disable
    Enabled(bool),
    /// Settings table for the rule
    Settings(RuleSettings),
}

/// Settings for individual rules
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleSettings {
    /// Severity level for this rule
    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
}

/// `[rules.settings]`: parameters of the built-in manifest checks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ManifestSettings {
    pub replicas_min: i64,
    pub replicas_max: i64,
    pub image_pattern: String,
    pub required_fields: Vec<String>,
    pub env_key_case: KeyCase,
    pub forbidden_database_name: String,
}

impl Default for ManifestSettings {
    fn default() -> Self {
        Self {
            replicas_min: 1,
            replicas_max: 50,
            image_pattern:
                r"^(?P<registry>[\w.-]+(?::\d+)?)/(?P<service>[\w.-]+):(?P<version>[\w.-]+)$"
                    .to_string(),
            required_fields: vec![
                "service".to_string(),
                "image".to_string(),
                "replicas".to_string(),
            ],
            env_key_case: KeyCase::Upper,
            forbidden_database_name: "test".to_string(),
        }
    }
}

impl ManifestSettings {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.replicas_min > self.replicas_max {
            return Err(ConfigError::Validation(format!(
                "replicas_min ({}) must not exceed replicas_max ({})",
                self.replicas_min, self.replicas_max
            )));
        }

        regex::Regex::new(&self.image_pattern).map_err(|e| {
            ConfigError::Validation(format!("Invalid image_pattern: {}", e))
        })?;

        Ok(())
    }
}

/// `[output]` section
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutputConfig {
    /// NDJSON stream every run is appended to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ndjson: Option<PathBuf>,

    /// JSON report overwritten after every run
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<PathBuf>,

    /// Color output setting
    pub color: ColorOption,
}

/// Color output options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ColorOption {
    /// Auto-detect based on terminal capabilities
    #[default]
    Auto,
    /// Always use color
    Always,
    /// Never use color
    Never,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const VALID_CONFIG: &str = r#"
[confguard]
version = "1"
concurrency = 4
grace_period_ms = 500
debounce_ms = 100
task_timeout_ms = 0

[storage]
type = "local"
include = ["services/**/*.yaml"]
exclude = ["**/vendor/**"]

[rules]
builtin = true
plugins = "rules"

[rules.settings]
replicas_min = 2
replicas_max = 20
env_key_case = "lowercase"

[rules.overrides]
replicas-range-1-10 = false
env-key-case = { severity = "info" }

[output]
ndjson = "reports/stream.ndjson"
color = "never"
"#;

    #[test]
    fn test_valid_config_parsing() {
        let config = Config::parse(VALID_CONFIG).unwrap();

        assert_eq!(config.confguard.concurrency, 4);
        assert_eq!(config.grace_period(), Duration::from_millis(500));
        assert_eq!(config.debounce(), Duration::from_millis(100));
        assert_eq!(config.task_timeout(), None);

        assert_eq!(config.storage.kind, StorageKind::Local);
        assert_eq!(config.storage.include.len(), 1);
        assert_eq!(config.storage.exclude.len(), 1);

        assert!(config.rules.builtin);
        assert_eq!(config.rules.plugins, Some(PathBuf::from("rules")));
        assert_eq!(config.rules.settings.replicas_min, 2);
        assert_eq!(config.rules.settings.replicas_max, 20);
        assert_eq!(config.rules.settings.env_key_case, KeyCase::Lower);
        // Unset settings keep their defaults
        assert_eq!(config.rules.settings.forbidden_database_name, "test");

        assert_eq!(
            config
                .rules
                .overrides
                .get(&RuleId::new("replicas-range-1-10").unwrap()),
            Some(&RuleOverride::Enabled(false))
        );
        match config
            .rules
            .overrides
            .get(&RuleId::new("env-key-case").unwrap())
        {
            Some(RuleOverride::Settings(settings)) => {
                assert_eq!(settings.severity, Some(Severity::Info));
            }
            _ => panic!("Expected settings for env-key-case"),
        }

        assert_eq!(
            config.output.ndjson,
            Some(PathBuf::from("reports/stream.ndjson"))
        );
        assert_eq!(config.output.color, ColorOption::Never);
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.confguard.concurrency, 8);
        assert_eq!(config.debounce(), Duration::from_millis(250));
        assert_eq!(config.task_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(config.rules.settings.required_fields.len(), 3);
    }

    #[test]
    fn test_unsupported_version() {
        let result = Config::parse("[confguard]\nversion = \"2\"\n");
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let result = Config::parse("[confguard]\nconcurrency = 0\n");
        match result {
            Err(ConfigError::Validation(msg)) => assert!(msg.contains("concurrency")),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_inverted_replicas_bounds_rejected() {
        let result = Config::parse("[rules.settings]\nreplicas_min = 9\nreplicas_max = 3\n");
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_invalid_image_pattern_rejected() {
        let result = Config::parse("[rules.settings]\nimage_pattern = \"(\"\n");
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_invalid_storage_glob_rejected() {
        let result = Config::parse("[storage]\ninclude = [\"a[\"]\n");
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_unknown_section_rejected() {
        let result = Config::parse("[validator]\nversion = \"1\"\n");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_invalid_override_id_rejected() {
        let result = Config::parse("[rules.overrides]\n\"bad id\" = false\n");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config::load_or_default(temp_dir.path().join("confguard.toml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join(DEFAULT_CONFIG_FILE);
        fs::write(&path, VALID_CONFIG).unwrap();

        let config = Config::load_or_default(&path).unwrap();
        assert_eq!(config.confguard.concurrency, 4);
    }
}
