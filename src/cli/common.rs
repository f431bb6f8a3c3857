//! Common helper functions shared across CLI commands
//!
//! This module provides shared functionality for loading configuration,
//! building the rule registry and opening storage.

use crate::cli::args::Cli;
use crate::config::{Config, DEFAULT_CONFIG_FILE};
use crate::error::{ConfigError, RuleError, StorageError};
use crate::rules::{PluginReport, RuleRegistry, builtin_rules};
use crate::storage::LocalStorage;
use std::path::Path;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

/// Exit codes
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_INVALID: i32 = 1;
pub const EXIT_ERROR: i32 = 2;
pub const EXIT_PARSE_ERROR: i32 = 3;
pub const EXIT_CANCELLED: i32 = 4;

/// Install the tracing subscriber
///
/// `RUST_LOG` wins when set; otherwise `--verbose` selects debug output.
/// Logs go to stderr so stdout stays reserved for reports.
pub fn init_logging(verbose: bool) {
    let default = if verbose { "confguard=debug" } else { "confguard=warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    // A subscriber may already be installed when embedded or under test
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

/// Load configuration and apply CLI overrides
///
/// An explicit `--config` must exist; otherwise `confguard.toml` in the
/// working directory is used when present.
///
/// # Errors
///
/// Returns `ConfigError::Io` if an explicit config file cannot be read,
/// `ConfigError::Parse` if it is invalid TOML, and
/// `ConfigError::Validation` if the merged settings are inconsistent.
pub(crate) fn load_config(cli: &Cli) -> Result<Config, ConfigError> {
    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::load_or_default(DEFAULT_CONFIG_FILE)?,
    };
    cli.apply_overrides(&mut config);
    config.validate()?;
    Ok(config)
}

/// Build rule registry from configuration
///
/// This function:
/// 1. Registers the built-in manifest rules (unless disabled)
/// 2. Loads plugin rules from the configured directory (best effort)
/// 3. Applies per-rule overrides
///
/// # Errors
///
/// Returns `RuleError` if a built-in rule cannot be built from the settings.
pub(crate) fn build_registry(config: &Config) -> Result<(RuleRegistry, PluginReport), RuleError> {
    let mut registry = RuleRegistry::new();

    if config.rules.builtin {
        for rule in builtin_rules(&config.rules.settings)? {
            registry.register(rule)?;
        }
    }

    let plugins = match &config.rules.plugins {
        Some(dir) => registry.load_plugins(dir),
        None => PluginReport::default(),
    };
    for warning in &plugins.warnings {
        eprintln!("Warning: {}", warning);
    }

    registry.filter_by_config(&config.rules);
    debug!(rules = registry.len(), "rule registry built");
    Ok((registry, plugins))
}

/// Open the local storage rooted at `path`
pub(crate) fn open_storage(path: &Path, config: &Config) -> Result<LocalStorage, StorageError> {
    if !path.is_dir() {
        warn!(path = %path.display(), "storage root is not a directory");
    }
    LocalStorage::with_patterns(path, &config.storage.include, &config.storage.exclude)
}
