//! Configuration file parsing and validation

pub mod confguard_toml;

pub use confguard_toml::{
    ColorOption, Config, ConfguardMeta, DEFAULT_CONFIG_FILE, ManifestSettings, OutputConfig,
    RuleOverride, RuleSettings, RulesConfig, StorageConfig, StorageKind,
};
