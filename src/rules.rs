#![forbid(unsafe_code)]

//! Rule definitions, built-in checks, plugin loading and the registry

pub mod builtin;
pub mod plugin;
pub mod registry;
mod rule;

// Re-export core types
pub use builtin::{KeyCase, MANIFEST_TARGETS, YamlCheck, builtin_rules};
pub use plugin::{discover_plugins, load_plugin, parse_plugin};
pub use registry::{PluginReport, RuleRegistry, SharedRegistry};
pub use rule::{
    CheckOutcome, FileContent, MatchMode, Predicate, Rule, RuleKind, TargetPattern,
};
