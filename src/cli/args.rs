//! CLI argument parsing using clap

use crate::config::{ColorOption, Config};
use clap::{Parser, ValueEnum};
use std::num::NonZeroUsize;
use std::path::PathBuf;

/// Color output choice
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ColorChoice {
    /// Automatically detect if terminal supports color
    Auto,
    /// Always use color
    Always,
    /// Never use color
    Never,
}

impl From<ColorChoice> for ColorOption {
    fn from(choice: ColorChoice) -> Self {
        match choice {
            ColorChoice::Auto => ColorOption::Auto,
            ColorChoice::Always => ColorOption::Always,
            ColorChoice::Never => ColorOption::Never,
        }
    }
}

/// confguard CLI main entry point
#[derive(Parser, Debug)]
#[command(name = "confguard")]
#[command(about = "Validate configuration files against pluggable rules")]
#[command(version)]
pub struct Cli {
    /// Directory containing the configuration files to validate
    #[arg(long, default_value = ".")]
    pub path: PathBuf,

    /// Write a JSON report of each run to this file
    #[arg(long)]
    pub report: Option<PathBuf>,

    /// Append every run to this NDJSON stream
    #[arg(long)]
    pub ndjson: Option<PathBuf>,

    /// Configuration file (defaults to confguard.toml if present)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Directory of rule plugin definitions
    #[arg(long)]
    pub rules: Option<PathBuf>,

    /// Maximum number of files validated at once
    #[arg(long)]
    pub concurrency: Option<NonZeroUsize>,

    /// Time limit for validating one file in milliseconds (0 disables)
    #[arg(long)]
    pub task_timeout_ms: Option<u64>,

    /// Override the minimum allowed replicas
    #[arg(long)]
    pub replicas_min: Option<i64>,

    /// Override the maximum allowed replicas
    #[arg(long)]
    pub replicas_max: Option<i64>,

    /// Keep running and revalidate files when they change
    #[arg(long)]
    pub watch: bool,

    /// List the active rules and exit
    #[arg(long)]
    pub list_rules: bool,

    /// Enable debug logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Output coloring
    #[arg(long, default_value = "auto")]
    pub color: ColorChoice,
}

impl Cli {
    /// Apply flag overrides on top of file configuration
    pub fn apply_overrides(&self, config: &mut Config) {
        if let Some(concurrency) = self.concurrency {
            config.confguard.concurrency = concurrency.get();
        }
        if let Some(ms) = self.task_timeout_ms {
            config.confguard.task_timeout_ms = ms;
        }
        if let Some(min) = self.replicas_min {
            config.rules.settings.replicas_min = min;
        }
        if let Some(max) = self.replicas_max {
            config.rules.settings.replicas_max = max;
        }
        if let Some(rules) = &self.rules {
            config.rules.plugins = Some(rules.clone());
        }
        if let Some(ndjson) = &self.ndjson {
            config.output.ndjson = Some(ndjson.clone());
        }
        if let Some(report) = &self.report {
            config.output.report = Some(report.clone());
        }
        if self.color != ColorChoice::Auto {
            config.output.color = self.color.into();
        }
    }
}
