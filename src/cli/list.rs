//! List command implementation
//!
//! `confguard --list-rules` prints every active rule (built-ins, plugins,
//! after overrides) in registration order and exits.

use crate::cli::args::Cli;
use crate::cli::common::{EXIT_ERROR, EXIT_PARSE_ERROR, EXIT_SUCCESS};
use crate::error::{ConfguardError, ConfigError};
use crate::rules::RuleRegistry;
use std::io::{self, Write};

/// Run the list command
///
/// Exit code:
/// - 0: Success
/// - 2: Error
/// - 3: Configuration parse error
pub fn run_list(cli: &Cli) -> i32 {
    match run_list_inner(cli) {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            match e {
                ConfguardError::Config(ConfigError::Parse(_))
                | ConfguardError::Config(ConfigError::Validation(_)) => EXIT_PARSE_ERROR,
                _ => EXIT_ERROR,
            }
        }
    }
}

fn run_list_inner(cli: &Cli) -> Result<(), ConfguardError> {
    let config = super::common::load_config(cli)?;
    let (registry, _plugins) = super::common::build_registry(&config)?;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    write_rules(&mut out, &registry)?;
    Ok(())
}

fn write_rules(out: &mut impl Write, registry: &RuleRegistry) -> io::Result<()> {
    if registry.is_empty() {
        writeln!(out, "No rules are enabled.")?;
        return Ok(());
    }

    let width = registry
        .iter_rules()
        .map(|rule| rule.id().as_str().len())
        .max()
        .unwrap_or(0);

    for rule in registry.iter_rules() {
        let targets: Vec<&str> = rule
            .target()
            .patterns()
            .iter()
            .map(|p| p.as_str())
            .collect();
        writeln!(
            out,
            "{:<width$}  {:<7}  {:<18}  {}  [{}]",
            rule.id().as_str(),
            rule.severity().as_str(),
            rule.kind_name(),
            rule.description(),
            targets.join(", "),
            width = width
        )?;
    }
    writeln!(out)?;
    writeln!(out, "{} rule(s) enabled", registry.len())
}
