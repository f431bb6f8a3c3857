//! CLI argument parsing and command dispatch

pub mod args;
pub mod common;
pub mod list;
pub mod validate;

// Re-export types for convenient access
pub use args::{Cli, ColorChoice};
pub use common::init_logging;

/// Dispatch a parsed command line and return the process exit code
pub fn run(cli: &Cli) -> i32 {
    if cli.list_rules {
        list::run_list(cli)
    } else {
        validate::run_validate(cli)
    }
}
