//! confguard CLI entry point

use clap::Parser;
use confguard::cli::{self, Cli};
use std::process;

fn main() {
    let cli = Cli::parse();
    cli::init_logging(cli.verbose);
    process::exit(cli::run(&cli));
}
