//! `snipcheck` binary entry point.

use std::process;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use snipcheck::cli::{self, SnipcheckArgs};

fn main() {
    let args = SnipcheckArgs::parse();

    let level = match args.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    process::exit(cli::run(args));
}
