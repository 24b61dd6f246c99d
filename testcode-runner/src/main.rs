//! Command-line entry point of testcode
//!
//! Runs the tests of numerical programs described by a userconfig and a
//! jobconfig and checks their output against benchmarks.

use std::error::Error as _;
use std::process;

use anyhow::Result;
use clap::Parser;
use log::LevelFilter;

use testcode_runner::{Cli, Dispatcher, Session};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG takes precedence over -v
    let level = if cli.verbose { LevelFilter::Debug } else { LevelFilter::Warn };
    env_logger::Builder::new().filter_level(level).parse_default_env().init();

    let session = match Session::new(&cli) {
        Ok(session) => session,
        Err(e) => {
            eprintln!("Error initializing session: {}", e);
            print_causes(&e, cli.verbose);
            process::exit(1);
        }
    };

    let dispatcher = Dispatcher::new(session);
    match dispatcher.execute(&cli).await {
        Ok(exit_code) => process::exit(exit_code),
        Err(e) => {
            eprintln!("Error: {}", e);
            print_causes(&e, cli.verbose);
            process::exit(1);
        }
    }
}

/// Show the error chain in verbose mode
fn print_causes(error: &testcode_runner::RunError, verbose: bool) {
    if !verbose {
        return;
    }
    let mut cause = error.source();
    while let Some(err) = cause {
        eprintln!("Caused by: {}", err);
        cause = err.source();
    }
}
