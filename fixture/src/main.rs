//! Fixture runner.
//!
//! Runs the built-in self-test suite. Defaults come from `fixture.toml`;
//! everything after the runner's own flags is handed to the fixture argument
//! parser (`-v`, `-g <group>`, `-n <name>`, `-r [count]`).

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use fixture::exit_codes;
use fixture::fixture::run_main;
use fixture::io::config::load_config;
use fixture::io::sink::StdoutSink;
use fixture::logging;
use fixture::selftest;
use tracing::warn;

#[derive(Parser, Debug)]
#[command(
    name = "fixture",
    version,
    about = "Run the fixture self-test suite"
)]
struct Cli {
    /// Path to the runner config file.
    #[arg(long, default_value = "fixture.toml")]
    config: PathBuf,

    /// Fixture arguments: -v, -g <group>, -n <name>, -r [count].
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    fixture_args: Vec<String>,
}

fn main() {
    if let Err(err) = logging::init() {
        eprintln!("warning: {err:#}");
    }
    match run() {
        Ok(failures) => std::process::exit(exit_codes::for_failures(failures)),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<u32> {
    let cli = Cli::parse();
    let cfg = load_config(&cli.config)?;
    let mut ctx = cfg.build_context(Box::new(StdoutSink::new()));
    let failures = run_main(&mut ctx, &selftest::registry(), &cli.fixture_args)?;
    if failures > 0 {
        warn!(failures, "self-test suite reported failures");
    }
    Ok(failures)
}
