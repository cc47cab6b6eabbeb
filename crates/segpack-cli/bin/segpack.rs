//! segpack binary entry point.
//!
//! Thin wrapper around the segpack-cli library that:
//! 1. Initializes logging
//! 2. Parses command-line arguments
//! 3. Runs the requested command against standard output

use anyhow::Result;
use clap::Parser;
use segpack_cli::Cli;
use std::io::Write;

fn main() -> Result<()> {
    // Logs go to stderr so `cat` output stays clean
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    segpack_cli::run(&cli, &mut out)?;
    out.flush()?;

    Ok(())
}
