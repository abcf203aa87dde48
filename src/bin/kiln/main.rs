//! kiln CLI - an incremental build engine for C/C++ projects

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;
mod commands;

use cli::{Cli, Commands};

fn main() {
    match run() {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Returns `Ok(false)` when the command ran but the build failed; the
/// failures have already been reported.
fn run() -> Result<bool> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("kiln=debug")
    } else {
        EnvFilter::new("kiln=info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();

    match cli.command {
        Commands::Build(args) => commands::build::execute(args, cli.verbose),
        Commands::Clean(args) => commands::clean::execute(args).map(|_| true),
        Commands::Completions(args) => commands::completions::execute(args).map(|_| true),
    }
}
