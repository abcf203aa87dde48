//! CLI definitions using clap.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;

/// kiln - an incremental build engine for C/C++ projects
#[derive(Parser)]
#[command(name = "kiln")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Build the project described by Kiln.toml
    Build(BuildArgs),

    /// Remove build artifacts
    Clean(CleanArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum MessageFormat {
    /// Status lines on stderr
    Human,
    /// One JSON event per line on stdout
    Json,
}

#[derive(Args)]
pub struct BuildArgs {
    /// C++ compiler to use instead of auto-detection
    #[arg(long, value_name = "PATH")]
    pub cxx: Option<PathBuf>,

    /// Archiver to use instead of auto-detection
    #[arg(long, value_name = "PATH")]
    pub ar: Option<PathBuf>,

    /// Extra flag passed to every compile (repeatable)
    #[arg(long = "cxxflag", value_name = "FLAG", allow_hyphen_values = true)]
    pub cxxflags: Vec<String>,

    /// Force colored compiler diagnostics
    #[arg(long, value_name = "BOOL", num_args = 0..=1, default_missing_value = "true")]
    pub use_color: Option<bool>,

    /// Build in release mode
    #[arg(short, long)]
    pub release: bool,

    /// Number of parallel jobs
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Specific targets to build
    #[arg(long)]
    pub target: Vec<String>,

    /// Print the build plan as JSON (no build)
    #[arg(long)]
    pub plan: bool,

    /// Output format for build messages
    #[arg(long, value_enum, default_value = "human")]
    pub message_format: MessageFormat,

    /// Path to Kiln.toml
    #[arg(long, value_name = "PATH")]
    pub manifest_path: Option<PathBuf>,
}

#[derive(Args)]
pub struct CleanArgs {
    /// Only remove release outputs
    #[arg(long, conflicts_with = "debug")]
    pub release: bool,

    /// Only remove debug outputs
    #[arg(long)]
    pub debug: bool,

    /// Path to Kiln.toml
    #[arg(long, value_name = "PATH")]
    pub manifest_path: Option<PathBuf>,
}

#[derive(Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,
}
