//! Shared utilities

pub mod config;
pub mod fs;
pub mod hash;
pub mod process;

pub use config::Config;
pub use fs::PathSet;
pub use process::{find_program, run, CommandRunner, CommandSpec, CompletedProcess, SystemRunner};
