//! High-level operations.
//!
//! This module contains the implementation of kiln commands.

pub mod kiln_build;
pub mod kiln_clean;

pub use kiln_build::{build, build_with_runner, plan, BuildOptions, BuildResult};
pub use kiln_clean::{clean, CleanResult};
