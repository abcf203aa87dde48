//! kiln - an incremental, dependency-aware build engine for C/C++ projects
//!
//! This crate provides the core library functionality for kiln: the
//! manifest model, toolchain configuration, cached generation steps, graph
//! assembly and the parallel executor.

pub mod builder;
pub mod core;
pub mod ops;
pub mod util;

/// Test utilities and mocks for kiln unit tests.
///
/// This module is only available when compiling with `--cfg test` or
/// running tests. It provides a mock command runner and project fixtures.
#[cfg(test)]
pub mod test_support;

pub use builder::{BuildError, BuildPlan, BuildReport};
pub use core::{
    manifest::Manifest,
    target::{TargetKind, TargetSpec},
};
