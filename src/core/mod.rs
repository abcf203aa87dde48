//! Core data structures for kiln.
//!
//! This module contains the declared side of a build:
//! - Targets and the artifacts they produce
//! - Platform rules and the tags they are evaluated against
//! - The Kiln.toml manifest

pub mod manifest;
pub mod platform;
pub mod target;

pub use manifest::{find_manifest, Manifest, MANIFEST_NAME};
pub use platform::{Mode, PlatformRule, PlatformTags, RuleEffect, RuleSet};
pub use target::{
    ExecutableArtifact, GeneratedArtifact, GenerationSpec, LibraryArtifact, TargetKind, TargetSpec,
};
