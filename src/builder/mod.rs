//! C/C++ build engine.
//!
//! This module implements the toolchain abstraction, cached generation
//! steps, graph assembly and the parallel executor.

pub mod cache;
pub mod context;
pub mod error;
pub mod events;
pub mod executor;
pub mod fingerprint;
pub mod generate;
pub mod graph;
pub mod native;
pub mod record;
pub mod toolchain;

pub use cache::{CacheEntry, CacheStore, JsonCacheStore, MemoryCacheStore};
pub use context::{configure, BuildContext, ToolchainOptions};
pub use error::BuildError;
pub use events::BuildEvent;
pub use executor::{BuildExecutor, BuildObserver, BuildReport, TargetOutcome, TargetReport};
pub use generate::{GenerationStep, Generator};
pub use graph::{BuildGraph, BuildPlan};
pub use native::NativeBuilder;
pub use record::{BuildRecord, NodeArtifact};
pub use toolchain::{detect_toolchain, CommandSpec, GccToolchain, Toolchain, ToolchainFamily};
