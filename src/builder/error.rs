//! Build failure taxonomy.
//!
//! Every failure carries the target it belongs to and, where an external
//! tool was involved, that tool's output verbatim.

use std::path::PathBuf;

use thiserror::Error;

/// Error produced while configuring, planning, or building targets.
#[derive(Debug, Clone, Error)]
pub enum BuildError {
    /// None of the candidate programs could be found on the search path.
    #[error("program not found (tried: {})", .candidates.join(", "))]
    ProgramNotFound { candidates: Vec<String> },

    /// A single source failed to compile.
    #[error("target `{target}`: failed to compile {}\n{output}", .file.display())]
    CompileError {
        target: String,
        file: PathBuf,
        output: String,
    },

    /// Archiving or linking the target's output failed.
    #[error("target `{target}`: failed to link {}\n{output}", .artifact.display())]
    LinkError {
        target: String,
        artifact: PathBuf,
        output: String,
    },

    /// A code generation command failed or did not produce its outputs.
    #[error("generation step `{step}` failed\n{output}")]
    GenerationError { step: String, output: String },

    /// The target was not attempted because a prerequisite failed.
    #[error("target `{target}` skipped: dependency `{dependency}` failed")]
    DependencyFailed { target: String, dependency: String },

    /// The declared dependency edges form a cycle.
    #[error("dependency cycle detected: {}", .cycle.join(" -> "))]
    CycleDetected { cycle: Vec<String> },

    /// A target names a dependency that was never declared.
    #[error("target `{target}` depends on unknown target `{dependency}`")]
    UnknownDependency { target: String, dependency: String },

    /// A target declaration is malformed.
    #[error("target `{target}`: {reason}")]
    InvalidTarget { target: String, reason: String },

    /// An external program exited unsuccessfully.
    #[error("`{program}` failed with exit code {}\n{output}", .exit_code.map(|c| c.to_string()).unwrap_or_else(|| "(signal)".to_string()))]
    ExecutionError {
        program: String,
        exit_code: Option<i32>,
        output: String,
    },

    /// Filesystem or bookkeeping failure inside the engine.
    #[error("{message}")]
    Io { message: String },
}

impl BuildError {
    /// Stable short name of the failure kind, used in reports and events.
    pub fn kind(&self) -> &'static str {
        match self {
            BuildError::ProgramNotFound { .. } => "program-not-found",
            BuildError::CompileError { .. } => "compile-error",
            BuildError::LinkError { .. } => "link-error",
            BuildError::GenerationError { .. } => "generation-error",
            BuildError::DependencyFailed { .. } => "dependency-failed",
            BuildError::CycleDetected { .. } => "cycle-detected",
            BuildError::UnknownDependency { .. } => "unknown-dependency",
            BuildError::InvalidTarget { .. } => "invalid-target",
            BuildError::ExecutionError { .. } => "execution-error",
            BuildError::Io { .. } => "io-error",
        }
    }

    /// The target this error belongs to, if any.
    pub fn target(&self) -> Option<&str> {
        match self {
            BuildError::CompileError { target, .. }
            | BuildError::LinkError { target, .. }
            | BuildError::DependencyFailed { target, .. }
            | BuildError::UnknownDependency { target, .. }
            | BuildError::InvalidTarget { target, .. } => Some(target),
            BuildError::GenerationError { step, .. } => Some(step),
            _ => None,
        }
    }

    /// Verbatim output of the external tool, if one was involved.
    pub fn tool_output(&self) -> Option<&str> {
        match self {
            BuildError::CompileError { output, .. }
            | BuildError::LinkError { output, .. }
            | BuildError::GenerationError { output, .. }
            | BuildError::ExecutionError { output, .. } => Some(output),
            _ => None,
        }
    }

    pub(crate) fn io(message: impl Into<String>) -> Self {
        BuildError::Io {
            message: message.into(),
        }
    }
}

impl From<anyhow::Error> for BuildError {
    fn from(err: anyhow::Error) -> Self {
        BuildError::io(format!("{:#}", err))
    }
}

impl From<std::io::Error> for BuildError {
    fn from(err: std::io::Error) -> Self {
        BuildError::io(err.to_string())
    }
}
