//! Toolchain abstraction for the C++ compiler driver and archiver.
//!
//! A toolchain turns abstract compile/archive/link requests into concrete
//! [`CommandSpec`]s. It never runs anything itself; execution goes through
//! the [`CommandRunner`](crate::util::CommandRunner) seam.
//!
//! Toolchain detection priority:
//! 1. Explicit paths (`--cxx`/`--ar`, or `[build] cxx`/`ar` in config)
//! 2. Environment variables (CXX, AR)
//! 3. Auto-detection (searching PATH for common compilers)

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;

mod detect;
mod gcc;

pub use detect::{detect_toolchain, parse_compiler_version, CompilerIdentity};
pub use gcc::GccToolchain;

pub use crate::util::process::CommandSpec;

/// Input for a compile step.
#[derive(Debug, Clone)]
pub struct CompileInput {
    /// Source file to compile
    pub source: PathBuf,
    /// Output object file
    pub output: PathBuf,
    /// Include directories, in search order
    pub include_dirs: Vec<PathBuf>,
    /// Preprocessor macros, `NAME` or `NAME=VALUE`
    pub macros: Vec<String>,
    /// Additional compiler flags
    pub cflags: Vec<String>,
    /// Dependency file to write, if the compiler supports it
    pub depfile: Option<PathBuf>,
}

/// Input for an archive step (creating a static library).
#[derive(Debug, Clone)]
pub struct ArchiveInput {
    /// Object files to archive
    pub objects: Vec<PathBuf>,
    /// Output archive file
    pub output: PathBuf,
}

/// Input for a link step.
#[derive(Debug, Clone)]
pub struct LinkInput {
    /// Object files to link
    pub objects: Vec<PathBuf>,
    /// Static archives, dependents before dependencies
    pub archives: Vec<PathBuf>,
    /// Output executable
    pub output: PathBuf,
    /// External libraries (without -l prefix)
    pub libs: Vec<String>,
    /// Additional linker flags
    pub ldflags: Vec<String>,
}

/// The compiler family of a toolchain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolchainFamily {
    /// GCC (GNU Compiler Collection)
    Gcc,
    /// Clang/LLVM, including Apple Clang
    Clang,
}

impl ToolchainFamily {
    /// The family name, also used as the platform tag for rules.
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolchainFamily::Gcc => "gcc",
            ToolchainFamily::Clang => "clang",
        }
    }
}

impl fmt::Display for ToolchainFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trait for toolchain implementations.
///
/// Each toolchain knows how to generate commands for its specific compiler.
pub trait Toolchain: Send + Sync + fmt::Debug {
    /// Get the compiler family.
    fn family(&self) -> ToolchainFamily;

    /// Family, path and version of the compiler, for fingerprints.
    fn identity(&self) -> &CompilerIdentity;

    /// Get the compiler driver path.
    fn compiler_path(&self) -> &Path;

    /// Get the archiver path.
    fn archiver_path(&self) -> &Path;

    /// Generate a compile command.
    fn compile_command(&self, input: &CompileInput) -> CommandSpec;

    /// Generate an archive command (create static library).
    fn archive_command(&self, input: &ArchiveInput) -> CommandSpec;

    /// Generate a link command for an executable.
    fn link_exe_command(&self, input: &LinkInput) -> CommandSpec;

    /// Arguments asking the compiler to write a make-style depfile.
    fn depfile_args(&self, depfile: &Path) -> Vec<String>;

    /// Get the object file extension.
    fn object_extension(&self) -> &str;

    /// Get the static library prefix (e.g., "lib" on Unix).
    fn static_lib_prefix(&self) -> &str;

    /// Get the static library extension.
    fn static_lib_extension(&self) -> &str;

    /// Get the executable extension.
    fn exe_extension(&self) -> &str;

    /// File name of the archive for library `name`.
    fn static_lib_name(&self, name: &str) -> String {
        format!(
            "{}{}.{}",
            self.static_lib_prefix(),
            name,
            self.static_lib_extension()
        )
    }

    /// File name of the executable `name`.
    fn exe_name(&self, name: &str) -> String {
        let ext = self.exe_extension();
        if ext.is_empty() {
            name.to_string()
        } else {
            format!("{}.{}", name, ext)
        }
    }
}
