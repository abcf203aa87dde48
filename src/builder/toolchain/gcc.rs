//! GCC/Clang toolchain implementation.

use std::path::{Path, PathBuf};

use super::{
    ArchiveInput, CommandSpec, CompileInput, CompilerIdentity, LinkInput, Toolchain,
    ToolchainFamily,
};

/// GCC/Clang toolchain (Unix-like systems).
#[derive(Debug, Clone)]
pub struct GccToolchain {
    /// Path to the C++ compiler driver
    pub cxx: PathBuf,
    /// Path to the archiver
    pub ar: PathBuf,
    /// Compiler family and version
    pub identity: CompilerIdentity,
}

impl GccToolchain {
    /// Create a new GCC-style toolchain.
    pub fn new(cxx: PathBuf, ar: PathBuf, identity: CompilerIdentity) -> Self {
        GccToolchain { cxx, ar, identity }
    }

    /// A toolchain with a known family and no version, for tests and
    /// explicitly configured setups.
    pub fn with_family(cxx: PathBuf, ar: PathBuf, family: ToolchainFamily) -> Self {
        let identity = CompilerIdentity {
            family,
            path: cxx.clone(),
            version: None,
        };
        GccToolchain { cxx, ar, identity }
    }
}

impl Toolchain for GccToolchain {
    fn family(&self) -> ToolchainFamily {
        self.identity.family
    }

    fn identity(&self) -> &CompilerIdentity {
        &self.identity
    }

    fn compiler_path(&self) -> &Path {
        &self.cxx
    }

    fn archiver_path(&self) -> &Path {
        &self.ar
    }

    fn compile_command(&self, input: &CompileInput) -> CommandSpec {
        let mut cmd = CommandSpec::new(&self.cxx);

        // Compile only
        cmd = cmd.arg("-c");

        // Include directories
        for dir in &input.include_dirs {
            cmd = cmd.arg(format!("-I{}", dir.display()));
        }

        // Macros, already in NAME or NAME=VALUE form
        for name in &input.macros {
            cmd = cmd.arg(format!("-D{}", name));
        }

        // Custom flags
        cmd = cmd.args(input.cflags.iter().cloned());

        if let Some(ref depfile) = input.depfile {
            cmd = cmd.args(self.depfile_args(depfile));
        }

        // Input and output
        cmd = cmd.arg(input.source.display().to_string());
        cmd = cmd.arg("-o");
        cmd = cmd.arg(input.output.display().to_string());

        cmd
    }

    fn archive_command(&self, input: &ArchiveInput) -> CommandSpec {
        let mut cmd = CommandSpec::new(&self.ar);

        // Create archive with symbol index, replace files
        cmd = cmd.arg("rcs");
        cmd = cmd.arg(input.output.display().to_string());

        // Object files
        for obj in &input.objects {
            cmd = cmd.arg(obj.display().to_string());
        }

        cmd
    }

    fn link_exe_command(&self, input: &LinkInput) -> CommandSpec {
        let mut cmd = CommandSpec::new(&self.cxx);

        // Output
        cmd = cmd.arg("-o");
        cmd = cmd.arg(input.output.display().to_string());

        // Object files
        for obj in &input.objects {
            cmd = cmd.arg(obj.display().to_string());
        }

        // Static archives, dependents first so single-pass linkers resolve
        for archive in &input.archives {
            cmd = cmd.arg(archive.display().to_string());
        }

        // External libraries
        for lib in &input.libs {
            cmd = cmd.arg(format!("-l{}", lib));
        }

        // Custom flags
        cmd = cmd.args(input.ldflags.iter().cloned());

        cmd
    }

    fn depfile_args(&self, depfile: &Path) -> Vec<String> {
        vec![
            "-MMD".to_string(),
            "-MF".to_string(),
            depfile.display().to_string(),
        ]
    }

    fn object_extension(&self) -> &str {
        "o"
    }

    fn static_lib_prefix(&self) -> &str {
        "lib"
    }

    fn static_lib_extension(&self) -> &str {
        "a"
    }

    fn exe_extension(&self) -> &str {
        ""
    }
}
