//! Target definitions - what gets built.
//!
//! A [`TargetSpec`] is the declared form of a target, resolved against the
//! project root. Artifacts are what a finished target hands to its
//! dependents.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::util::PathSet;

/// The kind of target being built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    /// Static library (.a)
    #[serde(alias = "lib")]
    StaticLib,

    /// Executable binary
    #[serde(alias = "exe")]
    Executable,

    /// Output of a code generation step
    Generated,
}

impl TargetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetKind::StaticLib => "staticlib",
            TargetKind::Executable => "executable",
            TargetKind::Generated => "generated",
        }
    }

    /// Whether other targets may depend on this kind.
    pub fn is_linkable_dependency(&self) -> bool {
        !matches!(self, TargetKind::Executable)
    }
}

impl std::fmt::Display for TargetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declared code generation step.
///
/// `outputs`, `sources` and `includes` are relative to the step's output
/// directory; `inputs` are absolute.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenerationSpec {
    /// Program candidates, first found wins.
    pub program: Vec<String>,
    /// Arguments; `{out}` is replaced with the output directory.
    pub args: Vec<String>,
    pub inputs: Vec<PathBuf>,
    pub outputs: Vec<PathBuf>,
    /// Outputs that dependents compile.
    pub sources: Vec<PathBuf>,
    /// Output directories added to dependents' include path.
    pub includes: Vec<PathBuf>,
    /// The candidate chosen ahead of the build, if already resolved.
    pub resolved_program: Option<PathBuf>,
}

/// A declared target with all paths resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetSpec {
    pub name: String,
    pub kind: TargetKind,
    /// Ordered source files.
    pub sources: Vec<PathBuf>,
    /// Names of targets this one depends on, in declaration order.
    pub deps: Vec<String>,
    /// Private include directories.
    pub includes: PathSet,
    /// Include directories propagated to dependents.
    pub export_includes: PathSet,
    pub macros: Vec<String>,
    pub flags: Vec<String>,
    pub link_flags: Vec<String>,
    /// System libraries linked by name.
    pub external_libs: Vec<String>,
    /// pkg-config packages whose cflags are appended.
    pub pkg_config: Vec<String>,
    /// Add the directory of every source to the include path.
    pub include_source_dirs: bool,
    pub generation: Option<GenerationSpec>,
}

impl TargetSpec {
    fn with_kind(name: impl Into<String>, kind: TargetKind) -> Self {
        TargetSpec {
            name: name.into(),
            kind,
            sources: Vec::new(),
            deps: Vec::new(),
            includes: PathSet::new(),
            export_includes: PathSet::new(),
            macros: Vec::new(),
            flags: Vec::new(),
            link_flags: Vec::new(),
            external_libs: Vec::new(),
            pkg_config: Vec::new(),
            include_source_dirs: true,
            generation: None,
        }
    }

    /// A static library built from `sources`.
    pub fn library(name: impl Into<String>, sources: Vec<PathBuf>) -> Self {
        let mut spec = Self::with_kind(name, TargetKind::StaticLib);
        spec.sources = sources;
        spec
    }

    /// An executable built from `sources`.
    pub fn executable(name: impl Into<String>, sources: Vec<PathBuf>) -> Self {
        let mut spec = Self::with_kind(name, TargetKind::Executable);
        spec.sources = sources;
        spec
    }

    /// A code generation target.
    pub fn generated(name: impl Into<String>, generation: GenerationSpec) -> Self {
        let mut spec = Self::with_kind(name, TargetKind::Generated);
        spec.include_source_dirs = false;
        spec.generation = Some(generation);
        spec
    }

    pub fn with_deps<S: Into<String>>(mut self, deps: impl IntoIterator<Item = S>) -> Self {
        self.deps.extend(deps.into_iter().map(Into::into));
        self
    }

    pub fn with_macros<S: Into<String>>(mut self, macros: impl IntoIterator<Item = S>) -> Self {
        self.macros.extend(macros.into_iter().map(Into::into));
        self
    }

    pub fn with_flags<S: Into<String>>(mut self, flags: impl IntoIterator<Item = S>) -> Self {
        self.flags.extend(flags.into_iter().map(Into::into));
        self
    }

    pub fn with_external_libs<S: Into<String>>(
        mut self,
        libs: impl IntoIterator<Item = S>,
    ) -> Self {
        self.external_libs.extend(libs.into_iter().map(Into::into));
        self
    }

    pub fn with_export_includes<P: Into<PathBuf>>(
        mut self,
        dirs: impl IntoIterator<Item = P>,
    ) -> Self {
        self.export_includes.extend(dirs);
        self
    }
}

/// A built static library as seen by its dependents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LibraryArtifact {
    pub name: String,
    pub archive: PathBuf,
    pub export_includes: PathSet,
    /// External libraries of this library and everything below it.
    pub external_libs: Vec<String>,
    /// Archives of libraries this one depends on, in link order.
    pub transitive_archives: Vec<PathBuf>,
    /// True if nothing was recompiled or re-archived.
    pub fresh: bool,
}

/// A linked executable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutableArtifact {
    pub name: String,
    pub path: PathBuf,
    pub fresh: bool,
}

/// Outputs of a generation step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GeneratedArtifact {
    pub name: String,
    /// Generated files dependents compile.
    pub sources: Vec<PathBuf>,
    /// Generated include directories.
    pub includes: PathSet,
    /// Every declared output.
    pub outputs: Vec<PathBuf>,
    pub fresh: bool,
}
