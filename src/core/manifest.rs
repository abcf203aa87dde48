//! Kiln.toml manifest parsing.
//!
//! The manifest is the build description: toolchain defaults, ordered
//! platform rules, and the generation steps, libraries and executables of
//! the project. Source lists are treated opaquely as glob patterns.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::core::platform::PlatformRule;
use crate::core::target::{GenerationSpec, TargetKind, TargetSpec};
use crate::util::fs::{glob_files, prefixed_sources};
use crate::util::PathSet;

/// Name of the manifest file.
pub const MANIFEST_NAME: &str = "Kiln.toml";

/// Default build output directory, relative to the project root.
pub const DEFAULT_BUILD_DIR: &str = "build";

/// A parsed Kiln.toml.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    pub project: ProjectSection,

    #[serde(default)]
    pub toolchain: ToolchainSection,

    /// Platform rules, evaluated in declaration order after the built-ins.
    #[serde(default, rename = "rule")]
    pub rules: Vec<PlatformRule>,

    #[serde(default, rename = "generate")]
    pub generators: Vec<GenerateSection>,

    #[serde(default, rename = "lib")]
    pub libs: Vec<TargetSection>,

    #[serde(default, rename = "exe")]
    pub exes: Vec<TargetSection>,
}

/// `[project]`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ProjectSection {
    pub name: String,
    pub build_dir: Option<PathBuf>,
}

/// `[toolchain]`: project-wide compiler policy.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct ToolchainSection {
    /// Language standard passed as `-std=` on posix hosts.
    pub std: Option<String>,
    pub includes: Vec<PathBuf>,
    pub flags: Vec<String>,
    pub macros: Vec<String>,
}

/// Program to run: a single name or an ordered list of candidates.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ProgramSpec {
    Single(String),
    Candidates(Vec<String>),
}

impl ProgramSpec {
    pub fn candidates(&self) -> Vec<String> {
        match self {
            ProgramSpec::Single(name) => vec![name.clone()],
            ProgramSpec::Candidates(names) => names.clone(),
        }
    }
}

/// `[[generate]]`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct GenerateSection {
    pub name: String,
    pub program: ProgramSpec,
    #[serde(default)]
    pub args: Vec<String>,
    /// Files whose contents decide freshness, relative to the project root.
    #[serde(default)]
    pub inputs: Vec<PathBuf>,
    /// Files the command produces, relative to its output directory.
    pub outputs: Vec<PathBuf>,
    #[serde(default)]
    pub sources: Vec<PathBuf>,
    #[serde(default)]
    pub includes: Vec<PathBuf>,
}

/// One entry of a `sources` list.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum SourceEntry {
    /// A glob pattern or literal path relative to the project root.
    Pattern(String),
    /// Patterns expanded under `prefix`; paths containing `ignore` are dropped.
    Prefixed {
        prefix: PathBuf,
        glob: Vec<String>,
        #[serde(default)]
        ignore: Option<String>,
    },
}

impl SourceEntry {
    /// Expand this entry to concrete paths under `root`.
    pub fn expand(&self, root: &Path) -> Result<Vec<PathBuf>> {
        match self {
            SourceEntry::Pattern(pattern) => glob_files(root, std::slice::from_ref(pattern), None),
            SourceEntry::Prefixed {
                prefix,
                glob,
                ignore,
            } => prefixed_sources(root, prefix, glob, ignore.as_deref()),
        }
    }
}

/// `[[lib]]` and `[[exe]]`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct TargetSection {
    pub name: String,
    #[serde(default)]
    pub sources: Vec<SourceEntry>,
    #[serde(default = "default_true")]
    pub include_source_dirs: bool,
    #[serde(default)]
    pub deps: Vec<String>,
    #[serde(default)]
    pub includes: Vec<PathBuf>,
    #[serde(default)]
    pub export_includes: Vec<PathBuf>,
    #[serde(default)]
    pub macros: Vec<String>,
    #[serde(default)]
    pub flags: Vec<String>,
    #[serde(default)]
    pub link_flags: Vec<String>,
    #[serde(default)]
    pub pkg_config: Vec<String>,
    #[serde(default)]
    pub external_libs: Vec<String>,
}

fn default_true() -> bool {
    true
}

impl Manifest {
    /// Load a manifest from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read manifest: {}", path.display()))?;

        Self::parse(&content)
            .with_context(|| format!("invalid manifest: {}", path.display()))
    }

    /// Parse and validate manifest content.
    pub fn parse(content: &str) -> Result<Self> {
        let manifest: Manifest =
            toml::from_str(content).with_context(|| format!("failed to parse {}", MANIFEST_NAME))?;
        manifest.validate()?;
        Ok(manifest)
    }

    fn validate(&self) -> Result<()> {
        if self.project.name.trim().is_empty() {
            bail!("[project] name must not be empty");
        }

        let mut seen = HashSet::new();
        let names = self
            .generators
            .iter()
            .map(|g| &g.name)
            .chain(self.libs.iter().map(|t| &t.name))
            .chain(self.exes.iter().map(|t| &t.name));
        for name in names {
            if name.trim().is_empty() {
                bail!("target names must not be empty");
            }
            if !seen.insert(name.as_str()) {
                bail!("target `{}` is declared more than once", name);
            }
        }

        for gen in &self.generators {
            if gen.program.candidates().is_empty() {
                bail!("generation step `{}` names no program", gen.name);
            }
            if gen.outputs.is_empty() {
                bail!("generation step `{}` declares no outputs", gen.name);
            }
            for source in &gen.sources {
                if !gen.outputs.contains(source) {
                    bail!(
                        "generation step `{}`: source {} is not a declared output",
                        gen.name,
                        source.display()
                    );
                }
            }
        }

        for lib in &self.libs {
            if !lib.link_flags.is_empty() {
                tracing::warn!(
                    "library `{}`: link-flags have no effect on static libraries",
                    lib.name
                );
            }
        }

        Ok(())
    }

    /// The build output directory for a project rooted at `root`.
    pub fn build_dir(&self, root: &Path) -> PathBuf {
        let dir = self
            .project
            .build_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_BUILD_DIR));
        root.join(dir)
    }

    /// Resolve every declared target against `root`.
    ///
    /// Targets are returned in declaration order: generation steps, then
    /// libraries, then executables. Source globs are expanded here.
    pub fn targets(&self, root: &Path) -> Result<Vec<TargetSpec>> {
        let generator_names: HashSet<&str> =
            self.generators.iter().map(|g| g.name.as_str()).collect();

        let mut specs = Vec::with_capacity(self.generators.len() + self.libs.len() + self.exes.len());

        for gen in &self.generators {
            let generation = GenerationSpec {
                program: gen.program.candidates(),
                args: gen.args.clone(),
                inputs: gen.inputs.iter().map(|p| root.join(p)).collect(),
                outputs: gen.outputs.clone(),
                sources: gen.sources.clone(),
                includes: gen.includes.clone(),
                resolved_program: None,
            };
            specs.push(TargetSpec::generated(gen.name.clone(), generation));
        }

        for (kind, sections) in [
            (TargetKind::StaticLib, &self.libs),
            (TargetKind::Executable, &self.exes),
        ] {
            for section in sections {
                specs.push(resolve_target(kind, section, root, &generator_names)?);
            }
        }

        Ok(specs)
    }
}

fn resolve_target(
    kind: TargetKind,
    section: &TargetSection,
    root: &Path,
    generator_names: &HashSet<&str>,
) -> Result<TargetSpec> {
    let mut sources = Vec::new();
    for entry in &section.sources {
        for path in entry
            .expand(root)
            .with_context(|| format!("target `{}`: failed to expand sources", section.name))?
        {
            if !sources.contains(&path) {
                sources.push(path);
            }
        }
    }

    let fed_by_generator = section
        .deps
        .iter()
        .any(|d| generator_names.contains(d.as_str()));
    if sources.is_empty() && !fed_by_generator {
        bail!("target `{}` has no source files", section.name);
    }

    let mut spec = match kind {
        TargetKind::Executable => TargetSpec::executable(section.name.clone(), sources),
        _ => TargetSpec::library(section.name.clone(), sources),
    };
    spec.deps = section.deps.clone();
    spec.includes = section.includes.iter().collect::<PathSet>().rooted_at(root);
    spec.export_includes = section
        .export_includes
        .iter()
        .collect::<PathSet>()
        .rooted_at(root);
    spec.macros = section.macros.clone();
    spec.flags = section.flags.clone();
    spec.link_flags = section.link_flags.clone();
    spec.pkg_config = section.pkg_config.clone();
    spec.external_libs = section.external_libs.clone();
    spec.include_source_dirs = section.include_source_dirs;
    Ok(spec)
}

/// Find `Kiln.toml` in `cwd` or the nearest parent directory.
pub fn find_manifest(cwd: &Path) -> Result<PathBuf> {
    let mut current = cwd.to_path_buf();
    loop {
        let candidate = current.join(MANIFEST_NAME);
        if candidate.is_file() {
            return Ok(candidate);
        }
        if !current.pop() {
            bail!(
                "could not find `{}` in `{}` or any parent directory",
                MANIFEST_NAME,
                cwd.display()
            );
        }
    }
}
