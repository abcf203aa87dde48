//! Build context - toolchain, compiler policy, and output layout.
//!
//! [`configure`] turns a set of options into an immutable [`BuildContext`]
//! that every target build shares. Platform rules are evaluated once here;
//! per-target declarations are layered on top by the native builder.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::builder::error::BuildError;
use crate::builder::toolchain::{detect_toolchain, Toolchain, ToolchainFamily};
use crate::core::platform::{MergedPolicy, Mode, PlatformRule, PlatformTags, RuleEffect, RuleSet};
use crate::util::process::CommandRunner;

/// Language standard used when none is configured.
pub const DEFAULT_STD: &str = "c++11";

/// Name of the generation cache index inside the build directory.
pub const CACHE_INDEX_NAME: &str = "cache-index.json";

/// Inputs to [`configure`].
#[derive(Debug, Clone)]
pub struct ToolchainOptions {
    /// Compiler override path
    pub compiler: Option<PathBuf>,
    /// Archiver override path
    pub archiver: Option<PathBuf>,
    /// Extra flags appended to every compile
    pub extra_flags: Vec<String>,
    pub release: bool,
    /// Force colored diagnostics
    pub color: bool,
    /// Language standard
    pub std: Option<String>,
    /// Project-wide include directories (absolute)
    pub includes: Vec<PathBuf>,
    /// Project-wide compile flags
    pub flags: Vec<String>,
    /// Project-wide macros
    pub macros: Vec<String>,
    /// Platform rules, evaluated after the built-in ones
    pub rules: Vec<PlatformRule>,
    /// Project root; relative paths in commands are resolved against it
    pub root: PathBuf,
    /// Build output root
    pub build_dir: PathBuf,
    /// Worker count; `None` means available cores
    pub jobs: Option<usize>,
}

impl Default for ToolchainOptions {
    fn default() -> Self {
        ToolchainOptions {
            compiler: None,
            archiver: None,
            extra_flags: Vec::new(),
            release: false,
            color: true,
            std: None,
            includes: Vec::new(),
            flags: Vec::new(),
            macros: Vec::new(),
            rules: Vec::new(),
            root: PathBuf::from("."),
            build_dir: PathBuf::from("build"),
            jobs: None,
        }
    }
}

/// Immutable configuration shared by every target of one run.
#[derive(Clone)]
pub struct BuildContext {
    toolchain: Arc<dyn Toolchain>,
    tags: PlatformTags,
    policy: MergedPolicy,
    compile_flags: Vec<String>,
    macros: Vec<String>,
    includes: Vec<PathBuf>,
    release: bool,
    root: PathBuf,
    build_dir: PathBuf,
    jobs: usize,
}

impl fmt::Debug for BuildContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuildContext")
            .field("toolchain", &self.toolchain.identity())
            .field("tags", &self.tags)
            .field("compile_flags", &self.compile_flags)
            .field("macros", &self.macros)
            .field("release", &self.release)
            .field("build_dir", &self.build_dir)
            .field("jobs", &self.jobs)
            .finish()
    }
}

/// Detect the toolchain and build the context.
///
/// Fails only with [`BuildError::ProgramNotFound`] when no compiler or
/// archiver can be located.
pub fn configure(
    options: &ToolchainOptions,
    runner: &dyn CommandRunner,
) -> Result<BuildContext, BuildError> {
    let toolchain: Arc<dyn Toolchain> =
        Arc::from(detect_toolchain(
            options.compiler.as_deref(),
            options.archiver.as_deref(),
            runner,
        )?);
    Ok(BuildContext::with_toolchain(options, toolchain))
}

/// Rules every build starts with, ahead of the project's own.
fn builtin_rules(options: &ToolchainOptions) -> Vec<PlatformRule> {
    let std = options.std.as_deref().unwrap_or(DEFAULT_STD);
    let mut rules = vec![PlatformRule::new(
        ["posix"],
        RuleEffect::flags([format!("-std={}", std)]),
    )];

    if options.color {
        rules.push(PlatformRule::new(
            ["posix"],
            RuleEffect::flags(["-fdiagnostics-color"]),
        ));
    }

    // clang drops debug info for types defined in other TUs unless told not to
    rules.push(PlatformRule::new(
        ["clang", "debug"],
        RuleEffect::flags(["-fno-limit-debug-info"]),
    ));

    rules
}

impl BuildContext {
    /// Build a context around an already-chosen toolchain.
    pub fn with_toolchain(options: &ToolchainOptions, toolchain: Arc<dyn Toolchain>) -> Self {
        let family = toolchain.family();
        let tags = PlatformTags::host()
            .with_tag(family.as_str())
            .with_tag(if options.release { "release" } else { "debug" });

        let mut rules: RuleSet = builtin_rules(options).into_iter().collect();
        rules.extend(options.rules.iter().cloned());

        let policy = rules.evaluate(&tags, Mode::for_release(options.release));
        tracing::debug!(
            "Platform tags {}: {} of {} rules matched",
            tags,
            policy.matched.len(),
            rules.rules().len()
        );

        let mut compile_flags = policy.flags.clone();
        if policy.mode.debug {
            compile_flags.push("-g".to_string());
        }
        if policy.mode.optimize {
            compile_flags.push("-O2".to_string());
        }
        compile_flags.extend(options.flags.iter().cloned());
        compile_flags.extend(options.extra_flags.iter().cloned());

        let mut macros = policy.macros.clone();
        macros.extend(options.macros.iter().cloned());

        let jobs = options
            .jobs
            .filter(|&j| j > 0)
            .unwrap_or_else(|| {
                std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(1)
            });

        BuildContext {
            toolchain,
            tags,
            policy,
            compile_flags,
            macros,
            includes: options.includes.clone(),
            release: options.release,
            root: options.root.clone(),
            build_dir: options.build_dir.clone(),
            jobs,
        }
    }

    pub fn toolchain(&self) -> &dyn Toolchain {
        self.toolchain.as_ref()
    }

    pub fn family(&self) -> ToolchainFamily {
        self.toolchain.family()
    }

    /// Active platform tags.
    pub fn tags(&self) -> &PlatformTags {
        &self.tags
    }

    /// Debug/optimize mode after rule overrides.
    pub fn mode(&self) -> Mode {
        self.policy.mode
    }

    /// Flags passed to every compile, in order: rule flags, mode flags,
    /// project flags, command-line flags.
    pub fn compile_flags(&self) -> &[String] {
        &self.compile_flags
    }

    /// Macros defined for every compile.
    pub fn macros(&self) -> &[String] {
        &self.macros
    }

    /// Project-wide include directories.
    pub fn includes(&self) -> &[PathBuf] {
        &self.includes
    }

    pub fn is_release(&self) -> bool {
        self.release
    }

    /// Profile name used in the output layout.
    pub fn profile(&self) -> &'static str {
        if self.release {
            "release"
        } else {
            "debug"
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn build_dir(&self) -> &Path {
        &self.build_dir
    }

    pub fn jobs(&self) -> usize {
        self.jobs
    }

    /// Per-profile output directory, e.g. `build/debug`.
    pub fn profile_dir(&self) -> PathBuf {
        self.build_dir.join(self.profile())
    }

    /// Output directory owned by one target.
    pub fn target_dir(&self, name: &str) -> PathBuf {
        self.profile_dir().join(name)
    }

    /// Output directory of a generation step, shared across profiles.
    pub fn gen_dir(&self, name: &str) -> PathBuf {
        self.build_dir.join("gen").join(name)
    }

    /// Location of the persisted generation cache.
    pub fn cache_index_path(&self) -> PathBuf {
        self.build_dir.join(CACHE_INDEX_NAME)
    }
}
